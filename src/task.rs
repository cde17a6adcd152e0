// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/task.rs - 分类任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{thread, time::Duration};
use tracing::{error, info, warn};

use crate::{
  classifier::{ClassifyError, Classifier},
  config::Configuration,
  decision::PredictionResult,
  input::ImageFrame,
  model::ArtifactSource,
  output::Render,
};

/// 统计平均耗时时跳过的预热次数
const WARMUP_RUNS: usize = 2;

#[allow(async_fn_in_trait)]
pub trait Task<I, O>: Sized {
  type Error;
  async fn run_task<S: ArtifactSource>(
    self,
    input: I,
    classifier: &Classifier<S>,
    config: &Configuration,
    output: O,
  ) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = ImageFrame>,
  O: Render<ImageFrame, PredictionResult, Error = RE>,
> Task<I, O> for OneShotTask
{
  type Error = anyhow::Error;

  async fn run_task<S: ArtifactSource>(
    self,
    mut input: I,
    classifier: &Classifier<S>,
    config: &Configuration,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功: {}, 开始推理...", frame.origin);
    let now = std::time::Instant::now();
    let result = classifier.classify(&frame.image, config).await?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一张图像重复推理，用于测量耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat: 100 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

/// 跳过预热后的平均耗时；次数不足时对全部样本求平均
pub fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  let measured = if times.len() > WARMUP_RUNS {
    &times[WARMUP_RUNS..]
  } else {
    times
  };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = ImageFrame>,
  O: Render<ImageFrame, PredictionResult, Error = RE>,
> Task<I, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  async fn run_task<S: ArtifactSource>(
    self,
    mut input: I,
    classifier: &Classifier<S>,
    config: &Configuration,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，开始推理...");
    classifier.load().await?;

    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = std::time::Instant::now();
      let result = classifier.classify(&frame.image, config).await?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    if let Some(average) = average_after_warmup(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }

    Ok(())
  }
}

/// 依次处理输入中的每张图像
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = ImageFrame>,
  O: Render<ImageFrame, PredictionResult, Error = RE>,
> Task<I, O> for ContinuousTask
{
  type Error = anyhow::Error;

  async fn run_task<S: ArtifactSource>(
    self,
    input: I,
    classifier: &Classifier<S>,
    config: &Configuration,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }) {
      warn!("无法注册中断处理: {}", e);
    }

    let mut frame_index = 0usize;
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 张图像: {}", frame_index, frame.origin);
      let now = std::time::Instant::now();
      match classifier.classify(&frame.image, config).await {
        Ok(result) => {
          let elapsed_a = now.elapsed();
          output.render_result(&frame, &result)?;
          info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, now.elapsed());
        }
        Err(ClassifyError::InvalidImage(e)) => error!("跳过图像 {}: {}", frame.origin, e),
        Err(e) => return Err(e.into()),
      }
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定数量 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 张图像", frame_index);
    Ok(())
  }
}
