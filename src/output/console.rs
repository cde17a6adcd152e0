// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/output/console.rs - 日志输出
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

use std::convert::Infallible;

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decision::PredictionResult,
  input::ImageFrame,
  output::{Render, report::Report},
};

/// 将报告写入日志
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = Infallible;

  fn from_url(_url: &Url) -> Result<Self, Self::Error> {
    Ok(ConsoleOutput)
  }
}

impl Render<ImageFrame, PredictionResult> for ConsoleOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &ImageFrame, result: &PredictionResult) -> Result<(), Self::Error> {
    let report = Report::new(frame, result);
    info!(
      "{}: {} [{}] 分数 {}%",
      report.source,
      report.result.label,
      report.badge,
      report.score_percent()
    );
    info!("{}", report.guidance);
    Ok(())
  }
}
