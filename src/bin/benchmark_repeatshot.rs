// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理耗时测试
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use dimple::{
  Classifier, ConfigResolver, FromUrl,
  config::QueryOverrides,
  model::{ModelLoader, source::parse_location},
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// 对同一张图像重复推理并统计平均耗时
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型描述文件位置
  #[arg(long, value_name = "MODEL", value_parser = parse_location)]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE", value_parser = parse_location)]
  pub input: Url,
  /// 输出方式
  #[arg(long, value_name = "OUTPUT", default_value = "console:")]
  pub output: Url,
  /// 重复次数
  #[arg(long, value_name = "COUNT", default_value = "100")]
  pub repeat: usize,
  /// 请求级配置覆盖
  #[arg(long, value_name = "QUERY", default_value = "")]
  pub query: String,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型位置: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出方式: {}", args.output);

  let query = QueryOverrides::parse(&args.query);
  let config = ConfigResolver::default().layer(&query).resolve();

  let input_image = dimple::input::InputWrapper::from_url(&args.input)?;
  let classifier = Classifier::new(ModelLoader::from_location(args.model));
  let output = dimple::output::OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::default()
    .with_repeat(args.repeat)
    .run_task(input_image, &classifier, &config, output)
    .await?;

  Ok(())
}
