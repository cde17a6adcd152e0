// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dimple::model::source::parse_location;
use url::Url;

/// Dimple 骶部小凹照片筛查
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型描述文件位置（URL 或本地路径）
  #[arg(long, value_name = "MODEL", default_value = "web_model/model.json", value_parser = parse_location)]
  pub model: Url,

  /// 请求级配置覆盖，例如 `thr=0.2&order=abnormal_normal`
  #[arg(long, value_name = "QUERY")]
  pub query: Option<String>,

  /// 持久化配置覆盖文件
  #[arg(long, value_name = "FILE", default_value = ".dimple/overrides.json")]
  pub overrides: PathBuf,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 对图像进行筛查
  Predict {
    /// 输入图像或图像目录
    /// 支持格式:
    /// - 本地路径: photo.jpg, photos/
    /// - file:///path/to/photo.jpg
    /// - image://path/to/photos
    #[arg(long, value_name = "SOURCE", value_parser = parse_location)]
    input: Url,

    /// 输出方式
    /// 支持格式:
    /// - console:
    /// - json:///path/to/report.jsonl
    #[arg(long, value_name = "OUTPUT", default_value = "console:")]
    output: Url,

    /// 最多处理的图像数量
    #[arg(long, value_name = "COUNT")]
    limit: Option<usize>,
  },

  /// 仅加载模型并报告其格式
  Load,

  /// 查看或修改持久化配置覆盖
  Config {
    #[command(subcommand)]
    action: ConfigAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
  /// 显示生效的配置与持久化的覆盖项
  Show,
  /// 设置一个覆盖项
  Set {
    /// threshold, order, div255, bgr, unexpected_shape
    key: String,
    value: String,
  },
  /// 删除一个覆盖项
  Unset { key: String },
}
