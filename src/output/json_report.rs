// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/output/json_report.rs - JSON 报告输出
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

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decision::PredictionResult,
  input::ImageFrame,
  output::{Render, report::Report},
};

#[derive(Error, Debug)]
pub enum JsonReportOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的文件路径: {0}")]
  InvalidPath(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("报告文件锁已失效")]
  Poisoned,
}

/// 每个结果追加一行 JSON
pub struct JsonReportOutput {
  path: PathBuf,
  file: Mutex<File>,
}

impl FromUrlWithScheme for JsonReportOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonReportOutput {
  type Error = JsonReportOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonReportOutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }
    let path = urlencoding::decode(uri.path())
      .map_err(|_| JsonReportOutputError::InvalidPath(uri.to_string()))?;
    Self::create(path.into_owned())
  }
}

impl JsonReportOutput {
  pub fn create(path: impl Into<PathBuf>) -> Result<Self, JsonReportOutputError> {
    let path = path.into();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(Self {
      path,
      file: Mutex::new(file),
    })
  }

  pub fn path(&self) -> &PathBuf {
    &self.path
  }
}

impl Render<ImageFrame, PredictionResult> for JsonReportOutput {
  type Error = JsonReportOutputError;

  fn render_result(&self, frame: &ImageFrame, result: &PredictionResult) -> Result<(), Self::Error> {
    let mut line = serde_json::to_string(&Report::new(frame, result))?;
    line.push('\n');

    let mut file = self
      .file
      .lock()
      .map_err(|_| JsonReportOutputError::Poisoned)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    debug!("写入报告: {}", self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::decision::Calibration;
  use image::DynamicImage;
  use serde_json::Value;

  #[test]
  fn appends_one_line_per_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reports").join("run.jsonl");
    let url = Url::parse(&format!("json://{}", path.display())).unwrap();
    let output = JsonReportOutput::from_url(&url).unwrap();

    let frame = ImageFrame::new(DynamicImage::new_rgb8(2, 2), "one.png");
    let calibration = Calibration::default();
    output
      .render_result(&frame, &calibration.decide(0.3, 0.135))
      .unwrap();
    output
      .render_result(&frame, &calibration.decide(0.05, 0.135))
      .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<Value> = text
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["label"], "Abnormal");
    assert_eq!(lines[0]["badge"], "High confidence");
    assert_eq!(lines[1]["label"], "Normal");
    assert_eq!(lines[1]["source"], "one.png");
  }
}
