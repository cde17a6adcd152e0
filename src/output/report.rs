// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/output/report.rs - 结果展示文本
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

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decision::{Label, PredictionResult};
use crate::input::ImageFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfidenceBand {
  High,
  Medium,
  Low,
}

impl ConfidenceBand {
  pub fn of(confidence: f32) -> Self {
    if confidence >= 0.75 {
      ConfidenceBand::High
    } else if confidence >= 0.50 {
      ConfidenceBand::Medium
    } else {
      ConfidenceBand::Low
    }
  }

  pub fn badge(self) -> &'static str {
    match self {
      ConfidenceBand::High => "High confidence",
      ConfidenceBand::Medium => "Medium confidence",
      ConfidenceBand::Low => "Low confidence",
    }
  }
}

pub fn guidance(label: Label, band: ConfidenceBand) -> &'static str {
  match (label, band) {
    (Label::Abnormal, ConfidenceBand::High) => {
      "High likelihood of positive finding. Further evaluation is recommended."
    }
    (Label::Abnormal, ConfidenceBand::Medium) => {
      "A positive finding is possible. Consider additional review."
    }
    (Label::Abnormal, ConfidenceBand::Low) => {
      "Classified as positive, but confidence is low. Re-evaluation with clinical context is advised."
    }
    (Label::Normal, ConfidenceBand::High) => {
      "High likelihood of normal. Consider follow-up as appropriate to the clinical context."
    }
    (Label::Normal, ConfidenceBand::Medium) => {
      "Near the decision threshold. Interpret together with clinical findings."
    }
    (Label::Normal, ConfidenceBand::Low) => {
      "Classified as normal, but confidence is low. Reassessment may be considered if clinically indicated."
    }
  }
}

/// 一次分类的完整报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub source: String,
  #[serde(flatten)]
  pub result: PredictionResult,
  pub band: ConfidenceBand,
  pub badge: &'static str,
  pub guidance: &'static str,
  pub timestamp: DateTime<Utc>,
}

impl Report {
  pub fn new(frame: &ImageFrame, result: &PredictionResult) -> Self {
    let band = ConfidenceBand::of(result.confidence);
    Self {
      source: frame.origin.clone(),
      result: *result,
      band,
      badge: band.badge(),
      guidance: guidance(result.label, band),
      timestamp: Utc::now(),
    }
  }

  /// 分数条的百分比
  pub fn score_percent(&self) -> u32 {
    (self.result.score * 100.0).round() as u32
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::DynamicImage;

  #[test]
  fn band_edges() {
    assert_eq!(ConfidenceBand::of(0.75), ConfidenceBand::High);
    assert_eq!(ConfidenceBand::of(0.7499), ConfidenceBand::Medium);
    assert_eq!(ConfidenceBand::of(0.5), ConfidenceBand::Medium);
    assert_eq!(ConfidenceBand::of(0.4999), ConfidenceBand::Low);
    assert_eq!(ConfidenceBand::of(0.0), ConfidenceBand::Low);
  }

  #[test]
  fn report_carries_presentation_text() {
    let frame = ImageFrame::new(DynamicImage::new_rgb8(1, 1), "a.png");
    let result = PredictionResult {
      label: Label::Normal,
      confidence: 0.6,
      score: 0.4,
      raw_score: 0.159,
    };
    let report = Report::new(&frame, &result);
    assert_eq!(report.band, ConfidenceBand::Medium);
    assert_eq!(report.badge, "Medium confidence");
    assert!(report.guidance.starts_with("Near the decision threshold"));
    assert_eq!(report.score_percent(), 40);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["source"], "a.png");
    assert_eq!(json["label"], "Normal");
    assert_eq!(json["band"], "Medium");
    assert!(json.get("rawScore").is_some());
    assert!(json.get("timestamp").is_some());
  }
}
