// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/decision.rs - 校准与判定
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

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{CALIBRATION_HIGH, CALIBRATION_LOW};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
  Normal,
  Abnormal,
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Label::Normal => write!(f, "Normal"),
      Label::Abnormal => write!(f, "Abnormal"),
    }
  }
}

/// 一次预测的最终结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
  pub label: Label,
  /// 对所给标签方向的置信度
  pub confidence: f32,
  /// 校准后的阳性分数
  pub score: f32,
  pub raw_score: f32,
}

pub fn clamp01(v: f32) -> f32 {
  v.max(0.0).min(1.0)
}

/// 两点线性校准：`low` 映射为 0，`high` 映射为 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
  low: f32,
  high: f32,
}

impl Default for Calibration {
  fn default() -> Self {
    Self {
      low: CALIBRATION_LOW,
      high: CALIBRATION_HIGH,
    }
  }
}

impl Calibration {
  /// `high` 必须大于 `low`
  pub fn new(low: f32, high: f32) -> Option<Self> {
    (low.is_finite() && high.is_finite() && high > low).then_some(Self { low, high })
  }

  pub fn low(&self) -> f32 {
    self.low
  }

  pub fn high(&self) -> f32 {
    self.high
  }

  pub fn score(&self, raw_score: f32) -> f32 {
    clamp01((raw_score - self.low) / (self.high - self.low))
  }

  pub fn decide(&self, raw_score: f32, threshold: f32) -> PredictionResult {
    let label = if raw_score > threshold {
      Label::Abnormal
    } else {
      Label::Normal
    };
    let score = self.score(raw_score);
    let confidence = match label {
      Label::Abnormal => score,
      Label::Normal => 1.0 - score,
    };

    PredictionResult {
      label,
      confidence,
      score,
      raw_score,
    }
  }
}
