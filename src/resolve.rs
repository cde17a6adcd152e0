// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/resolve.rs - 模型输出解析
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

//! # 输出解析
//!
//! 第三方训练的分类器没有严格的输出约定，这里只根据观察到的张量长度与数值和来判断：
//!
//! | 长度 | 数值和     | 解释                           |
//! |------|------------|--------------------------------|
//! | 1    | -          | 已经是阳性概率，不做 sigmoid   |
//! | 2    | ≈ 1        | softmax 分布，按通道顺序取值   |
//! | 2    | 其它       | logits，逐个 sigmoid 后取值    |
//! | 其它 | -          | 取第一个值并警告（或按策略报错）|

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ChannelOrder, Configuration, UnexpectedShapePolicy};

/// 判断两通道输出是否已经归一化的容差
pub const SOFTMAX_TOLERANCE: f32 = 1e-3;

/// 单个输出张量
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl OutputTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self { shape, data }
  }

  /// 一维张量
  pub fn flat(data: Vec<f32>) -> Self {
    Self {
      shape: vec![data.len()],
      data,
    }
  }
}

/// 预测器返回的全部输出，仅第一个参与解析
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawOutput {
  pub tensors: Vec<OutputTensor>,
}

impl RawOutput {
  pub fn new(tensors: Vec<OutputTensor>) -> Self {
    Self { tensors }
  }

  pub fn first(&self) -> Option<&OutputTensor> {
    self.tensors.first()
  }
}

impl From<OutputTensor> for RawOutput {
  fn from(tensor: OutputTensor) -> Self {
    Self {
      tensors: vec![tensor],
    }
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum ResolveError {
  #[error("模型没有输出")]
  NoOutput,
  #[error("模型输出为空")]
  EmptyOutput,
  #[error("模型输出长度异常: {0}")]
  UnexpectedOutputShape(usize),
  #[error("模型输出第 {index} 个值不是有限数")]
  NonFiniteOutput { index: usize },
}

/// 参与判定的值必须都是有限数
fn ensure_finite(values: &[f32]) -> Result<(), ResolveError> {
  match values.iter().position(|v| !v.is_finite()) {
    Some(index) => Err(ResolveError::NonFiniteOutput { index }),
    None => Ok(()),
  }
}

/// 根据形状与数值和判断出的输出类型
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
  /// 单通道，`as_sigmoid` 仅用于诊断
  Single { value: f32, as_sigmoid: f32 },
  /// 两通道且和约为 1
  Softmax { p0: f32, p1: f32 },
  /// 两通道原始 logits 及其 sigmoid
  Logits { p0: f32, p1: f32, s0: f32, s1: f32 },
  /// 其它长度
  Unexpected { len: usize, first: f32 },
}

impl Decoded {
  pub fn classify(values: &[f32]) -> Result<Self, ResolveError> {
    match values {
      [] => Err(ResolveError::EmptyOutput),
      &[value] => {
        ensure_finite(values)?;
        Ok(Decoded::Single {
          value,
          as_sigmoid: sigmoid(value),
        })
      }
      &[p0, p1] => {
        ensure_finite(values)?;
        if (p0 + p1 - 1.0).abs() < SOFTMAX_TOLERANCE {
          Ok(Decoded::Softmax { p0, p1 })
        } else {
          Ok(Decoded::Logits {
            p0,
            p1,
            s0: sigmoid(p0),
            s1: sigmoid(p1),
          })
        }
      }
      &[first, ..] => {
        // 回退只用到第一个值
        ensure_finite(&values[..1])?;
        Ok(Decoded::Unexpected {
          len: values.len(),
          first,
        })
      }
    }
  }

  /// 按通道顺序与策略选出原始分数
  pub fn raw_score(
    &self,
    order: ChannelOrder,
    policy: UnexpectedShapePolicy,
  ) -> Result<f32, ResolveError> {
    match *self {
      Decoded::Single { value, .. } => Ok(value),
      Decoded::Softmax { p0, p1 } => Ok(order.select(p0, p1)),
      Decoded::Logits { s0, s1, .. } => Ok(order.select(s0, s1)),
      Decoded::Unexpected { len, first } => match policy {
        UnexpectedShapePolicy::FallbackFirst => Ok(first),
        UnexpectedShapePolicy::Reject => Err(ResolveError::UnexpectedOutputShape(len)),
      },
    }
  }
}

/// 从原始输出中解析出一个原始分数，不做截断
pub fn resolve(raw: &RawOutput, config: &Configuration) -> Result<f32, ResolveError> {
  let tensor = raw.first().ok_or(ResolveError::NoOutput)?;
  let data = &tensor.data;
  debug!(
    "输出形状={:?}, 长度={}, 前 10 个值={:?}",
    tensor.shape,
    data.len(),
    &data[..data.len().min(10)]
  );

  let decoded = Decoded::classify(data)?;
  match decoded {
    Decoded::Single { value, as_sigmoid } => {
      debug!("单通道输出: 原值={}, sigmoid={}", value, as_sigmoid);
    }
    Decoded::Softmax { p0, p1 } => {
      debug!("两通道 softmax: p0={}, p1={}, 和={}", p0, p1, p0 + p1);
    }
    Decoded::Logits { p0, p1, s0, s1 } => {
      debug!(
        "两通道 logits: p0={}, p1={}, 和={}, s0={}, s1={}",
        p0,
        p1,
        p0 + p1,
        s0,
        s1
      );
    }
    Decoded::Unexpected { len, .. } => {
      warn!("输出长度异常: {}, 策略: {}", len, config.unexpected_shape.token());
    }
  }

  let raw_score = decoded.raw_score(config.channel_order, config.unexpected_shape)?;
  debug!(
    "通道顺序 {} 选出原始分数 {}",
    config.channel_order.token(),
    raw_score
  );
  Ok(raw_score)
}

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
