// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/model/weights.rs - 权重分片解码
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

use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn, ShapeError};
use thiserror::Error;
use tracing::{debug, warn};

use super::descriptor::WeightSpec;

const F32_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug)]
pub enum WeightsError {
  #[error("权重 {0} 的数据类型不受支持: {1}")]
  UnsupportedDtype(String, String),
  #[error("权重 {0} 经过量化，不受支持")]
  Quantized(String),
  #[error("权重 {name} 数据不足: 需要 {needed} 字节, 剩余 {available} 字节")]
  Truncated {
    name: String,
    needed: usize,
    available: usize,
  },
  #[error("权重 {name} 的形状过大: {shape:?}")]
  ShapeOverflow { name: String, shape: Vec<usize> },
  #[error("权重形状错误: {0}")]
  ShapeError(#[from] ShapeError),
}

/// 按名称索引的全部权重
#[derive(Debug, Clone, Default)]
pub struct NamedWeights {
  tensors: HashMap<String, ArrayD<f32>>,
}

impl NamedWeights {
  pub fn new() -> Self {
    Self::default()
  }

  /// 解码一组分片拼接后的数据，权重按清单顺序依次排列
  pub fn decode_group(&mut self, specs: &[WeightSpec], buffer: &[u8]) -> Result<(), WeightsError> {
    let mut offset = 0usize;
    for spec in specs {
      if spec.quantization.is_some() {
        return Err(WeightsError::Quantized(spec.name.clone()));
      }
      if spec.dtype != "float32" {
        return Err(WeightsError::UnsupportedDtype(
          spec.name.clone(),
          spec.dtype.clone(),
        ));
      }

      let needed = spec
        .shape
        .iter()
        .try_fold(F32_BYTES, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| WeightsError::ShapeOverflow {
          name: spec.name.clone(),
          shape: spec.shape.clone(),
        })?;
      let available = buffer.len() - offset;
      if needed > available {
        return Err(WeightsError::Truncated {
          name: spec.name.clone(),
          needed,
          available,
        });
      }

      let values: Vec<f32> = buffer[offset..offset + needed]
        .chunks_exact(F32_BYTES)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
      offset += needed;

      let tensor = ArrayD::from_shape_vec(IxDyn(&spec.shape), values)?;
      debug!("权重 {}: 形状 {:?}", spec.name, spec.shape);
      self.tensors.insert(spec.name.clone(), tensor);
    }

    if offset < buffer.len() {
      warn!("权重分片有 {} 字节未使用", buffer.len() - offset);
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.tensors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensors.is_empty()
  }

  pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
    self.tensors.get(name)
  }

  /// 查找 `层名/参数名`，也接受带有前缀作用域的名称
  pub fn find(&self, layer: &str, param: &str) -> Option<&ArrayD<f32>> {
    let exact = format!("{}/{}", layer, param);
    if let Some(tensor) = self.tensors.get(&exact) {
      return Some(tensor);
    }
    let suffix = format!("/{}", exact);
    let mut matches = self
      .tensors
      .iter()
      .filter(|(name, _)| name.ends_with(&suffix));
    let (name, tensor) = matches.next()?;
    if matches.next().is_some() {
      warn!("权重 {} 存在多个匹配, 使用 {}", exact, name);
    }
    Some(tensor)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn spec(name: &str, shape: &[usize]) -> WeightSpec {
    WeightSpec {
      name: name.to_string(),
      shape: shape.to_vec(),
      dtype: "float32".to_string(),
      quantization: None,
    }
  }

  fn bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
  }

  #[test]
  fn decodes_weights_in_manifest_order() {
    let mut weights = NamedWeights::new();
    let buffer = bytes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.5, -0.5]);
    weights
      .decode_group(&[spec("dense/kernel", &[3, 2]), spec("dense/bias", &[2])], &buffer)
      .unwrap();

    assert_eq!(weights.len(), 2);
    let kernel = weights.get("dense/kernel").unwrap();
    assert_eq!(kernel.shape(), &[3, 2]);
    assert_eq!(kernel[[2, 1]], 6.0);
    let bias = weights.find("dense", "bias").unwrap();
    assert_eq!(bias.as_slice().unwrap(), &[0.5, -0.5]);
  }

  #[test]
  fn scoped_names_are_found_by_suffix() {
    let mut weights = NamedWeights::new();
    weights
      .decode_group(&[spec("model/dense/bias", &[1])], &bytes(&[7.0]))
      .unwrap();
    assert_eq!(weights.find("dense", "bias").unwrap()[[0]], 7.0);
    assert!(weights.find("ense", "bias").is_none());
  }

  #[test]
  fn truncated_buffer_is_rejected() {
    let mut weights = NamedWeights::new();
    let err = weights
      .decode_group(&[spec("dense/kernel", &[4])], &bytes(&[1.0, 2.0]))
      .unwrap_err();
    assert!(matches!(
      err,
      WeightsError::Truncated {
        needed: 16,
        available: 8,
        ..
      }
    ));
  }

  #[test]
  fn oversized_shape_is_an_error() {
    let mut weights = NamedWeights::new();
    let err = weights
      .decode_group(&[spec("dense/kernel", &[1 << 62, 8])], &bytes(&[1.0]))
      .unwrap_err();
    assert!(matches!(
      err,
      WeightsError::ShapeOverflow { ref shape, .. } if shape == &[1 << 62, 8]
    ));
    assert!(weights.is_empty());
  }

  #[test]
  fn quantized_and_integer_weights_are_rejected() {
    let mut weights = NamedWeights::new();
    let mut quantized = spec("dense/kernel", &[1]);
    quantized.quantization = Some(serde_json::json!({"dtype": "uint8"}));
    assert!(matches!(
      weights.decode_group(&[quantized], &[0, 0, 0, 0]),
      Err(WeightsError::Quantized(_))
    ));

    let mut integer = spec("dense/kernel", &[1]);
    integer.dtype = "int32".to_string();
    assert!(matches!(
      weights.decode_group(&[integer], &[0, 0, 0, 0]),
      Err(WeightsError::UnsupportedDtype(_, dtype)) if dtype == "int32"
    ));
  }

  #[test]
  fn scalar_weights_have_empty_shape() {
    let mut weights = NamedWeights::new();
    weights
      .decode_group(&[spec("rescaling/scale", &[])], &bytes(&[0.25]))
      .unwrap();
    assert_eq!(weights.get("rescaling/scale").unwrap().ndim(), 0);
  }
}
