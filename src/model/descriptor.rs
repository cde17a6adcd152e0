// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/model/descriptor.rs - 模型描述文件
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

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// 计算图文件的默认名称
pub const DEFAULT_GRAPH_FILE: &str = "model.onnx";

#[derive(Error, Debug)]
pub enum DescriptorError {
  #[error("描述文件解析失败: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("未知的模型格式")]
  UnknownModelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
  /// 不可变计算图，具有命名的输入输出
  Graph,
  /// 有序的命名层序列
  Layers,
}

impl std::fmt::Display for ModelFormat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ModelFormat::Graph => write!(f, "graph"),
      ModelFormat::Layers => write!(f, "layers"),
    }
  }
}

/// 权重清单中的一组分片
#[derive(Debug, Clone, Deserialize)]
pub struct WeightsGroup {
  pub paths: Vec<String>,
  pub weights: Vec<WeightSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightSpec {
  pub name: String,
  #[serde(default)]
  pub shape: Vec<usize>,
  #[serde(default = "default_dtype")]
  pub dtype: String,
  #[serde(default)]
  pub quantization: Option<Value>,
}

fn default_dtype() -> String {
  "float32".to_string()
}

/// 计算图签名，保持原始键顺序
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphSignature {
  #[serde(default)]
  pub inputs: Map<String, Value>,
  #[serde(default)]
  pub outputs: Map<String, Value>,
}

/// 签名中的第一对输入输出名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureNames {
  pub input: String,
  pub output: String,
}

impl GraphSignature {
  pub fn first_names(&self) -> Option<SignatureNames> {
    let input = self.inputs.keys().next()?;
    let output = self.outputs.keys().next()?;
    Some(SignatureNames {
      input: input.clone(),
      output: output.clone(),
    })
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
  #[serde(default)]
  pub format: Option<String>,
  #[serde(default)]
  pub model_topology: Option<Value>,
  #[serde(default)]
  pub weights_manifest: Vec<WeightsGroup>,
  #[serde(default)]
  pub signature: Option<GraphSignature>,
  #[serde(default)]
  pub graph_file: Option<String>,
  #[serde(default)]
  pub generated_by: Option<String>,
  #[serde(default)]
  pub converted_by: Option<String>,
}

impl ModelDescriptor {
  pub fn from_slice(bytes: &[u8]) -> Result<Self, DescriptorError> {
    Ok(serde_json::from_slice(bytes)?)
  }

  /// `format` 包含 "graph" 为计算图；包含 "layers" 或存在拓扑为层序列
  pub fn detect_format(&self) -> Result<ModelFormat, DescriptorError> {
    let format = self.format.as_deref().unwrap_or_default().to_lowercase();
    if format.contains("graph") {
      return Ok(ModelFormat::Graph);
    }
    if format.contains("layers") {
      return Ok(ModelFormat::Layers);
    }
    if self.model_topology.is_some() {
      return Ok(ModelFormat::Layers);
    }
    Err(DescriptorError::UnknownModelFormat)
  }

  pub fn graph_file(&self) -> &str {
    self.graph_file.as_deref().unwrap_or(DEFAULT_GRAPH_FILE)
  }

  pub fn signature_names(&self) -> Option<SignatureNames> {
    self.signature.as_ref().and_then(GraphSignature::first_names)
  }
}
