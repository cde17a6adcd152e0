// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;

use crate::frame::InputTensor;
use crate::resolve::RawOutput;

pub mod descriptor;
pub mod graph;
pub mod layers;
mod loader;
pub mod source;
pub mod weights;

pub use self::descriptor::{ModelDescriptor, ModelFormat};
pub use self::graph::{GraphError, GraphPredictor};
pub use self::layers::{LayersError, LayersPredictor};
pub use self::loader::{LoadError, ModelError, ModelLoader};
pub use self::source::{ArtifactSource, SourceError, UrlSource};

#[derive(Error, Debug)]
pub enum PredictError {
  #[error("计算图模型错误: {0}")]
  Graph(#[from] GraphError),
  #[error("层序列模型错误: {0}")]
  Layers(#[from] LayersError),
}

/// 对一个输入张量执行一次前向计算
///
/// 输入张量按值传入，无论成功与否都在本次调用结束时释放。
pub trait Predict: Send + Sync {
  fn execute(&self, input: InputTensor) -> Result<RawOutput, PredictError>;
}

/// 已加载的模型实例
#[derive(Debug)]
pub enum Predictor {
  Graph(GraphPredictor),
  Layers(LayersPredictor),
}

impl Predictor {
  pub fn format(&self) -> ModelFormat {
    match self {
      Predictor::Graph(_) => ModelFormat::Graph,
      Predictor::Layers(_) => ModelFormat::Layers,
    }
  }
}

impl Predict for Predictor {
  fn execute(&self, input: InputTensor) -> Result<RawOutput, PredictError> {
    match self {
      Predictor::Graph(graph) => graph.execute(input),
      Predictor::Layers(layers) => layers.execute(input),
    }
  }
}
