// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/model/loader.rs - 模型加载与缓存
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
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use super::descriptor::{DescriptorError, ModelDescriptor, ModelFormat};
use super::graph::{GraphError, GraphPredictor};
use super::layers::{LayersError, LayersPredictor};
use super::source::{ArtifactSource, SourceError, UrlSource};
use super::weights::{NamedWeights, WeightsError};
use super::{Predict, PredictError, Predictor};
use crate::frame::InputTensor;
use crate::resolve::RawOutput;

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("无法获取 {url}: {source}")]
  Fetch {
    url: Url,
    #[source]
    source: SourceError,
  },
  #[error("描述文件错误: {0}")]
  Descriptor(#[source] DescriptorError),
  #[error("未知的模型格式")]
  UnknownModelFormat,
  #[error("层序列模型缺少拓扑结构")]
  MissingTopology,
  #[error("无效的相对路径: {0}")]
  InvalidPath(#[from] url::ParseError),
  #[error("权重解码失败: {0}")]
  Weights(#[from] WeightsError),
  #[error("层序列模型编译失败: {0}")]
  Layers(#[from] LayersError),
  #[error("计算图模型构建失败: {0}")]
  Graph(#[from] GraphError),
}

impl From<DescriptorError> for LoadError {
  fn from(err: DescriptorError) -> Self {
    match err {
      DescriptorError::UnknownModelFormat => LoadError::UnknownModelFormat,
      other => LoadError::Descriptor(other),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载失败: {0}")]
  Load(#[from] LoadError),
  #[error("模型执行失败: {0}")]
  Predict(#[from] PredictError),
}

/// 按描述文件位置加载模型，成功后缓存实例
///
/// 并发调用 [`ModelLoader::load`] 会等待同一次加载；加载失败不会被缓存，下一次调用重新获取。
pub struct ModelLoader<S = UrlSource> {
  location: Url,
  source: S,
  predictor: OnceCell<Predictor>,
}

impl ModelLoader<UrlSource> {
  pub fn from_location(location: Url) -> Self {
    Self::new(location, UrlSource::new())
  }
}

impl<S: ArtifactSource> ModelLoader<S> {
  pub fn new(location: Url, source: S) -> Self {
    Self {
      location,
      source,
      predictor: OnceCell::new(),
    }
  }

  pub fn location(&self) -> &Url {
    &self.location
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// 已缓存的实例，不触发加载
  pub fn loaded(&self) -> Option<&Predictor> {
    self.predictor.get()
  }

  pub async fn load(&self) -> Result<&Predictor, LoadError> {
    self
      .predictor
      .get_or_try_init(|| self.instantiate())
      .await
  }

  pub async fn predict(&self, input: InputTensor) -> Result<RawOutput, ModelError> {
    let predictor = self.load().await?;
    Ok(predictor.execute(input)?)
  }

  async fn instantiate(&self) -> Result<Predictor, LoadError> {
    info!("加载模型描述文件: {}", self.location);
    let bytes = self.fetch(&self.location).await?;
    let descriptor = ModelDescriptor::from_slice(&bytes)?;
    let format = descriptor.detect_format()?;
    info!("模型格式: {}", format);
    if let Some(by) = descriptor.converted_by.as_deref().or(descriptor.generated_by.as_deref()) {
      debug!("模型转换工具: {}", by);
    }

    let predictor = match format {
      ModelFormat::Graph => {
        let url = self.location.join(descriptor.graph_file())?;
        let graph = self.fetch(&url).await?;
        Predictor::Graph(GraphPredictor::from_bytes(
          &graph,
          descriptor.signature_names(),
        )?)
      }
      ModelFormat::Layers => {
        let topology = descriptor
          .model_topology
          .as_ref()
          .ok_or(LoadError::MissingTopology)?;
        let weights = self.fetch_weights(&descriptor).await?;
        Predictor::Layers(LayersPredictor::compile(topology, &weights)?)
      }
    };

    info!("模型加载完成: {}", predictor.format());
    Ok(predictor)
  }

  /// 每组分片按清单顺序拼接后解码
  async fn fetch_weights(&self, descriptor: &ModelDescriptor) -> Result<NamedWeights, LoadError> {
    let mut weights = NamedWeights::new();
    for group in &descriptor.weights_manifest {
      let mut buffer = Vec::new();
      for path in &group.paths {
        let url = self.location.join(path)?;
        let shard = self.fetch(&url).await?;
        debug!("权重分片 {}: {} 字节", path, shard.len());
        buffer.extend_from_slice(&shard);
      }
      weights.decode_group(&group.weights, &buffer)?;
    }
    debug!("共解码权重 {} 个", weights.len());
    Ok(weights)
  }

  async fn fetch(&self, url: &Url) -> Result<Vec<u8>, LoadError> {
    self
      .source
      .fetch(url)
      .await
      .map_err(|source| LoadError::Fetch {
        url: url.clone(),
        source,
      })
  }
}
