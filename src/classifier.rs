// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/classifier.rs - 单张图像分类
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

use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::Configuration,
  decision::{Calibration, PredictionResult},
  model::{ArtifactSource, LoadError, ModelError, ModelLoader, Predictor, UrlSource},
  preprocess::{NormalizeError, normalize},
  resolve::{ResolveError, resolve},
};

#[derive(Error, Debug)]
pub enum ClassifyError {
  #[error("图像无效: {0}")]
  InvalidImage(#[from] NormalizeError),
  #[error("{0}")]
  Model(#[from] ModelError),
  #[error("输出解析失败: {0}")]
  Resolve(#[from] ResolveError),
}

impl From<LoadError> for ClassifyError {
  fn from(err: LoadError) -> Self {
    ClassifyError::Model(ModelError::Load(err))
  }
}

/// 归一化、推理、解析输出、校准判定的完整流程
pub struct Classifier<S = UrlSource> {
  loader: ModelLoader<S>,
  calibration: Calibration,
}

impl<S: ArtifactSource> Classifier<S> {
  pub fn new(loader: ModelLoader<S>) -> Self {
    Self {
      loader,
      calibration: Calibration::default(),
    }
  }

  pub fn with_calibration(mut self, calibration: Calibration) -> Self {
    self.calibration = calibration;
    self
  }

  pub fn loader(&self) -> &ModelLoader<S> {
    &self.loader
  }

  pub fn calibration(&self) -> Calibration {
    self.calibration
  }

  /// 预先加载模型，可重复调用
  pub async fn load(&self) -> Result<&Predictor, ClassifyError> {
    Ok(self.loader.load().await?)
  }

  pub async fn classify(
    &self,
    image: &DynamicImage,
    config: &Configuration,
  ) -> Result<PredictionResult, ClassifyError> {
    let tensor = normalize(image, config)?;
    let (lo, hi) = tensor.value_range();
    debug!("输入张量取值范围: [{}, {}]", lo, hi);

    let raw = self.loader.predict(tensor).await?;
    let raw_score = resolve(&raw, config)?;
    let result = self.calibration.decide(raw_score, config.threshold);
    info!(
      "分类结果: {}, 置信度 {:.3}, 分数 {:.3}, 原始分数 {:.4}, 阈值 {}",
      result.label, result.confidence, result.score, result.raw_score, config.threshold
    );

    Ok(result)
  }
}
