// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// tests/loading.rs - 模型加载与缓存
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
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use dimple::{
  Classifier, Configuration, Label,
  config::ChannelOrder,
  model::{ArtifactSource, LoadError, ModelFormat, ModelLoader, SourceError},
};
use image::{DynamicImage, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use url::Url;

/// 每次获取前让出一次执行权，便于观察并发加载
#[derive(Default)]
struct CountingSource {
  files: Mutex<HashMap<String, Vec<u8>>>,
  fetches: AtomicUsize,
}

impl CountingSource {
  fn put(&self, name: &str, bytes: impl Into<Vec<u8>>) {
    self
      .files
      .lock()
      .unwrap()
      .insert(format!("memory:///m/{}", name), bytes.into());
  }

  fn fetches(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }
}

impl ArtifactSource for CountingSource {
  async fn fetch(&self, url: &Url) -> Result<Vec<u8>, SourceError> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    tokio::task::yield_now().await;
    let found = self.files.lock().unwrap().get(url.as_str()).cloned();
    found.ok_or_else(|| {
      SourceError::IoError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        url.to_string(),
      ))
    })
  }
}

fn location() -> Url {
  Url::parse("memory:///m/model.json").unwrap()
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
  values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// 全局平均池化后接两通道 softmax，输出只由偏置决定
fn two_channel_source(bias: [f32; 2]) -> CountingSource {
  let source = CountingSource::default();
  source.put(
    "model.json",
    r#"{
      "format": "layers-model",
      "modelTopology": {"class_name": "Sequential", "config": {"layers": [
        {"class_name": "GlobalAveragePooling2D", "config": {"name": "gap"}},
        {"class_name": "Dense", "config": {"name": "head", "units": 2, "activation": "softmax"}}
      ]}},
      "weightsManifest": [{"paths": ["head.bin"], "weights": [
        {"name": "head/kernel", "shape": [3, 2], "dtype": "float32"},
        {"name": "head/bias", "shape": [2], "dtype": "float32"}
      ]}]
    }"#,
  );
  let mut values = vec![0.0; 6];
  values.extend_from_slice(&bias);
  source.put("head.bin", f32_bytes(&values));
  source
}

#[tokio::test]
async fn concurrent_loads_fetch_once() {
  let loader = ModelLoader::new(location(), two_channel_source([0.0, 0.0]));

  let (a, b) = tokio::join!(loader.load(), loader.load());
  let (a, b) = (a.unwrap(), b.unwrap());
  assert!(std::ptr::eq(a, b));
  assert_eq!(a.format(), ModelFormat::Layers);
  assert_eq!(loader.source().fetches(), 2);

  loader.load().await.unwrap();
  assert_eq!(loader.source().fetches(), 2);
}

#[tokio::test]
async fn failed_load_is_retried() {
  let source = CountingSource::default();
  source.put("model.json", r#"{"weightsManifest": []}"#);
  let loader = ModelLoader::new(location(), source);

  assert!(matches!(
    loader.load().await,
    Err(LoadError::UnknownModelFormat)
  ));
  assert!(loader.loaded().is_none());

  let fixed = two_channel_source([0.0, 0.0]);
  for (name, bytes) in fixed.files.into_inner().unwrap() {
    loader.source().files.lock().unwrap().insert(name, bytes);
  }
  assert!(loader.load().await.is_ok());
  assert_eq!(loader.source().fetches(), 3);
}

#[tokio::test]
async fn channel_order_picks_the_positive_probability() {
  // softmax([0, ln 4]) = [0.2, 0.8]
  let classifier = Classifier::new(ModelLoader::new(
    location(),
    two_channel_source([0.0, 4f32.ln()]),
  ));
  let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 48, Rgb([90, 60, 30])));

  let second = classifier
    .classify(&image, &Configuration::default())
    .await
    .unwrap();
  assert!((second.raw_score - 0.8).abs() < 1e-5);
  assert_eq!(second.label, Label::Abnormal);
  assert_eq!(second.score, 1.0);

  let first_config = Configuration {
    channel_order: ChannelOrder::PositiveFirst,
    ..Configuration::default()
  };
  let first = classifier.classify(&image, &first_config).await.unwrap();
  assert!((first.raw_score - 0.2).abs() < 1e-5);
  assert_eq!(first.label, Label::Abnormal);

  let strict = Configuration {
    threshold: 0.9,
    ..Configuration::default()
  };
  let normal = classifier.classify(&image, &strict).await.unwrap();
  assert_eq!(normal.label, Label::Normal);
  assert_eq!(normal.confidence, 0.0);

  assert_eq!(classifier.loader().source().fetches(), 2);
}

#[tokio::test]
async fn custom_calibration_rescales_the_score() {
  let calibration = dimple::Calibration::new(0.4, 1.2).unwrap();
  let classifier = Classifier::new(ModelLoader::new(
    location(),
    two_channel_source([0.0, 4f32.ln()]),
  ))
  .with_calibration(calibration);
  assert_eq!(classifier.calibration(), calibration);

  let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 0, 0])));
  let result = classifier
    .classify(&image, &Configuration::default())
    .await
    .unwrap();
  // (0.8 - 0.4) / 0.8
  assert!((result.score - 0.5).abs() < 1e-5, "score={}", result.score);
  assert_eq!(result.label, Label::Abnormal);
}
