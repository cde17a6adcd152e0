// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// tests/pipeline.rs - 从磁盘模型到 JSON 报告的完整流程
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

use std::path::Path;

use dimple::{
  Classifier, Configuration, FromUrl, Label,
  input::InputWrapper,
  model::{ModelLoader, source::parse_location},
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};
use image::{GrayImage, Luma, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use serde_json::Value;
use url::Url;

/// 输出为三个通道均值的单通道模型，即 `mean(rgb) / 255`
fn write_mean_model(dir: &Path) -> Url {
  let descriptor = r#"{
    "format": "layers-model",
    "generatedBy": "keras v2.15.0",
    "convertedBy": "TensorFlow.js Converter v4.17.0",
    "modelTopology": {"class_name": "Sequential", "config": {"name": "sequential", "layers": [
      {"class_name": "InputLayer", "config": {"name": "input", "batch_input_shape": [null, 224, 224, 3]}},
      {"class_name": "GlobalAveragePooling2D", "config": {"name": "gap", "data_format": "channels_last"}},
      {"class_name": "Dense", "config": {"name": "mean", "units": 1, "activation": "linear", "use_bias": false}}
    ]}},
    "weightsManifest": [{"paths": ["group1-shard1of1.bin"], "weights": [
      {"name": "mean/kernel", "shape": [3, 1], "dtype": "float32"}
    ]}]
  }"#;
  std::fs::write(dir.join("model.json"), descriptor).unwrap();
  let third = 1.0f32 / 3.0;
  let bytes: Vec<u8> = [third, third, third]
    .iter()
    .flat_map(|v| v.to_le_bytes())
    .collect();
  std::fs::write(dir.join("group1-shard1of1.bin"), bytes).unwrap();

  parse_location(&dir.join("model.json").display().to_string()).unwrap()
}

fn gray_rgb(path: &Path, level: u8) {
  RgbImage::from_pixel(40, 30, Rgb([level, level, level]))
    .save(path)
    .unwrap();
}

#[tokio::test]
async fn directory_of_photos_to_json_report() {
  let model_dir = tempfile::tempdir().unwrap();
  let photos = tempfile::tempdir().unwrap();
  let reports = tempfile::tempdir().unwrap();

  // 51 / 255 = 0.2 高于阈值，20 / 255 ≈ 0.078 低于阈值
  gray_rgb(&photos.path().join("a.png"), 51);
  gray_rgb(&photos.path().join("b.png"), 20);
  GrayImage::from_pixel(8, 8, Luma([128]))
    .save(photos.path().join("c.png"))
    .unwrap();

  let classifier = Classifier::new(ModelLoader::from_location(write_mean_model(
    model_dir.path(),
  )));
  let input = InputWrapper::from_url(&Url::from_file_path(photos.path()).unwrap()).unwrap();
  let report_path = reports.path().join("run.jsonl");
  let output =
    OutputWrapper::from_url(&Url::parse(&format!("json://{}", report_path.display())).unwrap())
      .unwrap();

  ContinuousTask::default()
    .run_task(input, &classifier, &Configuration::default(), output)
    .await
    .unwrap();

  let lines: Vec<Value> = std::fs::read_to_string(&report_path)
    .unwrap()
    .lines()
    .map(|line| serde_json::from_str(line).unwrap())
    .collect();
  assert_eq!(lines.len(), 2);

  assert!(lines[0]["source"].as_str().unwrap().ends_with("a.png"));
  assert_eq!(lines[0]["label"], "Abnormal");
  let raw = lines[0]["rawScore"].as_f64().unwrap();
  assert!((raw - 0.2).abs() < 1e-4, "raw={raw}");

  assert!(lines[1]["source"].as_str().unwrap().ends_with("b.png"));
  assert_eq!(lines[1]["label"], "Normal");
  assert_eq!(lines[1]["score"], 0.0);
  assert_eq!(lines[1]["confidence"], 1.0);
  assert_eq!(lines[1]["badge"], "High confidence");
}

#[tokio::test]
async fn one_shot_uses_the_first_photo() {
  let model_dir = tempfile::tempdir().unwrap();
  let photos = tempfile::tempdir().unwrap();
  let reports = tempfile::tempdir().unwrap();
  gray_rgb(&photos.path().join("only.jpg"), 20);

  let classifier = Classifier::new(ModelLoader::from_location(write_mean_model(
    model_dir.path(),
  )));
  let input = InputWrapper::from_url(&Url::from_file_path(photos.path()).unwrap()).unwrap();
  let report_path = reports.path().join("one.jsonl");
  let output =
    OutputWrapper::from_url(&Url::parse(&format!("json://{}", report_path.display())).unwrap())
      .unwrap();

  OneShotTask
    .run_task(input, &classifier, &Configuration::default(), output)
    .await
    .unwrap();

  let text = std::fs::read_to_string(&report_path).unwrap();
  let report: Value = serde_json::from_str(text.trim()).unwrap();
  assert_eq!(report["label"], "Normal");
  assert!(report.get("guidance").is_some());
  assert!(report.get("timestamp").is_some());
}

#[tokio::test]
async fn classify_single_image_directly() {
  let model_dir = tempfile::tempdir().unwrap();
  let classifier = Classifier::new(ModelLoader::from_location(write_mean_model(
    model_dir.path(),
  )));

  let image = image::DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([51, 51, 51])));
  let result = classifier
    .classify(&image, &Configuration::default())
    .await
    .unwrap();
  assert_eq!(result.label, Label::Abnormal);

  let gray = image::DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([9])));
  assert!(matches!(
    classifier.classify(&gray, &Configuration::default()).await,
    Err(dimple::ClassifyError::InvalidImage(_))
  ));
}
