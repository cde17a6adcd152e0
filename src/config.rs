// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/config.rs - 运行时配置与分层覆盖
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

//! # 运行时配置
//!
//! 每个配置项独立解析，优先级从高到低：
//! 1. 请求级查询参数（`thr`、`order`、`div255`、`bgr`、`unexpected`）
//! 2. 本地持久化覆盖（JSON 文件）
//! 3. 编译期默认值
//!
//! 格式错误的值会被忽略，继续查找下一层。

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::FromUrl;

/// 模型输入边长
pub const INPUT_SIZE: u32 = 224;
/// 默认判定阈值
pub const THRESHOLD_DEFAULT: f32 = 0.135;
/// 校准下锚点：原始分数在此及以下时 score 为 0
pub const CALIBRATION_LOW: f32 = 0.109233;
/// 校准上锚点：原始分数在此及以上时 score 为 1
pub const CALIBRATION_HIGH: f32 = 0.233867;

/// 二分类输出中阳性（Abnormal）类别所在的通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
  /// `[p_abn, p_norm]`
  PositiveFirst,
  /// `[p_norm, p_abn]`
  #[default]
  PositiveSecond,
}

impl ChannelOrder {
  pub const NORMAL_ABNORMAL: &'static str = "normal_abnormal";
  pub const ABNORMAL_NORMAL: &'static str = "abnormal_normal";

  pub fn from_token(token: &str) -> Option<Self> {
    match token {
      Self::ABNORMAL_NORMAL => Some(ChannelOrder::PositiveFirst),
      Self::NORMAL_ABNORMAL => Some(ChannelOrder::PositiveSecond),
      _ => None,
    }
  }

  pub fn token(self) -> &'static str {
    match self {
      ChannelOrder::PositiveFirst => Self::ABNORMAL_NORMAL,
      ChannelOrder::PositiveSecond => Self::NORMAL_ABNORMAL,
    }
  }

  /// 从两个通道中取出阳性类别对应的那个
  pub fn select<T>(self, first: T, second: T) -> T {
    match self {
      ChannelOrder::PositiveFirst => first,
      ChannelOrder::PositiveSecond => second,
    }
  }
}

/// 输出长度既不是 1 也不是 2 时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnexpectedShapePolicy {
  /// 记录警告并使用第一个值
  #[default]
  FallbackFirst,
  /// 直接报错
  Reject,
}

impl UnexpectedShapePolicy {
  pub fn from_token(token: &str) -> Option<Self> {
    match token {
      "fallback" => Some(UnexpectedShapePolicy::FallbackFirst),
      "reject" => Some(UnexpectedShapePolicy::Reject),
      _ => None,
    }
  }

  pub fn token(self) -> &'static str {
    match self {
      UnexpectedShapePolicy::FallbackFirst => "fallback",
      UnexpectedShapePolicy::Reject => "reject",
    }
  }
}

/// 一次预测所使用的完整配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Configuration {
  pub threshold: f32,
  pub channel_order: ChannelOrder,
  /// 像素值除以 255
  pub scale_to_unit: bool,
  /// RGB 转 BGR
  pub channel_reversed: bool,
  pub unexpected_shape: UnexpectedShapePolicy,
}

impl Default for Configuration {
  fn default() -> Self {
    Self {
      threshold: THRESHOLD_DEFAULT,
      channel_order: ChannelOrder::default(),
      scale_to_unit: true,
      channel_reversed: false,
      unexpected_shape: UnexpectedShapePolicy::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
  Threshold,
  ChannelOrder,
  ScaleToUnit,
  ChannelReversed,
  UnexpectedShape,
}

impl ConfigKey {
  pub const ALL: [ConfigKey; 5] = [
    ConfigKey::Threshold,
    ConfigKey::ChannelOrder,
    ConfigKey::ScaleToUnit,
    ConfigKey::ChannelReversed,
    ConfigKey::UnexpectedShape,
  ];

  /// 查询参数中的键名
  pub fn query_name(self) -> &'static str {
    match self {
      ConfigKey::Threshold => "thr",
      ConfigKey::ChannelOrder => "order",
      ConfigKey::ScaleToUnit => "div255",
      ConfigKey::ChannelReversed => "bgr",
      ConfigKey::UnexpectedShape => "unexpected",
    }
  }

  /// 持久化文件中的键名
  pub fn store_name(self) -> &'static str {
    match self {
      ConfigKey::Threshold => "threshold",
      ConfigKey::ChannelOrder => "order",
      ConfigKey::ScaleToUnit => "div255",
      ConfigKey::ChannelReversed => "bgr",
      ConfigKey::UnexpectedShape => "unexpected_shape",
    }
  }

  pub fn from_store_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|key| key.store_name() == name)
  }

  /// 该值能否被解析器接受
  pub fn accepts(self, raw: &str) -> bool {
    let raw = raw.trim();
    match self {
      ConfigKey::Threshold => parse_threshold(raw).is_some(),
      ConfigKey::ChannelOrder => ChannelOrder::from_token(raw).is_some(),
      ConfigKey::ScaleToUnit | ConfigKey::ChannelReversed => parse_switch(raw).is_some(),
      ConfigKey::UnexpectedShape => UnexpectedShapePolicy::from_token(raw).is_some(),
    }
  }
}

/// 一层配置覆盖来源
pub trait OverrideSource {
  fn name(&self) -> &str;
  fn lookup(&self, key: ConfigKey) -> Option<String>;
}

/// 请求级查询参数覆盖，例如 `?thr=0.2&order=abnormal_normal`
#[derive(Debug, Clone, Default)]
pub struct QueryOverrides {
  pairs: Vec<(String, String)>,
}

impl QueryOverrides {
  pub fn parse(query: &str) -> Self {
    let query = query.strip_prefix('?').unwrap_or(query);
    let pairs = url::form_urlencoded::parse(query.as_bytes())
      .into_owned()
      .collect();
    Self { pairs }
  }

  /// 同名参数只取第一个
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .pairs
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }
}

impl FromUrl for QueryOverrides {
  type Error = Infallible;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(Self::parse(url.query().unwrap_or_default()))
  }
}

impl OverrideSource for QueryOverrides {
  fn name(&self) -> &str {
    "query"
  }

  fn lookup(&self, key: ConfigKey) -> Option<String> {
    self.get(key.query_name()).map(str::to_owned)
  }
}

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("持久化文件必须是 JSON 对象: {0}")]
  NotAnObject(String),
}

/// 以 JSON 对象文件保存的本地覆盖
#[derive(Debug, Clone)]
pub struct JsonFileStore {
  path: PathBuf,
  values: Map<String, Value>,
}

impl JsonFileStore {
  /// 空的存储，不读取磁盘
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      values: Map::new(),
    }
  }

  /// 读取持久化文件，文件不存在时视为空
  pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let path = path.into();
    if !path.exists() {
      debug!("持久化覆盖文件不存在: {}", path.display());
      return Ok(Self::new(path));
    }

    let text = std::fs::read_to_string(&path)?;
    let values = match serde_json::from_str::<Value>(&text)? {
      Value::Object(map) => map,
      _ => return Err(StoreError::NotAnObject(path.display().to_string())),
    };
    debug!("读取持久化覆盖 {} 项: {}", values.len(), path.display());

    Ok(Self { path, values })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn get(&self, key: ConfigKey) -> Option<String> {
    match self.values.get(key.store_name())? {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      Value::Bool(b) => Some(b.to_string()),
      _ => None,
    }
  }

  pub fn set(&mut self, key: ConfigKey, value: &str) {
    self
      .values
      .insert(key.store_name().to_string(), Value::String(value.to_string()));
  }

  pub fn remove(&mut self, key: ConfigKey) -> bool {
    self.values.remove(key.store_name()).is_some()
  }

  pub fn entries(&self) -> impl Iterator<Item = (ConfigKey, String)> + '_ {
    ConfigKey::ALL
      .into_iter()
      .filter_map(|key| self.get(key).map(|v| (key, v)))
  }

  pub fn save(&self) -> Result<(), StoreError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&self.values)?;
    std::fs::write(&self.path, text)?;
    debug!("保存持久化覆盖: {}", self.path.display());
    Ok(())
  }
}

impl OverrideSource for JsonFileStore {
  fn name(&self) -> &str {
    "persisted"
  }

  fn lookup(&self, key: ConfigKey) -> Option<String> {
    self.get(key)
  }
}

/// 按优先级逐层解析配置
pub struct ConfigResolver<'a> {
  defaults: Configuration,
  layers: Vec<&'a dyn OverrideSource>,
}

impl Default for ConfigResolver<'_> {
  fn default() -> Self {
    Self::new(Configuration::default())
  }
}

impl<'a> ConfigResolver<'a> {
  pub fn new(defaults: Configuration) -> Self {
    Self {
      defaults,
      layers: Vec::new(),
    }
  }

  /// 追加一层来源，先追加的优先级更高
  pub fn layer(mut self, source: &'a dyn OverrideSource) -> Self {
    self.layers.push(source);
    self
  }

  pub fn resolve(&self) -> Configuration {
    let defaults = &self.defaults;
    Configuration {
      threshold: self
        .pick(ConfigKey::Threshold, parse_threshold)
        .unwrap_or(defaults.threshold),
      channel_order: self
        .pick(ConfigKey::ChannelOrder, ChannelOrder::from_token)
        .unwrap_or(defaults.channel_order),
      scale_to_unit: self
        .pick(ConfigKey::ScaleToUnit, parse_switch)
        .unwrap_or(defaults.scale_to_unit),
      channel_reversed: self
        .pick(ConfigKey::ChannelReversed, parse_switch)
        .unwrap_or(defaults.channel_reversed),
      unexpected_shape: self
        .pick(ConfigKey::UnexpectedShape, UnexpectedShapePolicy::from_token)
        .unwrap_or(defaults.unexpected_shape),
    }
  }

  fn pick<T: std::fmt::Debug>(&self, key: ConfigKey, parse: fn(&str) -> Option<T>) -> Option<T> {
    for layer in &self.layers {
      let Some(raw) = layer.lookup(key) else {
        continue;
      };
      match parse(raw.trim()) {
        Some(value) => {
          debug!("配置 {:?} 来自 {}: {:?}", key, layer.name(), value);
          return Some(value);
        }
        None => warn!("忽略 {} 中格式错误的 {:?}: {:?}", layer.name(), key, raw),
      }
    }
    None
  }
}

fn parse_threshold(raw: &str) -> Option<f32> {
  raw.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn parse_switch(raw: &str) -> Option<bool> {
  match raw.to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_without_layers() {
    let config = ConfigResolver::default().resolve();
    assert_eq!(config, Configuration::default());
    assert_eq!(config.threshold, THRESHOLD_DEFAULT);
    assert_eq!(config.channel_order, ChannelOrder::PositiveSecond);
    assert!(config.scale_to_unit);
    assert!(!config.channel_reversed);
  }

  #[test]
  fn query_beats_persisted() {
    let query = QueryOverrides::parse("?thr=0.2");
    let mut store = JsonFileStore::new("unused.json");
    store.set(ConfigKey::Threshold, "0.3");

    let config = ConfigResolver::default()
      .layer(&query)
      .layer(&store)
      .resolve();
    assert_eq!(config.threshold, 0.2);
  }

  #[test]
  fn persisted_used_when_query_is_missing_or_malformed() {
    let mut store = JsonFileStore::new("unused.json");
    store.set(ConfigKey::Threshold, "0.3");

    let empty = QueryOverrides::parse("");
    let config = ConfigResolver::default()
      .layer(&empty)
      .layer(&store)
      .resolve();
    assert_eq!(config.threshold, 0.3);

    let broken = QueryOverrides::parse("thr=abc");
    let config = ConfigResolver::default()
      .layer(&broken)
      .layer(&store)
      .resolve();
    assert_eq!(config.threshold, 0.3);
  }

  #[test]
  fn malformed_everywhere_falls_back_to_default() {
    let query = QueryOverrides::parse("thr=NaN&order=sideways&bgr=maybe");
    let mut store = JsonFileStore::new("unused.json");
    store.set(ConfigKey::Threshold, "inf");

    let config = ConfigResolver::default()
      .layer(&query)
      .layer(&store)
      .resolve();
    assert_eq!(config, Configuration::default());
  }

  #[test]
  fn keys_resolve_independently() {
    let query = QueryOverrides::parse("thr=0.5");
    let mut store = JsonFileStore::new("unused.json");
    store.set(ConfigKey::ChannelOrder, ChannelOrder::ABNORMAL_NORMAL);

    let config = ConfigResolver::default()
      .layer(&query)
      .layer(&store)
      .resolve();
    assert_eq!(config.threshold, 0.5);
    assert_eq!(config.channel_order, ChannelOrder::PositiveFirst);
    assert!(config.scale_to_unit);
  }

  #[test]
  fn first_query_occurrence_wins() {
    let query = QueryOverrides::parse("order=abnormal_normal&order=normal_abnormal");
    let config = ConfigResolver::default().layer(&query).resolve();
    assert_eq!(config.channel_order, ChannelOrder::PositiveFirst);
  }

  #[test]
  fn switches_and_policy_from_query() {
    let query = QueryOverrides::parse("div255=false&bgr=1&unexpected=reject");
    let config = ConfigResolver::default().layer(&query).resolve();
    assert!(!config.scale_to_unit);
    assert!(config.channel_reversed);
    assert_eq!(config.unexpected_shape, UnexpectedShapePolicy::Reject);
  }

  #[test]
  fn query_from_url() {
    let url = Url::parse("http://localhost:3000/?thr=0.25&order=abnormal_normal").unwrap();
    let query = QueryOverrides::from_url(&url).unwrap();
    assert_eq!(query.get("thr"), Some("0.25"));
    assert_eq!(query.get("order"), Some("abnormal_normal"));
  }

  #[test]
  fn store_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("overrides.json");

    let mut store = JsonFileStore::load(&path).unwrap();
    assert_eq!(store.entries().count(), 0);
    store.set(ConfigKey::Threshold, "0.2");
    store.set(ConfigKey::ChannelReversed, "true");
    store.save().unwrap();

    let mut reloaded = JsonFileStore::load(&path).unwrap();
    assert_eq!(reloaded.get(ConfigKey::Threshold).as_deref(), Some("0.2"));
    assert!(reloaded.remove(ConfigKey::ChannelReversed));
    assert!(!reloaded.remove(ConfigKey::ChannelReversed));
    assert_eq!(reloaded.entries().count(), 1);
  }

  #[test]
  fn store_accepts_json_scalars() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overrides.json");
    std::fs::write(&path, r#"{"threshold": 0.2, "bgr": true}"#).unwrap();

    let store = JsonFileStore::load(&path).unwrap();
    let config = ConfigResolver::default().layer(&store).resolve();
    assert_eq!(config.threshold, 0.2);
    assert!(config.channel_reversed);
  }

  #[test]
  fn key_accepts_only_parseable_values() {
    assert!(ConfigKey::Threshold.accepts(" 0.2 "));
    assert!(!ConfigKey::Threshold.accepts("NaN"));
    assert!(ConfigKey::ChannelOrder.accepts("abnormal_normal"));
    assert!(!ConfigKey::ChannelOrder.accepts("first"));
    assert!(ConfigKey::ChannelReversed.accepts("off"));
    assert!(!ConfigKey::UnexpectedShape.accepts("ignore"));
    assert_eq!(ConfigKey::from_store_name("unexpected_shape"), Some(ConfigKey::UnexpectedShape));
    assert_eq!(ConfigKey::from_store_name("thr"), None);
  }

  #[test]
  fn store_rejects_non_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overrides.json");
    std::fs::write(&path, "[1, 2]").unwrap();
    assert!(matches!(
      JsonFileStore::load(&path),
      Err(StoreError::NotAnObject(_))
    ));
  }
}
