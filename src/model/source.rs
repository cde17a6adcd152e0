// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/model/source.rs - 模型文件获取
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

use std::future::Future;
use std::path::Path;

use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum SourceError {
  #[error("不支持的 URI 方案: {0}")]
  UnsupportedScheme(String),
  #[error("无效的文件路径: {0}")]
  InvalidPath(Url),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "http_source")]
  #[error("HTTP 错误: {0}")]
  HttpError(#[from] reqwest::Error),
}

/// 按 URL 获取模型相关文件（描述文件、权重分片、计算图）
pub trait ArtifactSource: Send + Sync {
  fn fetch(&self, url: &Url) -> impl Future<Output = Result<Vec<u8>, SourceError>> + Send;
}

/// 支持 `file`，以及启用 `http_source` 时的 `http`/`https`
#[derive(Debug, Clone, Default)]
pub struct UrlSource {
  #[cfg(feature = "http_source")]
  client: reqwest::Client,
}

impl UrlSource {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ArtifactSource for UrlSource {
  async fn fetch(&self, url: &Url) -> Result<Vec<u8>, SourceError> {
    debug!("获取文件: {}", url);
    match url.scheme() {
      "file" => {
        let path = url
          .to_file_path()
          .map_err(|_| SourceError::InvalidPath(url.clone()))?;
        Ok(tokio::fs::read(path).await?)
      }
      #[cfg(feature = "http_source")]
      "http" | "https" => {
        let response = self
          .client
          .get(url.as_str())
          .send()
          .await?
          .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
      }
      other => Err(SourceError::UnsupportedScheme(other.to_string())),
    }
  }
}

/// 将命令行给出的位置解析为 URL，非 URL 视为本地路径
pub fn parse_location(location: &str) -> Result<Url, String> {
  // Windows 盘符会被解析成单字母方案
  if let Ok(url) = Url::parse(location)
    && url.scheme().len() > 1
  {
    return Ok(url);
  }

  let path = std::path::absolute(Path::new(location))
    .map_err(|e| format!("无法解析路径 {}: {}", location, e))?;
  Url::from_file_path(&path).map_err(|_| format!("无法转换为文件 URL: {}", path.display()))
}
