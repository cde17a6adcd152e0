// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::ImageFrame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的文件路径: {0}")]
  InvalidPath(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单个图像文件，或目录中的全部图像文件（按文件名排序）
///
/// 无法解码的文件记录警告后跳过。
#[derive(Debug)]
pub struct ImageFileInput {
  paths: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !Self::accepts(url.scheme()) {
      error!(
        "URI 方案不匹配: 期望 '{}' 或 'file', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
    }

    Self::open(url_path(url)?)
  }
}

/// `file:` 与 `image:` 都按本地路径解释，`image:` 允许相对路径
fn url_path(url: &Url) -> Result<PathBuf, ImageFileInputError> {
  let invalid = || ImageFileInputError::InvalidPath(url.to_string());
  if url.scheme() == "file" {
    return url.to_file_path().map_err(|_| invalid());
  }

  let path = urlencoding::decode(url.path()).map_err(|_| invalid())?;
  Ok(PathBuf::from(path.into_owned()))
}

impl ImageFileInput {
  pub fn accepts(scheme: &str) -> bool {
    scheme == Self::SCHEME || scheme == "file"
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let paths = if path.is_dir() {
      let mut paths = Vec::new();
      for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if !entry_path.is_file() {
          continue;
        }
        if ImageFormat::from_path(&entry_path).is_err() {
          debug!("忽略非图像文件: {}", entry_path.display());
          continue;
        }
        paths.push(entry_path);
      }
      paths.sort();
      info!("输入目录 {} 中有 {} 个图像文件", path.display(), paths.len());
      paths
    } else if path.is_file() {
      vec![path.to_path_buf()]
    } else {
      return Err(ImageFileInputError::InvalidPath(path.display().to_string()));
    };

    Ok(Self {
      paths: paths.into_iter(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.paths.len()
  }
}

fn decode(path: &Path) -> Result<DynamicImage, ImageFileInputError> {
  Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

impl Iterator for ImageFileInput {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let path = self.paths.next()?;
      match decode(&path) {
        Ok(image) => {
          debug!(
            "读取图像 {}: {}x{}, {:?}",
            path.display(),
            image.width(),
            image.height(),
            image.color()
          );
          return Some(ImageFrame::new(image, path.display().to_string()));
        }
        Err(e) => warn!("跳过无法解码的文件 {}: {}", path.display(), e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn write_png(path: &Path, w: u32, h: u32) {
    RgbImage::from_pixel(w, h, Rgb([200, 100, 50])).save(path).unwrap();
  }

  #[test]
  fn directory_is_read_in_name_order_skipping_bad_files() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("b.png"), 3, 3);
    write_png(&dir.path().join("a.png"), 5, 2);
    std::fs::write(dir.path().join("c.png"), b"corrupt").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

    let input = ImageFileInput::open(dir.path()).unwrap();
    assert_eq!(input.remaining(), 3);
    let frames: Vec<ImageFrame> = input.collect();
    assert_eq!(frames.len(), 2);
    assert!(frames[0].origin.ends_with("a.png"));
    assert_eq!(frames[0].image.width(), 5);
    assert!(frames[1].origin.ends_with("b.png"));
  }

  #[test]
  fn single_file_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.png");
    write_png(&path, 4, 4);

    let file_url = Url::from_file_path(&path).unwrap();
    let mut input = ImageFileInput::from_url(&file_url).unwrap();
    assert!(input.next().is_some());
    assert!(input.next().is_none());

    let image_url = Url::parse(&format!("image://{}", file_url.path())).unwrap();
    assert_eq!(ImageFileInput::from_url(&image_url).unwrap().count(), 1);
  }

  #[test]
  fn missing_path_and_wrong_scheme() {
    assert!(matches!(
      ImageFileInput::open("/definitely/not/here.png"),
      Err(ImageFileInputError::InvalidPath(_))
    ));
    let url = Url::parse("http://example.org/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch(_))
    ));
  }
}
