// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/preprocess.rs - 图像归一化
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
use tracing::debug;

use crate::{
  config::{Configuration, INPUT_SIZE},
  frame::{InputTensor, RGB_CHANNELS},
};

#[derive(Error, Debug)]
pub enum NormalizeError {
  #[error("图像通道数不足: 期望至少 3 个, 实际 {0} 个")]
  InvalidImage(u8),
  #[error("图像尺寸无效: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("张量构建失败: {0}")]
  Tensor(#[from] crate::frame::TensorLengthError),
}

/// 将已解码的图像转换为模型输入张量 (1, 224, 224, 3)
pub fn normalize(image: &DynamicImage, config: &Configuration) -> Result<InputTensor, NormalizeError> {
  let color = image.color();
  let channels = color.channel_count();
  if (channels as usize) < RGB_CHANNELS {
    return Err(NormalizeError::InvalidImage(channels));
  }

  let (width, height) = (image.width(), image.height());
  if width == 0 || height == 0 {
    return Err(NormalizeError::EmptyImage(width, height));
  }

  let pixels = rgb_pixels(image);
  let size = INPUT_SIZE as usize;
  let mut data = resize_bilinear(&pixels, width as usize, height as usize, size, size);

  if config.channel_reversed {
    for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
      pixel.swap(0, 2);
    }
  }

  if config.scale_to_unit {
    for v in data.iter_mut() {
      *v /= 255.0;
    }
  }

  debug!(
    "归一化完成: {}x{} -> {}x{}, div255={}, bgr={}",
    width, height, size, size, config.scale_to_unit, config.channel_reversed
  );

  Ok(InputTensor::try_from(data)?)
}

/// 以 0..255 范围的 f32 展开 RGB 像素，丢弃 alpha 通道
fn rgb_pixels(image: &DynamicImage) -> Vec<f32> {
  let color = image.color();
  let eight_bit = color.bits_per_pixel() == 8 * color.channel_count() as u16;
  if eight_bit {
    image.to_rgb8().into_raw().into_iter().map(f32::from).collect()
  } else {
    image
      .to_rgb32f()
      .into_raw()
      .into_iter()
      .map(|v| v * 255.0)
      .collect()
  }
}

/// HWC 三通道双线性缩放，不对齐角点，不使用半像素中心：
/// 源坐标 = 目标坐标 × (输入尺寸 / 输出尺寸)
pub fn resize_bilinear(
  src: &[f32],
  src_w: usize,
  src_h: usize,
  dst_w: usize,
  dst_h: usize,
) -> Vec<f32> {
  let scale_y = src_h as f32 / dst_h as f32;
  let scale_x = src_w as f32 / dst_w as f32;

  // 每列的插值参数只需计算一次
  let columns: Vec<(usize, usize, f32)> = (0..dst_w)
    .map(|x| interpolation_point(x, scale_x, src_w))
    .collect();

  let mut out = vec![0.0f32; dst_h * dst_w * RGB_CHANNELS];
  for y in 0..dst_h {
    let (y0, y1, fy) = interpolation_point(y, scale_y, src_h);
    let top = &src[y0 * src_w * RGB_CHANNELS..(y0 + 1) * src_w * RGB_CHANNELS];
    let bottom = &src[y1 * src_w * RGB_CHANNELS..(y1 + 1) * src_w * RGB_CHANNELS];

    for (x, &(x0, x1, fx)) in columns.iter().enumerate() {
      let dst = (y * dst_w + x) * RGB_CHANNELS;
      for c in 0..RGB_CHANNELS {
        let tl = top[x0 * RGB_CHANNELS + c];
        let tr = top[x1 * RGB_CHANNELS + c];
        let bl = bottom[x0 * RGB_CHANNELS + c];
        let br = bottom[x1 * RGB_CHANNELS + c];
        let t = tl + (tr - tl) * fx;
        let b = bl + (br - bl) * fx;
        out[dst + c] = t + (b - t) * fy;
      }
    }
  }
  out
}

fn interpolation_point(dst: usize, scale: f32, src_len: usize) -> (usize, usize, f32) {
  let pos = dst as f32 * scale;
  let lo = (pos.floor() as usize).min(src_len - 1);
  let hi = (lo + 1).min(src_len - 1);
  (lo, hi, pos - lo as f32)
}
