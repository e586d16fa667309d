// 该文件是 Huafeng （画风） 项目的一部分。
// src/resize.rs - 缩放与颜色顺序转换
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

use std::borrow::Cow;

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{ColorOrder, FrameError, PixelBuffer, RGB_CHANNELS, Tensor};

#[derive(Error, Debug)]
pub enum ResizeError {
  #[error("输入无效: {0}")]
  InvalidInput(String),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

/// 按长边预算计算目标尺寸
///
/// 长边缩放到 `long_edge`，短边按同一比例缩放并向下取整。
/// 宽高相等时走宽度分支，两边都等于 `long_edge`。
/// 极端长宽比下短边至少保留 1 像素。
pub fn compute_target_size(width: u32, height: u32, long_edge: u32) -> (u32, u32) {
  let (w, h, budget) = (width as u64, height as u64, long_edge as u64);

  let (target_w, target_h) = if w < h {
    (budget * w / h, budget)
  } else {
    (budget, budget * h / w.max(1))
  };

  (target_w.max(1) as u32, target_h.max(1) as u32)
}

/// 一次完成缩放与通道顺序转换，输出推理用的 CHW 张量
pub fn resize_and_convert(
  buffer: &PixelBuffer,
  target_width: u32,
  target_height: u32,
  src_order: ColorOrder,
  dst_order: ColorOrder,
) -> Result<Tensor, ResizeError> {
  if buffer.is_empty() || buffer.width() == 0 || buffer.height() == 0 {
    return Err(ResizeError::InvalidInput("源图像为空".to_string()));
  }
  if target_width == 0 || target_height == 0 {
    return Err(ResizeError::InvalidInput(format!(
      "目标尺寸无效: {}x{}",
      target_width, target_height
    )));
  }
  if buffer.order() != src_order {
    return Err(ResizeError::InvalidInput(format!(
      "颜色顺序不一致: 缓冲区为 {:?}, 声明为 {:?}",
      buffer.order(),
      src_order
    )));
  }

  let pixels: Cow<'_, [u8]> = if (buffer.width(), buffer.height()) == (target_width, target_height) {
    Cow::Borrowed(buffer.as_bytes())
  } else {
    debug!(
      "缩放 {}x{} -> {}x{}",
      buffer.width(),
      buffer.height(),
      target_width,
      target_height
    );
    let image = RgbImage::from_raw(buffer.width(), buffer.height(), buffer.as_bytes().to_vec())
      .ok_or_else(|| ResizeError::InvalidInput("像素数据与尺寸不符".to_string()))?;
    let resized = image::imageops::resize(&image, target_width, target_height, FilterType::Triangle);
    Cow::Owned(resized.into_raw())
  };

  let plane = target_width as usize * target_height as usize;
  let swap = src_order.needs_swap(dst_order);
  let mut data = vec![0f32; plane * RGB_CHANNELS];

  for (i, pixel) in pixels.chunks_exact(RGB_CHANNELS).enumerate() {
    for c in 0..RGB_CHANNELS {
      let from = if swap { RGB_CHANNELS - 1 - c } else { c };
      data[c * plane + i] = pixel[from] as f32;
    }
  }

  Ok(Tensor::new(
    target_width,
    target_height,
    RGB_CHANNELS,
    dst_order,
    data,
  )?)
}

/// 将推理输出的 CHW 张量还原为指定顺序的像素缓冲区
pub fn to_pixels(tensor: &Tensor, dst_order: ColorOrder) -> Result<PixelBuffer, ResizeError> {
  if tensor.is_degenerate() || tensor.channels() != RGB_CHANNELS {
    return Err(ResizeError::FrameError(FrameError::InvalidShape {
      width: tensor.width(),
      height: tensor.height(),
      channels: tensor.channels(),
    }));
  }

  let plane = tensor.width() as usize * tensor.height() as usize;
  let swap = tensor.order().needs_swap(dst_order);
  let mut data = vec![0u8; plane * RGB_CHANNELS];

  for c in 0..RGB_CHANNELS {
    let to = if swap { RGB_CHANNELS - 1 - c } else { c };
    for (i, value) in tensor.plane(c).iter().enumerate() {
      data[i * RGB_CHANNELS + to] = value.round().clamp(0.0, 255.0) as u8;
    }
  }

  Ok(PixelBuffer::new(
    tensor.width(),
    tensor.height(),
    dst_order,
    data,
  )?)
}
