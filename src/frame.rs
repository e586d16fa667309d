// 该文件是 Huafeng （画风） 项目的一部分。
// src/frame.rs - 像素缓冲区与张量定义
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

use serde::Deserialize;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("尺寸无效: {width}x{height}x{channels}")]
  InvalidShape {
    width: u32,
    height: u32,
    channels: usize,
  },
}

/// 三通道数据的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ColorOrder {
  /// 从 `self` 转换到 `other` 是否需要交换第一和第三通道
  pub fn needs_swap(self, other: ColorOrder) -> bool {
    self != other
  }
}

/// 交错存储（HWC）的 8 位三通道图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
  width: u32,
  height: u32,
  order: ColorOrder,
  data: Box<[u8]>,
}

impl PixelBuffer {
  pub fn new(width: u32, height: u32, order: ColorOrder, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = width as usize * height as usize * RGB_CHANNELS;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      order,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn order(&self) -> ColorOrder {
    self.order
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.data.into_vec()
  }

  /// 转换为指定通道顺序，尺寸与像素值不变
  pub fn into_order(mut self, order: ColorOrder) -> Self {
    if self.order.needs_swap(order) {
      for pixel in self.data.chunks_exact_mut(RGB_CHANNELS) {
        pixel.swap(0, 2);
      }
      self.order = order;
    }
    self
  }
}

/// 平面存储（CHW）的 `f32` 张量，单个推理任务独占
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  width: u32,
  height: u32,
  channels: usize,
  order: ColorOrder,
  data: Vec<f32>,
}

impl Tensor {
  pub fn new(
    width: u32,
    height: u32,
    channels: usize,
    order: ColorOrder,
    data: Vec<f32>,
  ) -> Result<Self, FrameError> {
    let expected = width as usize * height as usize * channels;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      channels,
      order,
      data,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn order(&self) -> ColorOrder {
    self.order
  }

  /// 宽或高为零
  pub fn is_degenerate(&self) -> bool {
    self.width == 0 || self.height == 0 || self.channels == 0
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 第 `c` 个通道平面
  pub fn plane(&self, c: usize) -> &[f32] {
    let size = self.width as usize * self.height as usize;
    &self.data[c * size..(c + 1) * size]
  }
}
