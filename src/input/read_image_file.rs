// 该文件是 Huafeng （画风） 项目的一部分。
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

use std::path::Path;

use image::ImageReader;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{ColorOrder, FrameError, PixelBuffer},
  input::ImageSource,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(image::ImageError),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

/// 通过 `image` 解码图像文件，得到 RGB 顺序的像素缓冲区
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileInput;

impl ImageSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn load(&self, path: &Path) -> Result<PixelBuffer, Self::Error> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgb8();
    let (width, height) = image.dimensions();
    debug!("读取图像 {}: {}x{}", path.display(), width, height);

    Ok(PixelBuffer::new(
      width,
      height,
      ColorOrder::Rgb,
      image.into_raw(),
    )?)
  }
}
