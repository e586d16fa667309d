// 该文件是 Huafeng （画风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use image::RgbImage;
use tracing::info;

use crate::{
  frame::{ColorOrder, PixelBuffer},
  output::{ImageSink, OutputWriteError},
};

/// 按扩展名编码并写入图像文件
#[derive(Debug, Default, Clone, Copy)]
pub struct SaveImageFileOutput;

impl ImageSink for SaveImageFileOutput {
  fn save(&self, path: &Path, image: &PixelBuffer) -> Result<(), OutputWriteError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let (width, height) = (image.width(), image.height());
    let rgb = image.clone().into_order(ColorOrder::Rgb);
    let rgb = RgbImage::from_raw(width, height, rgb.into_bytes())
      .ok_or(OutputWriteError::InvalidBuffer(width, height))?;
    rgb.save(path)?;

    info!("保存图像到文件: {}", path.display());

    Ok(())
  }
}
