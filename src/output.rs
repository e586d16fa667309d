// 该文件是 Huafeng （画风） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;

use crate::{frame::PixelBuffer, job::JobId};

#[derive(Error, Debug)]
pub enum OutputWriteError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("像素数据与尺寸不符: {0}x{1}")]
  InvalidBuffer(u32, u32),
}

/// 将一张图像写入存储；多个任务会并发调用
pub trait ImageSink: Sync {
  fn save(&self, path: &Path, image: &PixelBuffer) -> Result<(), OutputWriteError>;
}

impl<S: ImageSink + ?Sized> ImageSink for &S {
  fn save(&self, path: &Path, image: &PixelBuffer) -> Result<(), OutputWriteError> {
    (**self).save(path, image)
  }
}

/// 在输入路径后追加 `.{编号}.{扩展名}`，例如 `photo.jpg` -> `photo.jpg.0.jpg`
pub fn output_path(input: &Path, id: JobId, extension: &str) -> PathBuf {
  let mut path = input.as_os_str().to_os_string();
  path.push(format!(".{}.{}", id, extension));
  PathBuf::from(path)
}

mod save_image_file;
pub use self::save_image_file::SaveImageFileOutput;
