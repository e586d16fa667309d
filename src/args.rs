// 该文件是 Huafeng （画风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tracing::Level;

use huafeng::{
  device::DeviceSpec,
  model::{ExecutionConfig, StyleSpec},
  task::{DEFAULT_EXTENSION, DEFAULT_TARGET_SIZE},
};

/// Huafeng 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像路径，输出写在同一目录下：<IMAGE>.<序号>.<扩展名>
  #[arg(value_name = "IMAGE")]
  pub image: PathBuf,

  /// 风格模型，格式为 NAME=PATH 或 PATH，可重复；
  /// 未指定时使用当前目录下的 candy、rain_princess、udnie、starrynight
  #[arg(long = "style", value_name = "NAME=PATH")]
  pub styles: Vec<StyleSpec>,

  /// 网络结构描述文件（JSON），未指定时使用内置结构
  #[arg(long, value_name = "FILE")]
  pub graph: Option<PathBuf>,

  /// 推理设备，例如 cpu:、cuda:0、metal:0
  #[arg(long, value_name = "URL")]
  pub device: Option<DeviceSpec>,

  /// 加速设备不可用时不回退到 CPU
  #[arg(long)]
  pub no_fallback: bool,

  /// 并发推理的工作线程数
  #[arg(long, default_value_t = 2, value_name = "N")]
  pub workers: usize,

  /// 推理输入的长边像素数
  #[arg(
    long,
    default_value_t = DEFAULT_TARGET_SIZE,
    value_name = "N",
    value_parser = clap::value_parser!(u32).range(1..)
  )]
  pub target_size: u32,

  /// 输出图像扩展名
  #[arg(long, default_value = DEFAULT_EXTENSION, value_name = "EXT")]
  pub extension: String,

  /// 输出更详细的日志（-v 调试，-vv 跟踪）
  #[arg(short, long, action = ArgAction::Count)]
  pub verbose: u8,
}

impl Args {
  pub fn styles(&self) -> Vec<StyleSpec> {
    if self.styles.is_empty() {
      StyleSpec::defaults()
    } else {
      self.styles.clone()
    }
  }

  pub fn execution_config(&self) -> ExecutionConfig {
    ExecutionConfig {
      device: self.device.unwrap_or_else(DeviceSpec::preferred),
      allow_cpu_fallback: !self.no_fallback,
      workers: self.workers,
    }
  }

  pub fn log_level(&self) -> Level {
    match self.verbose {
      0 => Level::INFO,
      1 => Level::DEBUG,
      _ => Level::TRACE,
    }
  }
}
