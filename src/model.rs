// 该文件是 Huafeng （画风） 项目的一部分。
// src/model.rs - 模型
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

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
  device::DeviceSpec,
  frame::{ColorOrder, RGB_CHANNELS, Tensor},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 推理后端
///
/// 同一个后端实例被所有工作线程共享引用，因此要求 `Sync`。
/// 加载完成的模型只读，`run_graph` 不得修改模型。
pub trait Backend: Sync {
  type Device: Sync;
  type Graph;
  type Model: Sync;
  type Error: std::error::Error + Send + Sync + 'static;

  fn acquire_device(&self, config: &ExecutionConfig) -> Result<Self::Device, Self::Error>;
  /// 每个成功获取的设备恰好调用一次，之后设备随之丢弃
  fn release_device(&self, device: &Self::Device);

  /// 加载所有风格共享的网络结构，并应用执行配置
  fn load_graph(
    &self,
    device: &Self::Device,
    config: &ExecutionConfig,
    descriptor: &GraphDescriptor,
  ) -> Result<Self::Graph, Self::Error>;

  /// 为网络结构加载某一风格的权重
  fn load_weights(&self, graph: Self::Graph, weights: &Path) -> Result<Self::Model, Self::Error>;

  fn run_graph(&self, model: &Self::Model, input: &Tensor) -> Result<Tensor, Self::Error>;
}

/// 所有模型共享的只读执行配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
  pub device: DeviceSpec,
  pub allow_cpu_fallback: bool,
  pub workers: usize,
}

impl Default for ExecutionConfig {
  fn default() -> Self {
    Self {
      device: DeviceSpec::preferred(),
      allow_cpu_fallback: true,
      workers: 2,
    }
  }
}

impl ExecutionConfig {
  /// 不使用加速设备的降级配置
  pub fn degraded(&self) -> Self {
    Self {
      device: DeviceSpec::Cpu,
      ..self.clone()
    }
  }
}

#[derive(Error, Debug)]
pub enum DescriptorError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("网络结构无效: {0}")]
  Invalid(String),
}

/// 网络结构描述，所有风格共享
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphDescriptor {
  pub name: String,
  pub input_blob: String,
  pub output_blob: String,
  pub input_channels: usize,
  pub base_channels: usize,
  pub residual_blocks: usize,
  pub color_order: ColorOrder,
}

impl Default for GraphDescriptor {
  fn default() -> Self {
    Self {
      name: "transformer-net".to_string(),
      input_blob: "input1".to_string(),
      output_blob: "output1".to_string(),
      input_channels: RGB_CHANNELS,
      base_channels: 32,
      residual_blocks: 5,
      color_order: ColorOrder::Rgb,
    }
  }
}

impl GraphDescriptor {
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, DescriptorError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
  }

  pub fn validate(&self) -> Result<(), DescriptorError> {
    if self.input_channels != RGB_CHANNELS {
      return Err(DescriptorError::Invalid(format!(
        "输入通道数必须为 {}, 实际为 {}",
        RGB_CHANNELS, self.input_channels
      )));
    }
    if self.base_channels == 0 || self.residual_blocks == 0 {
      return Err(DescriptorError::Invalid(
        "基础通道数与残差块数必须大于 0".to_string(),
      ));
    }
    if self.input_blob.is_empty() || self.output_blob.is_empty() {
      return Err(DescriptorError::Invalid("输入输出名称不能为空".to_string()));
    }
    if self.input_blob == self.output_blob {
      return Err(DescriptorError::Invalid(format!(
        "输入与输出名称相同: {}",
        self.input_blob
      )));
    }
    Ok(())
  }
}

/// 风格标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleId(String);

impl StyleId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for StyleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// 一个风格的配置：标识与权重文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSpec {
  pub id: StyleId,
  pub weights: PathBuf,
}

const DEFAULT_STYLES: [&str; 4] = ["candy", "rain_princess", "udnie", "starrynight"];

impl StyleSpec {
  pub fn new(id: impl Into<String>, weights: impl Into<PathBuf>) -> Self {
    Self {
      id: StyleId::new(id),
      weights: weights.into(),
    }
  }

  /// 当前目录下的四个默认风格
  pub fn defaults() -> Vec<Self> {
    DEFAULT_STYLES
      .iter()
      .map(|name| StyleSpec::new(*name, format!("{}.safetensors", name)))
      .collect()
  }
}

impl FromStr for StyleSpec {
  type Err = String;

  /// `NAME=PATH`，或仅 `PATH`（以文件名作为风格名）
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.split_once('=') {
      Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok(StyleSpec::new(name, path)),
      Some(_) => Err(format!("风格格式应为 NAME=PATH: {}", s)),
      None => {
        let path = Path::new(s);
        let name = path
          .file_stem()
          .and_then(|stem| stem.to_str())
          .filter(|stem| !stem.is_empty())
          .ok_or_else(|| format!("无法从路径推断风格名: {}", s))?;
        Ok(StyleSpec::new(name, path))
      }
    }
  }
}

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("风格 {style} 的网络结构加载失败: {source}")]
  GraphLoadError {
    style: StyleId,
    #[source]
    source: BoxError,
  },
  #[error("风格 {style} 的权重 {} 加载失败: {source}", path.display())]
  WeightsLoadError {
    style: StyleId,
    path: PathBuf,
    #[source]
    source: BoxError,
  },
}

impl LoadError {
  pub fn style(&self) -> &StyleId {
    match self {
      LoadError::GraphLoadError { style, .. } => style,
      LoadError::WeightsLoadError { style, .. } => style,
    }
  }
}

mod registry;
pub use self::registry::{ModelHandle, ModelRegistry};

mod transformer;
pub use self::transformer::{
  CandleBackend, CandleBackendError, TransformerGraph, TransformerModel, TransformerNet,
};

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_style_spec_parse() {
    let spec: StyleSpec = "candy=models/candy.safetensors".parse().unwrap();
    assert_eq!(spec.id.as_str(), "candy");
    assert_eq!(spec.weights, PathBuf::from("models/candy.safetensors"));

    let spec: StyleSpec = "models/udnie.safetensors".parse().unwrap();
    assert_eq!(spec.id.as_str(), "udnie");

    assert!("=x".parse::<StyleSpec>().is_err());
    assert!("x=".parse::<StyleSpec>().is_err());
  }

  #[test]
  fn test_default_styles_in_order() {
    let ids: Vec<_> = StyleSpec::defaults()
      .into_iter()
      .map(|s| s.id.to_string())
      .collect();
    assert_eq!(ids, ["candy", "rain_princess", "udnie", "starrynight"]);
  }

  #[test]
  fn test_descriptor_validation() {
    assert!(GraphDescriptor::default().validate().is_ok());

    let bad = GraphDescriptor {
      residual_blocks: 0,
      ..GraphDescriptor::default()
    };
    assert!(matches!(bad.validate(), Err(DescriptorError::Invalid(_))));

    let same_blob = GraphDescriptor {
      output_blob: "input1".to_string(),
      ..GraphDescriptor::default()
    };
    assert!(same_blob.validate().is_err());
  }

  #[test]
  fn test_descriptor_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    std::fs::write(&path, r#"{ "residual_blocks": 3, "color_order": "bgr" }"#).unwrap();

    let descriptor = GraphDescriptor::from_json_file(&path).unwrap();
    assert_eq!(descriptor.residual_blocks, 3);
    assert_eq!(descriptor.color_order, ColorOrder::Bgr);
    assert_eq!(descriptor.input_blob, "input1");

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
      GraphDescriptor::from_json_file(&path),
      Err(DescriptorError::ParseError(_))
    ));
  }

  #[test]
  fn test_degraded_config() {
    let config = ExecutionConfig {
      device: DeviceSpec::Cuda(1),
      allow_cpu_fallback: true,
      workers: 3,
    };
    let degraded = config.degraded();
    assert_eq!(degraded.device, DeviceSpec::Cpu);
    assert_eq!(degraded.workers, 3);
  }
}
