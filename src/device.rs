// 该文件是 Huafeng （画风） 项目的一部分。
// src/device.rs - 设备上下文生命周期
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

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl,
  model::{Backend, ExecutionConfig},
};

const CPU_SCHEME: &str = "cpu";
const CUDA_SCHEME: &str = "cuda";
const METAL_SCHEME: &str = "metal";

/// 推理设备，形如 `cpu:`、`cuda:0`、`metal:0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSpec {
  Cpu,
  Cuda(usize),
  Metal(usize),
}

#[derive(Error, Debug)]
pub enum DeviceSpecError {
  #[error("URL 解析错误: {0}")]
  UrlError(#[from] url::ParseError),
  #[error("未知的设备方案: {0}")]
  UnknownScheme(String),
  #[error("设备序号无效: {0}")]
  InvalidOrdinal(String),
}

impl DeviceSpec {
  /// 编译时启用的加速后端中优先使用的设备
  pub fn preferred() -> Self {
    if cfg!(feature = "cuda") {
      DeviceSpec::Cuda(0)
    } else if cfg!(feature = "metal") {
      DeviceSpec::Metal(0)
    } else {
      DeviceSpec::Cpu
    }
  }

  pub fn is_accelerated(&self) -> bool {
    !matches!(self, DeviceSpec::Cpu)
  }
}

impl fmt::Display for DeviceSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DeviceSpec::Cpu => write!(f, "{}:", CPU_SCHEME),
      DeviceSpec::Cuda(ordinal) => write!(f, "{}:{}", CUDA_SCHEME, ordinal),
      DeviceSpec::Metal(ordinal) => write!(f, "{}:{}", METAL_SCHEME, ordinal),
    }
  }
}

impl FromUrl for DeviceSpec {
  type Error = DeviceSpecError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let ordinal = || -> Result<usize, DeviceSpecError> {
      // 兼容 `cuda://1` 写法
      let path = url
        .host_str()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| url.path().trim_start_matches('/'));
      if path.is_empty() {
        return Ok(0);
      }
      path
        .parse()
        .map_err(|_| DeviceSpecError::InvalidOrdinal(path.to_string()))
    };

    match url.scheme() {
      CPU_SCHEME => Ok(DeviceSpec::Cpu),
      CUDA_SCHEME => Ok(DeviceSpec::Cuda(ordinal()?)),
      METAL_SCHEME => Ok(DeviceSpec::Metal(ordinal()?)),
      other => Err(DeviceSpecError::UnknownScheme(other.to_string())),
    }
  }
}

impl FromStr for DeviceSpec {
  type Err = DeviceSpecError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    DeviceSpec::from_url(&Url::parse(s)?)
  }
}

#[derive(Error, Debug)]
pub enum AcquireError {
  #[error("设备 {device} 不可用: {reason}")]
  Unavailable { device: DeviceSpec, reason: String },
}

/// 进程级设备上下文
///
/// 在加载任何模型之前获取，释放恰好发生一次：显式调用 [`DeviceContext::release`]，
/// 或在任何提前返回的路径上随 `Drop` 释放。
pub struct DeviceContext<'b, B: Backend> {
  backend: &'b B,
  device: B::Device,
  config: ExecutionConfig,
  degraded: bool,
}

impl<'b, B: Backend> DeviceContext<'b, B> {
  /// 按配置获取设备；加速设备不可用且允许回退时改用 CPU
  pub fn acquire(backend: &'b B, config: ExecutionConfig) -> Result<Self, AcquireError> {
    info!("获取设备上下文: {}", config.device);
    match backend.acquire_device(&config) {
      Ok(device) => Ok(Self {
        backend,
        device,
        config,
        degraded: false,
      }),
      Err(e) if config.device.is_accelerated() && config.allow_cpu_fallback => {
        warn!("设备 {} 不可用: {}, 回退到 CPU", config.device, e);
        let degraded = config.degraded();
        let device = backend
          .acquire_device(&degraded)
          .map_err(|e| AcquireError::Unavailable {
            device: degraded.device,
            reason: e.to_string(),
          })?;
        Ok(Self {
          backend,
          device,
          config: degraded,
          degraded: true,
        })
      }
      Err(e) => Err(AcquireError::Unavailable {
        device: config.device,
        reason: e.to_string(),
      }),
    }
  }

  pub fn backend(&self) -> &'b B {
    self.backend
  }

  pub fn device(&self) -> &B::Device {
    &self.device
  }

  /// 实际生效的执行配置，获取完成后不再改变
  pub fn config(&self) -> &ExecutionConfig {
    &self.config
  }

  pub fn is_degraded(&self) -> bool {
    self.degraded
  }

  pub fn release(self) {
    drop(self);
  }
}

impl<B: Backend> Drop for DeviceContext<'_, B> {
  fn drop(&mut self) {
    info!("释放设备上下文: {}", self.config.device);
    self.backend.release_device(&self.device);
  }
}
