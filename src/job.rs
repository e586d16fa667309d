// 该文件是 Huafeng （画风） 项目的一部分。
// src/job.rs - 单个风格的推理任务
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

use std::{fmt, time::Instant};

use thiserror::Error;
use tracing::{debug, info, info_span};

use crate::{
  dispatch::Interrupted,
  frame::Tensor,
  model::{Backend, ModelHandle, StyleId},
};

/// 任务编号，等于风格在配置中的序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输出形状退化: {width}x{height}x{channels}")]
  DegenerateOutput {
    width: u32,
    height: u32,
    channels: usize,
  },
  #[error("推理后端错误: {reason}")]
  Backend { reason: String },
  #[error("任务已取消")]
  Cancelled,
  #[error("推理任务崩溃: {0}")]
  Panicked(String),
}

impl From<Interrupted> for InferenceError {
  fn from(interrupted: Interrupted) -> Self {
    match interrupted {
      Interrupted::Cancelled => InferenceError::Cancelled,
      Interrupted::Panicked(message) => InferenceError::Panicked(message),
    }
  }
}

/// 一个模型与其独占的输入张量
pub struct InferenceJob<'a, M> {
  id: JobId,
  handle: &'a ModelHandle<M>,
  input: Tensor,
}

impl<'a, M> InferenceJob<'a, M> {
  pub fn new(handle: &'a ModelHandle<M>, input: Tensor) -> Self {
    Self {
      id: JobId(handle.index()),
      handle,
      input,
    }
  }

  pub fn id(&self) -> JobId {
    self.id
  }

  pub fn style(&self) -> &'a StyleId {
    self.handle.style()
  }

  /// 执行推理，阻塞当前线程直到后端返回
  pub fn run<B: Backend<Model = M>>(self, backend: &B) -> Result<Tensor, InferenceError> {
    let _span = info_span!("job", id = %self.id, style = %self.handle.style()).entered();
    debug!(
      "输入 {}x{}x{}",
      self.input.width(),
      self.input.height(),
      self.input.channels()
    );

    let now = Instant::now();
    let output = backend
      .run_graph(self.handle.model(), &self.input)
      .map_err(|e| InferenceError::Backend {
        reason: e.to_string(),
      })?;

    if output.is_degenerate() {
      return Err(InferenceError::DegenerateOutput {
        width: output.width(),
        height: output.height(),
        channels: output.channels(),
      });
    }

    info!("推理完成，耗时: {:.2?}", now.elapsed());
    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    device::{DeviceContext, DeviceSpec},
    frame::ColorOrder,
    model::{
      ExecutionConfig, GraphDescriptor, ModelRegistry, StyleSpec,
      testing::{Fault, MockBackend},
    },
  };

  fn input() -> Tensor {
    Tensor::new(2, 2, 3, ColorOrder::Rgb, vec![10.0; 12]).unwrap()
  }

  fn run_one(backend: &MockBackend) -> Result<Tensor, InferenceError> {
    let config = ExecutionConfig {
      device: DeviceSpec::Cpu,
      allow_cpu_fallback: false,
      workers: 1,
    };
    let context = DeviceContext::acquire(backend, config).unwrap();
    let registry = ModelRegistry::load_all(
      &context,
      Ok(&GraphDescriptor::default()),
      &[StyleSpec::new("candy", "candy.safetensors")],
    );
    let handle = registry.handles().next().unwrap();
    let job = InferenceJob::new(handle, input());
    assert_eq!(job.id(), JobId(0));
    assert_eq!(job.style().as_str(), "candy");
    job.run(backend)
  }

  #[test]
  fn test_run_produces_output() {
    let backend = MockBackend::default();
    let output = run_one(&backend).unwrap();
    assert_eq!(output.as_slice(), &[245.0; 12]);
    assert_eq!(backend.runs(), 1);
  }

  #[test]
  fn test_backend_error_is_reported() {
    let backend = MockBackend::default().with_fault("candy.safetensors", Fault::Inference);
    assert!(matches!(
      run_one(&backend),
      Err(InferenceError::Backend { .. })
    ));
  }

  #[test]
  fn test_degenerate_output_is_reported() {
    let backend = MockBackend::default().with_fault("candy.safetensors", Fault::Degenerate);
    assert!(matches!(
      run_one(&backend),
      Err(InferenceError::DegenerateOutput {
        width: 0,
        height: 0,
        ..
      })
    ));
  }
}
