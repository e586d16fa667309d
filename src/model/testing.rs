// 该文件是 Huafeng （画风） 项目的一部分。
// src/model/testing.rs - 测试用推理后端
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
  collections::HashMap,
  path::{Path, PathBuf},
  sync::atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;

use crate::{
  device::DeviceSpec,
  frame::Tensor,
  model::{Backend, ExecutionConfig, GraphDescriptor},
};

#[derive(Error, Debug)]
#[error("mock: {0}")]
pub struct MockError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
  MissingWeights,
  Inference,
  Degenerate,
  Panic,
}

#[derive(Debug)]
pub struct MockModel {
  pub weights: PathBuf,
  fault: Option<Fault>,
}

/// 记录设备获取/释放次数的后端，输出为输入取反
#[derive(Default)]
pub struct MockBackend {
  no_gpu: bool,
  faults: HashMap<PathBuf, Fault>,
  acquired: AtomicUsize,
  released: AtomicUsize,
  runs: AtomicUsize,
}

impl MockBackend {
  pub fn without_gpu(mut self) -> Self {
    self.no_gpu = true;
    self
  }

  pub fn with_fault(mut self, weights: impl Into<PathBuf>, fault: Fault) -> Self {
    self.faults.insert(weights.into(), fault);
    self
  }

  pub fn with_missing_weights(self, weights: impl Into<PathBuf>) -> Self {
    self.with_fault(weights, Fault::MissingWeights)
  }

  pub fn acquired(&self) -> usize {
    self.acquired.load(Ordering::SeqCst)
  }

  pub fn released(&self) -> usize {
    self.released.load(Ordering::SeqCst)
  }

  pub fn runs(&self) -> usize {
    self.runs.load(Ordering::SeqCst)
  }
}

impl Backend for MockBackend {
  type Device = DeviceSpec;
  type Graph = ();
  type Model = MockModel;
  type Error = MockError;

  fn acquire_device(&self, config: &ExecutionConfig) -> Result<Self::Device, Self::Error> {
    if self.no_gpu && config.device.is_accelerated() {
      return Err(MockError(format!("{} 不存在", config.device)));
    }
    self.acquired.fetch_add(1, Ordering::SeqCst);
    Ok(config.device)
  }

  fn release_device(&self, _device: &Self::Device) {
    self.released.fetch_add(1, Ordering::SeqCst);
  }

  fn load_graph(
    &self,
    _device: &Self::Device,
    _config: &ExecutionConfig,
    descriptor: &GraphDescriptor,
  ) -> Result<Self::Graph, Self::Error> {
    descriptor.validate().map_err(|e| MockError(e.to_string()))
  }

  fn load_weights(&self, _graph: Self::Graph, weights: &Path) -> Result<Self::Model, Self::Error> {
    let fault = self.faults.get(weights).copied();
    if fault == Some(Fault::MissingWeights) {
      return Err(MockError(format!("{} 不存在", weights.display())));
    }
    Ok(MockModel {
      weights: weights.to_path_buf(),
      fault,
    })
  }

  fn run_graph(&self, model: &Self::Model, input: &Tensor) -> Result<Tensor, Self::Error> {
    self.runs.fetch_add(1, Ordering::SeqCst);
    match model.fault {
      Some(Fault::Inference) => Err(MockError("执行失败".to_string())),
      Some(Fault::Panic) => panic!("后端崩溃"),
      Some(Fault::Degenerate) => {
        Tensor::new(0, 0, input.channels(), input.order(), vec![]).map_err(|e| MockError(e.to_string()))
      }
      _ => {
        let data = input.as_slice().iter().map(|v| 255.0 - v).collect();
        Tensor::new(input.width(), input.height(), input.channels(), input.order(), data)
          .map_err(|e| MockError(e.to_string()))
      }
    }
  }
}
