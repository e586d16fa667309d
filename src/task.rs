// 该文件是 Huafeng （画风） 项目的一部分。
// src/task.rs - 多风格推理任务
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

use std::{path::PathBuf, time::Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  device::{AcquireError, DeviceContext},
  dispatch::{CancelToken, Dispatcher, Interrupted},
  input::ImageSource,
  job::{InferenceError, InferenceJob, JobId},
  model::{
    Backend, BoxError, DescriptorError, ExecutionConfig, GraphDescriptor, LoadError,
    ModelRegistry, StyleId, StyleSpec,
  },
  output::{ImageSink, OutputWriteError, output_path},
  resize::{ResizeError, compute_target_size, resize_and_convert, to_pixels},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 导致整个运行中止的错误
#[derive(Error, Debug)]
pub enum TaskError {
  #[error("图像 {} 解码失败: {source}", path.display())]
  ImageDecodeError {
    path: PathBuf,
    #[source]
    source: BoxError,
  },
  #[error("设备获取失败: {0}")]
  AcquireError(#[from] AcquireError),
  #[error("预处理失败: {0}")]
  ResizeError(#[from] ResizeError),
}

/// 单个任务的失败，不影响其他任务
#[derive(Error, Debug)]
pub enum JobFailure {
  #[error("{0}")]
  Inference(#[from] InferenceError),
  #[error("后处理失败: {0}")]
  Postprocess(#[from] ResizeError),
  #[error("{} 写入失败: {source}", path.display())]
  OutputWriteError {
    path: PathBuf,
    #[source]
    source: OutputWriteError,
  },
}

impl From<Interrupted> for JobFailure {
  fn from(interrupted: Interrupted) -> Self {
    JobFailure::Inference(interrupted.into())
  }
}

/// 一次运行的结果，各列表按风格序号排序
#[derive(Debug, Default)]
pub struct RunReport {
  pub written: Vec<(JobId, StyleId, PathBuf)>,
  pub load_failures: Vec<(usize, LoadError)>,
  pub job_failures: Vec<(JobId, StyleId, JobFailure)>,
}

impl RunReport {
  pub fn is_complete(&self) -> bool {
    self.load_failures.is_empty() && self.job_failures.is_empty()
  }
}

/// 网络结构的来源
#[derive(Debug, Clone)]
enum GraphSource {
  Builtin(GraphDescriptor),
  File(PathBuf),
}

impl GraphSource {
  fn resolve(&self) -> Result<GraphDescriptor, DescriptorError> {
    match self {
      GraphSource::Builtin(descriptor) => Ok(descriptor.clone()),
      GraphSource::File(path) => GraphDescriptor::from_json_file(path),
    }
  }
}

/// 把一张图像交给所有风格模型处理，每个风格输出一个文件
#[derive(Debug, Clone)]
pub struct StyleTransferTask {
  image: PathBuf,
  styles: Vec<StyleSpec>,
  graph: GraphSource,
  config: ExecutionConfig,
  target_size: u32,
  extension: String,
  cancel: Option<CancelToken>,
}

pub const DEFAULT_TARGET_SIZE: u32 = 1000;
pub const DEFAULT_EXTENSION: &str = "jpg";

impl StyleTransferTask {
  pub fn new(image: impl Into<PathBuf>, styles: Vec<StyleSpec>) -> Self {
    Self {
      image: image.into(),
      styles,
      graph: GraphSource::Builtin(GraphDescriptor::default()),
      config: ExecutionConfig::default(),
      target_size: DEFAULT_TARGET_SIZE,
      extension: DEFAULT_EXTENSION.to_string(),
      cancel: None,
    }
  }

  pub fn with_descriptor(mut self, descriptor: GraphDescriptor) -> Self {
    self.graph = GraphSource::Builtin(descriptor);
    self
  }

  /// 运行时从 JSON 文件读取网络结构；读取失败记为每个风格的加载失败
  pub fn with_descriptor_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.graph = GraphSource::File(path.into());
    self
  }

  pub fn with_config(mut self, config: ExecutionConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_target_size(mut self, target_size: u32) -> Self {
    self.target_size = target_size;
    self
  }

  pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
    self.extension = extension.into();
    self
  }

  pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
    self.cancel = Some(token);
    self
  }

  fn style_of(&self, id: JobId) -> StyleId {
    self.styles[id.0].id.clone()
  }
}

impl<I, B, O> Task<I, &B, O> for StyleTransferTask
where
  I: ImageSource,
  B: Backend,
  O: ImageSink,
{
  type Output = RunReport;
  type Error = TaskError;

  fn run_task(self, input: I, backend: &B, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let buffer = input
      .load(&self.image)
      .map_err(|e| TaskError::ImageDecodeError {
        path: self.image.clone(),
        source: e.into(),
      })?;
    info!(
      "输入图像 {}: {}x{}",
      self.image.display(),
      buffer.width(),
      buffer.height()
    );

    // 之后的任何提前返回都会随 Drop 释放设备
    let context = DeviceContext::acquire(backend, self.config.clone())?;
    if context.is_degraded() {
      warn!("以降级模式运行: {}", context.config().device);
    }

    let descriptor = self.graph.resolve();
    if let (Err(e), GraphSource::File(path)) = (&descriptor, &self.graph) {
      error!("网络结构描述 {} 读取失败: {}", path.display(), e);
    }
    let registry = ModelRegistry::load_all(&context, descriptor.as_ref(), &self.styles);
    let color_order = descriptor
      .as_ref()
      .map(|descriptor| descriptor.color_order)
      .unwrap_or_default();

    let (target_w, target_h) = compute_target_size(buffer.width(), buffer.height(), self.target_size);
    let tensor = resize_and_convert(
      &buffer,
      target_w,
      target_h,
      buffer.order(),
      color_order,
    )?;
    info!("推理输入尺寸: {}x{}", target_w, target_h);

    let jobs: Vec<_> = registry
      .handles()
      .map(|handle| {
        let job = InferenceJob::new(handle, tensor.clone());
        (job.id(), job)
      })
      .collect();
    if jobs.is_empty() {
      warn!("没有可用的风格模型");
    }

    let mut dispatcher = Dispatcher::new(context.config().workers);
    if let Some(token) = &self.cancel {
      dispatcher = dispatcher.with_cancel_token(token.clone());
    }

    let now = Instant::now();
    let completed = dispatcher.run_all(jobs, |id, job| -> Result<PathBuf, JobFailure> {
      let result = job.run(backend)?;
      let pixels = to_pixels(&result, buffer.order())?;
      let path = output_path(&self.image, id, &self.extension);
      output
        .save(&path, &pixels)
        .map_err(|source| JobFailure::OutputWriteError {
          path: path.clone(),
          source,
        })?;
      Ok(path)
    });
    info!("全部任务结束，耗时: {:.2?}", now.elapsed());

    let mut report = RunReport::default();
    for done in completed {
      let style = self.style_of(done.id);
      match done.result {
        Ok(path) => report.written.push((done.id, style, path)),
        Err(e) => {
          error!("风格 {} ({}) 失败: {}", done.id, style, e);
          report.job_failures.push((done.id, style, e));
        }
      }
    }
    report.written.sort_by_key(|(id, ..)| *id);
    report.job_failures.sort_by_key(|(id, ..)| *id);

    report.load_failures = registry.into_failures();
    context.release();

    info!(
      "任务完成: 写入 {} 个文件, 加载失败 {} 个, 推理失败 {} 个",
      report.written.len(),
      report.load_failures.len(),
      report.job_failures.len()
    );
    Ok(report)
  }
}
