// 该文件是 Huafeng （画风） 项目的一部分。
// src/model/registry.rs - 风格模型注册表
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

use std::time::Instant;

use tracing::{debug, error, info};

use crate::{
  device::DeviceContext,
  model::{
    Backend, BoxError, DescriptorError, ExecutionConfig, GraphDescriptor, LoadError, StyleId,
    StyleSpec,
  },
};

/// 已加载的风格模型，加载后只读
#[derive(Debug)]
pub struct ModelHandle<M> {
  index: usize,
  style: StyleId,
  model: M,
}

impl<M> ModelHandle<M> {
  /// 风格在配置中的序号，也是输出文件名中的编号
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn style(&self) -> &StyleId {
    &self.style
  }

  pub fn model(&self) -> &M {
    &self.model
  }
}

enum Slot<M> {
  Ready(ModelHandle<M>),
  Invalid(usize, LoadError),
}

/// 按配置顺序保存的风格模型
///
/// 某个风格加载失败时只标记该风格无效，其余风格照常加载。
pub struct ModelRegistry<M> {
  slots: Vec<Slot<M>>,
}

impl<M> ModelRegistry<M> {
  /// 加载单个风格：先应用执行配置加载共享网络结构，再加载该风格的权重
  pub fn load<B: Backend<Model = M>>(
    backend: &B,
    device: &B::Device,
    config: &ExecutionConfig,
    descriptor: &GraphDescriptor,
    index: usize,
    style: &StyleSpec,
  ) -> Result<ModelHandle<M>, LoadError> {
    let graph = backend
      .load_graph(device, config, descriptor)
      .map_err(|e| LoadError::GraphLoadError {
        style: style.id.clone(),
        source: e.into(),
      })?;
    debug!("风格 {} 的网络结构 {} 加载完成", style.id, descriptor.name);

    let model = backend
      .load_weights(graph, &style.weights)
      .map_err(|e| LoadError::WeightsLoadError {
        style: style.id.clone(),
        path: style.weights.clone(),
        source: e.into(),
      })?;

    Ok(ModelHandle {
      index,
      style: style.id.clone(),
      model,
    })
  }

  /// 依次加载所有风格
  ///
  /// 网络结构描述读取失败时，每个风格都记为 `GraphLoadError`。
  pub fn load_all<B: Backend<Model = M>>(
    context: &DeviceContext<'_, B>,
    descriptor: Result<&GraphDescriptor, &DescriptorError>,
    styles: &[StyleSpec],
  ) -> Self {
    let slots = styles
      .iter()
      .enumerate()
      .map(|(index, style)| {
        info!("加载风格 {} ({}): {}", index, style.id, style.weights.display());
        let now = Instant::now();
        let loaded = match descriptor {
          Ok(descriptor) => Self::load(
            context.backend(),
            context.device(),
            context.config(),
            descriptor,
            index,
            style,
          ),
          Err(e) => Err(LoadError::GraphLoadError {
            style: style.id.clone(),
            source: BoxError::from(e.to_string()),
          }),
        };
        match loaded {
          Ok(handle) => {
            info!("风格 {} 加载完成，耗时: {:.2?}", style.id, now.elapsed());
            Slot::Ready(handle)
          }
          Err(e) => {
            error!("{}", e);
            Slot::Invalid(index, e)
          }
        }
      })
      .collect();

    Self { slots }
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  /// 可用于推理的模型，按配置顺序
  pub fn handles(&self) -> impl Iterator<Item = &ModelHandle<M>> {
    self.slots.iter().filter_map(|slot| match slot {
      Slot::Ready(handle) => Some(handle),
      Slot::Invalid(..) => None,
    })
  }

  pub fn failures(&self) -> impl Iterator<Item = (usize, &LoadError)> {
    self.slots.iter().filter_map(|slot| match slot {
      Slot::Ready(_) => None,
      Slot::Invalid(index, e) => Some((*index, e)),
    })
  }

  pub fn get(&self, style: &str) -> Option<&ModelHandle<M>> {
    self.handles().find(|handle| handle.style.as_str() == style)
  }

  /// 释放所有模型，只保留加载失败的记录
  pub fn into_failures(self) -> Vec<(usize, LoadError)> {
    self
      .slots
      .into_iter()
      .filter_map(|slot| match slot {
        Slot::Ready(_) => None,
        Slot::Invalid(index, e) => Some((index, e)),
      })
      .collect()
  }
}
