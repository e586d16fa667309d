// 该文件是 Huafeng （画风） 项目的一部分。
// src/model/transformer.rs - 前馈风格迁移网络（candle 后端）
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

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  device::DeviceSpec,
  frame::{FrameError, Tensor as FrameTensor},
  model::{Backend, ExecutionConfig, GraphDescriptor},
};

const INSTANCE_NORM_EPS: f64 = 1e-5;

#[derive(Error, Debug)]
pub enum CandleBackendError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Candle 错误: {0}")]
  CandleError(#[from] candle_core::Error),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("网络结构无效: {0}")]
  InvalidGraph(String),
  #[error("输入与网络 {blob} 不匹配: {reason}")]
  InputMismatch { blob: String, reason: String },
}

/// 反射填充的索引，`len` 必须大于 `pad`
fn reflection_indices(len: usize, pad: usize) -> Vec<u32> {
  let last = len as isize - 1;
  (0..len + 2 * pad)
    .map(|i| {
      let i = i as isize - pad as isize;
      let reflected = if i < 0 {
        -i
      } else if i > last {
        2 * last - i
      } else {
        i
      };
      reflected as u32
    })
    .collect()
}

fn reflection_pad2d(xs: &Tensor, pad: usize) -> candle_core::Result<Tensor> {
  if pad == 0 {
    return Ok(xs.clone());
  }
  let (_, _, h, w) = xs.dims4()?;
  if h <= pad || w <= pad {
    return Err(candle_core::Error::Msg(format!(
      "特征图 {}x{} 过小，无法反射填充 {}",
      w, h, pad
    )));
  }
  let rows = Tensor::new(reflection_indices(h, pad).as_slice(), xs.device())?;
  let cols = Tensor::new(reflection_indices(w, pad).as_slice(), xs.device())?;
  xs.index_select(&rows, 2)?.index_select(&cols, 3)
}

/// 反射填充 + 卷积，可选先做最近邻上采样
struct ConvLayer {
  conv: Conv2d,
  pad: usize,
  upsample: Option<usize>,
}

impl ConvLayer {
  fn new(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    upsample: Option<usize>,
    vb: VarBuilder,
  ) -> candle_core::Result<Self> {
    let config = Conv2dConfig {
      stride,
      ..Default::default()
    };
    let conv = candle_nn::conv2d(in_channels, out_channels, kernel, config, vb.pp("conv2d"))?;
    Ok(Self {
      conv,
      pad: kernel / 2,
      upsample,
    })
  }
}

impl Module for ConvLayer {
  fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
    let xs = match self.upsample {
      Some(scale) => {
        let (_, _, h, w) = xs.dims4()?;
        xs.upsample_nearest2d(h * scale, w * scale)?
      }
      None => xs.clone(),
    };
    self.conv.forward(&reflection_pad2d(&xs, self.pad)?)
  }
}

struct InstanceNorm {
  weight: Tensor,
  bias: Tensor,
}

impl InstanceNorm {
  fn new(channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
    Ok(Self {
      weight: vb.get(channels, "weight")?,
      bias: vb.get(channels, "bias")?,
    })
  }
}

impl Module for InstanceNorm {
  fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
    let (b, c, h, w) = xs.dims4()?;
    let flat = xs.reshape((b, c, h * w))?;
    let mean = flat.mean_keepdim(2)?;
    let centered = flat.broadcast_sub(&mean)?;
    let var = centered.sqr()?.mean_keepdim(2)?;
    let normed = centered.broadcast_div(&var.affine(1.0, INSTANCE_NORM_EPS)?.sqrt()?)?;
    normed
      .broadcast_mul(&self.weight.reshape((1, c, 1))?)?
      .broadcast_add(&self.bias.reshape((1, c, 1))?)?
      .reshape((b, c, h, w))
  }
}

struct ResidualBlock {
  conv1: ConvLayer,
  in1: InstanceNorm,
  conv2: ConvLayer,
  in2: InstanceNorm,
}

impl ResidualBlock {
  fn new(channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
    Ok(Self {
      conv1: ConvLayer::new(channels, channels, 3, 1, None, vb.pp("conv1"))?,
      in1: InstanceNorm::new(channels, vb.pp("in1"))?,
      conv2: ConvLayer::new(channels, channels, 3, 1, None, vb.pp("conv2"))?,
      in2: InstanceNorm::new(channels, vb.pp("in2"))?,
    })
  }
}

impl Module for ResidualBlock {
  fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
    let ys = self.in1.forward(&self.conv1.forward(xs)?)?.relu()?;
    let ys = self.in2.forward(&self.conv2.forward(&ys)?)?;
    ys + xs
  }
}

/// 前馈风格迁移网络
///
/// 结构：9x9 卷积，两次步长为 2 的下采样卷积，若干残差块，两次上采样卷积，
/// 最后 9x9 卷积还原到输入通道数。参数命名与 PyTorch `fast_neural_style` 一致。
pub struct TransformerNet {
  conv1: ConvLayer,
  in1: InstanceNorm,
  conv2: ConvLayer,
  in2: InstanceNorm,
  conv3: ConvLayer,
  in3: InstanceNorm,
  residuals: Vec<ResidualBlock>,
  deconv1: ConvLayer,
  in4: InstanceNorm,
  deconv2: ConvLayer,
  in5: InstanceNorm,
  deconv3: ConvLayer,
}

impl TransformerNet {
  pub fn new(descriptor: &GraphDescriptor, vb: VarBuilder) -> candle_core::Result<Self> {
    let input = descriptor.input_channels;
    let c1 = descriptor.base_channels;
    let (c2, c3) = (c1 * 2, c1 * 4);

    let residuals = (1..=descriptor.residual_blocks)
      .map(|i| ResidualBlock::new(c3, vb.pp(format!("res{}", i))))
      .collect::<candle_core::Result<Vec<_>>>()?;

    Ok(Self {
      conv1: ConvLayer::new(input, c1, 9, 1, None, vb.pp("conv1"))?,
      in1: InstanceNorm::new(c1, vb.pp("in1"))?,
      conv2: ConvLayer::new(c1, c2, 3, 2, None, vb.pp("conv2"))?,
      in2: InstanceNorm::new(c2, vb.pp("in2"))?,
      conv3: ConvLayer::new(c2, c3, 3, 2, None, vb.pp("conv3"))?,
      in3: InstanceNorm::new(c3, vb.pp("in3"))?,
      residuals,
      deconv1: ConvLayer::new(c3, c2, 3, 1, Some(2), vb.pp("deconv1"))?,
      in4: InstanceNorm::new(c2, vb.pp("in4"))?,
      deconv2: ConvLayer::new(c2, c1, 3, 1, Some(2), vb.pp("deconv2"))?,
      in5: InstanceNorm::new(c1, vb.pp("in5"))?,
      deconv3: ConvLayer::new(c1, input, 9, 1, None, vb.pp("deconv3"))?,
    })
  }
}

impl Module for TransformerNet {
  fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
    let ys = self.in1.forward(&self.conv1.forward(xs)?)?.relu()?;
    let ys = self.in2.forward(&self.conv2.forward(&ys)?)?.relu()?;
    let mut ys = self.in3.forward(&self.conv3.forward(&ys)?)?.relu()?;
    for block in &self.residuals {
      ys = block.forward(&ys)?;
    }
    let ys = self.in4.forward(&self.deconv1.forward(&ys)?)?.relu()?;
    let ys = self.in5.forward(&self.deconv2.forward(&ys)?)?.relu()?;
    self.deconv3.forward(&ys)
  }
}

/// 已应用执行配置、尚未加载权重的网络结构
pub struct TransformerGraph {
  descriptor: GraphDescriptor,
  device: Device,
}

/// 网络结构 + 某一风格的权重
pub struct TransformerModel {
  net: TransformerNet,
  descriptor: GraphDescriptor,
  device: Device,
}

/// 基于 candle 的推理后端
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleBackend;

impl Backend for CandleBackend {
  type Device = Device;
  type Graph = TransformerGraph;
  type Model = TransformerModel;
  type Error = CandleBackendError;

  fn acquire_device(&self, config: &ExecutionConfig) -> Result<Self::Device, Self::Error> {
    let device = match config.device {
      DeviceSpec::Cpu => Device::Cpu,
      DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal)?,
      DeviceSpec::Metal(ordinal) => Device::new_metal(ordinal)?,
    };
    debug!("设备已就绪: {:?}", device);
    Ok(device)
  }

  fn release_device(&self, device: &Self::Device) {
    debug!("设备已释放: {:?}", device);
  }

  fn load_graph(
    &self,
    device: &Self::Device,
    config: &ExecutionConfig,
    descriptor: &GraphDescriptor,
  ) -> Result<Self::Graph, Self::Error> {
    descriptor
      .validate()
      .map_err(|e| CandleBackendError::InvalidGraph(e.to_string()))?;
    debug!(
      "网络结构 {}: 残差块 {}, 基础通道 {}, 设备 {}",
      descriptor.name, descriptor.residual_blocks, descriptor.base_channels, config.device
    );
    Ok(TransformerGraph {
      descriptor: descriptor.clone(),
      device: device.clone(),
    })
  }

  fn load_weights(&self, graph: Self::Graph, weights: &Path) -> Result<Self::Model, Self::Error> {
    info!("加载权重文件: {}", weights.display());
    let data = std::fs::read(weights)?;
    debug!(
      "权重文件大小: {:.2} MB",
      data.len() as f64 / (1024.0 * 1024.0)
    );

    let vb = VarBuilder::from_buffered_safetensors(data, DType::F32, &graph.device)?;
    let net = TransformerNet::new(&graph.descriptor, vb)?;

    Ok(TransformerModel {
      net,
      descriptor: graph.descriptor,
      device: graph.device,
    })
  }

  fn run_graph(&self, model: &Self::Model, input: &FrameTensor) -> Result<FrameTensor, Self::Error> {
    let descriptor = &model.descriptor;
    let mismatch = |reason: String| CandleBackendError::InputMismatch {
      blob: descriptor.input_blob.clone(),
      reason,
    };
    if input.channels() != descriptor.input_channels {
      return Err(mismatch(format!(
        "通道数 {} != {}",
        input.channels(),
        descriptor.input_channels
      )));
    }
    if input.order() != descriptor.color_order {
      return Err(mismatch(format!(
        "颜色顺序 {:?} != {:?}",
        input.order(),
        descriptor.color_order
      )));
    }

    let shape = (
      1,
      input.channels(),
      input.height() as usize,
      input.width() as usize,
    );
    let xs = Tensor::from_slice(input.as_slice(), shape, &model.device)?;
    let ys = model.net.forward(&xs)?;

    let (_, channels, height, width) = ys.dims4()?;
    debug!("{}: {}x{}x{}", descriptor.output_blob, width, height, channels);
    let data = ys.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;

    Ok(FrameTensor::new(
      width as u32,
      height as u32,
      channels,
      descriptor.color_order,
      data,
    )?)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use candle_nn::VarMap;

  use super::*;
  use crate::frame::ColorOrder;

  fn small_descriptor() -> GraphDescriptor {
    GraphDescriptor {
      base_channels: 4,
      residual_blocks: 1,
      ..GraphDescriptor::default()
    }
  }

  fn cpu_config() -> ExecutionConfig {
    ExecutionConfig {
      device: DeviceSpec::Cpu,
      allow_cpu_fallback: false,
      workers: 1,
    }
  }

  #[test]
  fn test_reflection_indices() {
    assert_eq!(reflection_indices(4, 2), [2, 1, 0, 1, 2, 3, 2, 1]);
    assert_eq!(reflection_indices(3, 0), [0, 1, 2]);
  }

  #[test]
  fn test_forward_keeps_spatial_size() {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let net = TransformerNet::new(&small_descriptor(), vb).unwrap();
    let xs = Tensor::zeros((1, 3, 16, 24), DType::F32, &Device::Cpu).unwrap();
    let ys = net.forward(&xs).unwrap();
    assert_eq!(ys.dims4().unwrap(), (1, 3, 16, 24));
  }

  #[test]
  fn test_load_and_run_saved_weights() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("style.safetensors");
    let descriptor = small_descriptor();

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    TransformerNet::new(&descriptor, vb).unwrap();
    varmap.save(&path).unwrap();

    let backend = CandleBackend;
    let config = cpu_config();
    let device = backend.acquire_device(&config).unwrap();
    let graph = backend.load_graph(&device, &config, &descriptor).unwrap();
    let model = backend.load_weights(graph, &path).unwrap();

    let input = FrameTensor::new(16, 12, 3, ColorOrder::Rgb, vec![128.0; 16 * 12 * 3]).unwrap();
    let output = backend.run_graph(&model, &input).unwrap();
    assert_eq!((output.width(), output.height(), output.channels()), (16, 12, 3));

    let bgr = FrameTensor::new(16, 12, 3, ColorOrder::Bgr, vec![0.0; 16 * 12 * 3]).unwrap();
    assert!(matches!(
      backend.run_graph(&model, &bgr),
      Err(CandleBackendError::InputMismatch { .. })
    ));
    backend.release_device(&device);
  }

  #[test]
  fn test_missing_truncated_and_mismatched_weights() {
    let dir = tempfile::tempdir().unwrap();
    let backend = CandleBackend;
    let config = cpu_config();
    let device = backend.acquire_device(&config).unwrap();
    let descriptor = small_descriptor();
    let load = |path: &Path| {
      let graph = backend.load_graph(&device, &config, &descriptor).unwrap();
      backend.load_weights(graph, path)
    };

    assert!(matches!(
      load(&dir.path().join("missing.safetensors")),
      Err(CandleBackendError::IoError(_))
    ));

    let truncated = dir.path().join("truncated.safetensors");
    std::fs::write(&truncated, b"\x10\x00\x00").unwrap();
    assert!(matches!(load(&truncated), Err(CandleBackendError::CandleError(_))));

    let mismatched = dir.path().join("mismatched.safetensors");
    let mut tensors = HashMap::new();
    tensors.insert(
      "conv1.conv2d.weight".to_string(),
      Tensor::zeros((4, 3, 3, 3), DType::F32, &Device::Cpu).unwrap(),
    );
    candle_core::safetensors::save(&tensors, &mismatched).unwrap();
    assert!(matches!(load(&mismatched), Err(CandleBackendError::CandleError(_))));
  }

  #[test]
  fn test_invalid_graph_rejected() {
    let backend = CandleBackend;
    let config = cpu_config();
    let descriptor = GraphDescriptor {
      input_channels: 4,
      ..GraphDescriptor::default()
    };
    assert!(matches!(
      backend.load_graph(&Device::Cpu, &config, &descriptor),
      Err(CandleBackendError::InvalidGraph(_))
    ));
  }
}
