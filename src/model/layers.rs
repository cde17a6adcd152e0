// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/model/layers.rs - 层序列模型的编译与执行
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

//! # 层序列模型
//!
//! 将 Keras 风格的拓扑编译为按位置执行的层列表，张量布局为 NHWC。
//! 函数式模型只接受单链结构。

use ndarray::{Array1, Array2, Array4, ArrayD, Axis, Ix1, Ix2, Ix4, IxDyn, ShapeError, s};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use super::weights::NamedWeights;
use super::{Predict, PredictError};
use crate::frame::{AsNhwcTensor, InputTensor};
use crate::resolve::{OutputTensor, RawOutput, sigmoid};

const BATCH_NORM_EPSILON: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum LayersError {
  #[error("拓扑结构无效: {0}")]
  InvalidTopology(String),
  #[error("不支持的层类型: {0}")]
  UnsupportedLayer(String),
  #[error("层 {layer} 的配置不受支持: {detail}")]
  UnsupportedConfig { layer: String, detail: String },
  #[error("模型不是单链结构, 在层 {0} 处分叉或合并")]
  NotLinear(String),
  #[error("缺少权重: {0}")]
  MissingWeight(String),
  #[error("权重 {name} 形状错误: {shape:?}")]
  WeightShape { name: String, shape: Vec<usize> },
  #[error("层 {layer} 的输入形状不兼容: {shape:?}")]
  IncompatibleShape { layer: String, shape: Vec<usize> },
  #[error("张量形状错误: {0}")]
  ShapeError(#[from] ShapeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
  Linear,
  Relu,
  Sigmoid,
  Softmax,
  Tanh,
}

impl Activation {
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "linear" => Some(Activation::Linear),
      "relu" => Some(Activation::Relu),
      "sigmoid" => Some(Activation::Sigmoid),
      "softmax" => Some(Activation::Softmax),
      "tanh" => Some(Activation::Tanh),
      _ => None,
    }
  }

  fn apply(self, x: &mut ArrayD<f32>) {
    match self {
      Activation::Linear => {}
      Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
      Activation::Sigmoid => x.mapv_inplace(sigmoid),
      Activation::Tanh => x.mapv_inplace(f32::tanh),
      Activation::Softmax => softmax_last_axis(x),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
  Valid,
  Same,
}

impl Padding {
  /// 输出长度与前侧填充量
  fn output(self, input: usize, window: usize, stride: usize) -> Option<(usize, usize)> {
    match self {
      Padding::Valid => {
        if input < window {
          return None;
        }
        Some(((input - window) / stride + 1, 0))
      }
      Padding::Same => {
        let out = input.div_ceil(stride);
        let total = ((out.checked_sub(1)?) * stride + window).saturating_sub(input);
        Some((out, total / 2))
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolKind {
  Max,
  Average,
}

#[derive(Debug, Clone)]
enum Op {
  Identity,
  Rescaling {
    scale: f32,
    offset: f32,
  },
  Conv2D {
    kernel: Array4<f32>,
    bias: Option<Array1<f32>>,
    strides: (usize, usize),
    padding: Padding,
    activation: Activation,
  },
  Pool2D {
    kind: PoolKind,
    size: (usize, usize),
    strides: (usize, usize),
    padding: Padding,
  },
  /// 推理时的批归一化折叠为逐通道的 `x * scale + shift`
  BatchNorm {
    axis: Option<i64>,
    scale: Array1<f32>,
    shift: Array1<f32>,
  },
  GlobalPool(PoolKind),
  Flatten,
  Dense {
    kernel: Array2<f32>,
    bias: Option<Array1<f32>>,
    activation: Activation,
  },
  Activation(Activation),
  Relu {
    max_value: Option<f32>,
    negative_slope: f32,
    threshold: f32,
  },
}

#[derive(Debug, Clone)]
struct CompiledLayer {
  name: String,
  class_name: String,
  op: Op,
}

/// 拓扑中的一个层定义
struct LayerDef<'a> {
  class_name: &'a str,
  name: String,
  config: &'a Map<String, Value>,
  inbound: Vec<String>,
}

impl<'a> LayerDef<'a> {
  fn parse(index: usize, layer: &'a Value) -> Result<Self, LayersError> {
    let class_name = layer
      .get("class_name")
      .and_then(Value::as_str)
      .ok_or_else(|| LayersError::InvalidTopology(format!("第 {} 层缺少 class_name", index)))?;
    let config = layer
      .get("config")
      .and_then(Value::as_object)
      .ok_or_else(|| LayersError::InvalidTopology(format!("第 {} 层缺少 config", index)))?;
    let name = config
      .get("name")
      .or_else(|| layer.get("name"))
      .and_then(Value::as_str)
      .map(str::to_owned)
      .unwrap_or_else(|| format!("{}_{}", class_name.to_lowercase(), index));

    let mut inbound = Vec::new();
    if let Some(nodes) = layer.get("inbound_nodes") {
      collect_inbound(nodes, &mut inbound);
    }

    Ok(Self {
      class_name,
      name,
      config,
      inbound,
    })
  }

  fn unsupported(&self, detail: impl Into<String>) -> LayersError {
    LayersError::UnsupportedConfig {
      layer: self.name.clone(),
      detail: detail.into(),
    }
  }

  fn get(&self, key: &str) -> Option<&'a Value> {
    self.config.get(key).filter(|v| !v.is_null())
  }

  fn f32_or(&self, key: &str, default: f32) -> Result<f32, LayersError> {
    match self.get(key) {
      None => Ok(default),
      Some(v) => v
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| self.unsupported(format!("{} 不是数值: {}", key, v))),
    }
  }

  fn bool_or(&self, key: &str, default: bool) -> Result<bool, LayersError> {
    match self.get(key) {
      None => Ok(default),
      Some(v) => v
        .as_bool()
        .ok_or_else(|| self.unsupported(format!("{} 不是布尔值: {}", key, v))),
    }
  }

  /// 接受整数或二元数组
  fn pair_or(&self, key: &str, default: (usize, usize)) -> Result<(usize, usize), LayersError> {
    let Some(value) = self.get(key) else {
      return Ok(default);
    };
    let pair = match value {
      Value::Number(n) => n.as_u64().map(|v| (v as usize, v as usize)),
      Value::Array(items) if items.len() == 2 => items[0]
        .as_u64()
        .zip(items[1].as_u64())
        .map(|(a, b)| (a as usize, b as usize)),
      _ => None,
    };
    match pair {
      Some((a, b)) if a > 0 && b > 0 => Ok((a, b)),
      _ => Err(self.unsupported(format!("{} 无效: {}", key, value))),
    }
  }

  fn activation(&self) -> Result<Activation, LayersError> {
    match self.get("activation") {
      None => Ok(Activation::Linear),
      Some(Value::String(name)) => {
        Activation::from_name(name).ok_or_else(|| self.unsupported(format!("激活函数 {}", name)))
      }
      Some(other) => Err(self.unsupported(format!("激活函数 {}", other))),
    }
  }

  fn padding(&self) -> Result<Padding, LayersError> {
    match self.get("padding").and_then(Value::as_str).unwrap_or("valid") {
      "valid" => Ok(Padding::Valid),
      "same" => Ok(Padding::Same),
      other => Err(self.unsupported(format!("填充方式 {}", other))),
    }
  }

  fn require_channels_last(&self) -> Result<(), LayersError> {
    match self.get("data_format").and_then(Value::as_str) {
      None | Some("channels_last") => Ok(()),
      Some(other) => Err(self.unsupported(format!("数据布局 {}", other))),
    }
  }

  fn weight(&self, weights: &NamedWeights, param: &str) -> Result<ArrayD<f32>, LayersError> {
    weights
      .find(&self.name, param)
      .cloned()
      .ok_or_else(|| LayersError::MissingWeight(format!("{}/{}", self.name, param)))
  }

  fn weight_1d(&self, weights: &NamedWeights, param: &str) -> Result<Array1<f32>, LayersError> {
    let tensor = self.weight(weights, param)?;
    let shape = tensor.shape().to_vec();
    tensor
      .into_dimensionality::<Ix1>()
      .map_err(|_| self.weight_shape(param, shape))
  }

  fn weight_shape(&self, param: &str, shape: Vec<usize>) -> LayersError {
    LayersError::WeightShape {
      name: format!("{}/{}", self.name, param),
      shape,
    }
  }

  fn compile(&self, weights: &NamedWeights) -> Result<Op, LayersError> {
    match self.class_name {
      "InputLayer" | "Dropout" => Ok(Op::Identity),
      "Rescaling" => Ok(Op::Rescaling {
        scale: self.f32_or("scale", 1.0)?,
        offset: self.f32_or("offset", 0.0)?,
      }),
      "Conv2D" => self.compile_conv2d(weights),
      "MaxPooling2D" | "AveragePooling2D" => {
        self.require_channels_last()?;
        let kind = if self.class_name == "MaxPooling2D" {
          PoolKind::Max
        } else {
          PoolKind::Average
        };
        let size = self.pair_or("pool_size", (2, 2))?;
        Ok(Op::Pool2D {
          kind,
          size,
          strides: self.pair_or("strides", size)?,
          padding: self.padding()?,
        })
      }
      "BatchNormalization" => self.compile_batch_norm(weights),
      "GlobalAveragePooling2D" | "GlobalMaxPooling2D" => {
        self.require_channels_last()?;
        if self.bool_or("keepdims", false)? {
          return Err(self.unsupported("keepdims"));
        }
        Ok(Op::GlobalPool(if self.class_name == "GlobalMaxPooling2D" {
          PoolKind::Max
        } else {
          PoolKind::Average
        }))
      }
      "Flatten" => {
        self.require_channels_last()?;
        Ok(Op::Flatten)
      }
      "Dense" => {
        let kernel = self.weight(weights, "kernel")?;
        let shape = kernel.shape().to_vec();
        let kernel = kernel
          .into_dimensionality::<Ix2>()
          .map_err(|_| self.weight_shape("kernel", shape))?;
        let bias = if self.bool_or("use_bias", true)? {
          let bias = self.weight_1d(weights, "bias")?;
          if bias.len() != kernel.ncols() {
            return Err(self.weight_shape("bias", bias.shape().to_vec()));
          }
          Some(bias)
        } else {
          None
        };
        Ok(Op::Dense {
          kernel,
          bias,
          activation: self.activation()?,
        })
      }
      "Activation" => Ok(Op::Activation(self.activation()?)),
      "Softmax" => {
        match self.get("axis").and_then(Value::as_i64) {
          None | Some(-1) => {}
          Some(axis) => return Err(self.unsupported(format!("softmax 轴 {}", axis))),
        }
        Ok(Op::Activation(Activation::Softmax))
      }
      "ReLU" => Ok(Op::Relu {
        max_value: match self.get("max_value") {
          None => None,
          Some(_) => Some(self.f32_or("max_value", f32::INFINITY)?),
        },
        negative_slope: self.f32_or("negative_slope", 0.0)?,
        threshold: self.f32_or("threshold", 0.0)?,
      }),
      other => Err(LayersError::UnsupportedLayer(other.to_string())),
    }
  }

  fn compile_conv2d(&self, weights: &NamedWeights) -> Result<Op, LayersError> {
    self.require_channels_last()?;
    if self.pair_or("dilation_rate", (1, 1))? != (1, 1) {
      return Err(self.unsupported("dilation_rate"));
    }
    if self.get("groups").and_then(Value::as_u64).is_some_and(|g| g != 1) {
      return Err(self.unsupported("groups"));
    }

    let kernel = self.weight(weights, "kernel")?;
    let shape = kernel.shape().to_vec();
    let kernel = kernel
      .into_dimensionality::<Ix4>()
      .map_err(|_| self.weight_shape("kernel", shape))?;
    let (kh, kw, _, cout) = kernel.dim();
    if self.pair_or("kernel_size", (kh, kw))? != (kh, kw) {
      return Err(self.weight_shape("kernel", kernel.shape().to_vec()));
    }

    let bias = if self.bool_or("use_bias", true)? {
      let bias = self.weight_1d(weights, "bias")?;
      if bias.len() != cout {
        return Err(self.weight_shape("bias", bias.shape().to_vec()));
      }
      Some(bias)
    } else {
      None
    };

    Ok(Op::Conv2D {
      kernel,
      bias,
      strides: self.pair_or("strides", (1, 1))?,
      padding: self.padding()?,
      activation: self.activation()?,
    })
  }

  fn compile_batch_norm(&self, weights: &NamedWeights) -> Result<Op, LayersError> {
    let axis = match self.get("axis") {
      None => None,
      Some(Value::Number(n)) => n.as_i64(),
      Some(Value::Array(items)) if items.len() == 1 => items[0].as_i64(),
      Some(other) => return Err(self.unsupported(format!("axis {}", other))),
    };
    let epsilon = self.f32_or("epsilon", BATCH_NORM_EPSILON)?;
    let mean = self.weight_1d(weights, "moving_mean")?;
    let variance = self.weight_1d(weights, "moving_variance")?;
    let channels = mean.len();

    let gamma = if self.bool_or("scale", true)? {
      self.weight_1d(weights, "gamma")?
    } else {
      Array1::ones(channels)
    };
    let beta = if self.bool_or("center", true)? {
      self.weight_1d(weights, "beta")?
    } else {
      Array1::zeros(channels)
    };
    for (param, len) in [
      ("moving_variance", variance.len()),
      ("gamma", gamma.len()),
      ("beta", beta.len()),
    ] {
      if len != channels {
        return Err(self.weight_shape(param, vec![len]));
      }
    }

    let scale = &gamma / &variance.mapv(|v| (v + epsilon).sqrt());
    let shift = &beta - &(&mean * &scale);
    Ok(Op::BatchNorm { axis, scale, shift })
  }
}

/// 收集 `inbound_nodes` 中引用的上游层名
fn collect_inbound(value: &Value, names: &mut Vec<String>) {
  match value {
    // ["layer_name", node_index, tensor_index, ...]
    Value::Array(items)
      if matches!(items.first(), Some(Value::String(_))) && items.get(1).is_some_and(Value::is_number) =>
    {
      if let Some(Value::String(name)) = items.first() {
        names.push(name.clone());
      }
    }
    Value::Array(items) => items.iter().for_each(|item| collect_inbound(item, names)),
    Value::Object(map) => match map.get("keras_history") {
      Some(history) => collect_inbound(history, names),
      None => map.values().for_each(|item| collect_inbound(item, names)),
    },
    _ => {}
  }
}

/// 已编译的层序列模型
#[derive(Debug, Clone)]
pub struct LayersPredictor {
  layers: Vec<CompiledLayer>,
}

impl LayersPredictor {
  pub fn compile(topology: &Value, weights: &NamedWeights) -> Result<Self, LayersError> {
    let model = topology.get("model_config").unwrap_or(topology);
    let class_name = model
      .get("class_name")
      .and_then(Value::as_str)
      .unwrap_or("Sequential");
    let config = model
      .get("config")
      .ok_or_else(|| LayersError::InvalidTopology("缺少 config".to_string()))?;
    let layers = match config {
      Value::Array(layers) => layers,
      Value::Object(map) => map
        .get("layers")
        .and_then(Value::as_array)
        .ok_or_else(|| LayersError::InvalidTopology("缺少 layers".to_string()))?,
      _ => return Err(LayersError::InvalidTopology("config 类型错误".to_string())),
    };

    let defs = layers
      .iter()
      .enumerate()
      .map(|(i, layer)| LayerDef::parse(i, layer))
      .collect::<Result<Vec<_>, _>>()?;
    if defs.is_empty() {
      return Err(LayersError::InvalidTopology("没有任何层".to_string()));
    }

    match class_name {
      "Sequential" => {}
      "Functional" | "Model" => check_linear_chain(&defs)?,
      other => return Err(LayersError::InvalidTopology(format!("未知的模型类型 {}", other))),
    }

    let compiled = defs
      .iter()
      .map(|def| -> Result<CompiledLayer, LayersError> {
        let op = def.compile(weights)?;
        debug!("编译层 {} ({})", def.name, def.class_name);
        Ok(CompiledLayer {
          name: def.name.clone(),
          class_name: def.class_name.to_string(),
          op,
        })
      })
      .collect::<Result<Vec<_>, _>>()?;
    info!("层序列模型编译完成, 共 {} 层", compiled.len());

    Ok(Self { layers: compiled })
  }

  pub fn layer_names(&self) -> impl Iterator<Item = &str> {
    self.layers.iter().map(|l| l.name.as_str())
  }

  /// 按位置依次执行每一层
  pub fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, LayersError> {
    self
      .layers
      .iter()
      .try_fold(input, |x, layer| layer.forward(x))
  }
}

impl Predict for LayersPredictor {
  fn execute(&self, input: InputTensor) -> Result<RawOutput, PredictError> {
    let shape = input.shape();
    let x = ArrayD::from_shape_vec(IxDyn(&shape), input.into_vec()).map_err(LayersError::from)?;
    let y = self.forward(x)?;
    Ok(OutputTensor::new(y.shape().to_vec(), y.iter().copied().collect()).into())
  }
}

fn check_linear_chain(defs: &[LayerDef<'_>]) -> Result<(), LayersError> {
  if !defs[0].inbound.is_empty() {
    return Err(LayersError::NotLinear(defs[0].name.clone()));
  }
  for pair in defs.windows(2) {
    let (prev, cur) = (&pair[0], &pair[1]);
    if cur.inbound.len() != 1 || cur.inbound[0] != prev.name {
      return Err(LayersError::NotLinear(cur.name.clone()));
    }
  }
  Ok(())
}

impl CompiledLayer {
  fn incompatible(&self, shape: &[usize]) -> LayersError {
    LayersError::IncompatibleShape {
      layer: format!("{} ({})", self.name, self.class_name),
      shape: shape.to_vec(),
    }
  }

  fn nhwc(&self, x: ArrayD<f32>) -> Result<Array4<f32>, LayersError> {
    let shape = x.shape().to_vec();
    x.into_dimensionality::<Ix4>()
      .map_err(|_| self.incompatible(&shape))
  }

  fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>, LayersError> {
    match &self.op {
      Op::Identity => Ok(x),
      Op::Rescaling { scale, offset } => Ok(x.mapv(|v| v * scale + offset)),
      Op::Conv2D {
        kernel,
        bias,
        strides,
        padding,
        activation,
      } => {
        let x = self.nhwc(x)?;
        if x.dim().3 != kernel.dim().2 {
          return Err(self.incompatible(x.shape()));
        }
        let mut y = conv2d(&x, kernel, bias.as_ref(), *strides, *padding)
          .ok_or_else(|| self.incompatible(x.shape()))?
          .into_dyn();
        activation.apply(&mut y);
        Ok(y)
      }
      Op::Pool2D {
        kind,
        size,
        strides,
        padding,
      } => {
        let x = self.nhwc(x)?;
        pool2d(&x, *kind, *size, *strides, *padding)
          .map(Array4::into_dyn)
          .ok_or_else(|| self.incompatible(x.shape()))
      }
      Op::BatchNorm { axis, scale, shift } => {
        let last = x.ndim().saturating_sub(1);
        let axis_ok = match axis {
          None | Some(-1) => true,
          Some(a) => *a >= 0 && *a as usize == last,
        };
        if x.ndim() == 0 || !axis_ok || x.shape()[last] != scale.len() {
          return Err(self.incompatible(x.shape()));
        }
        let mut x = x;
        for mut lane in x.lanes_mut(Axis(last)) {
          for ((v, s), t) in lane.iter_mut().zip(scale).zip(shift) {
            *v = *v * s + t;
          }
        }
        Ok(x)
      }
      Op::GlobalPool(kind) => {
        let x = self.nhwc(x)?;
        let (_, h, w, _) = x.dim();
        if h == 0 || w == 0 {
          return Err(self.incompatible(x.shape()));
        }
        let y = match kind {
          PoolKind::Average => x.sum_axis(Axis(1)).sum_axis(Axis(1)) / (h * w) as f32,
          PoolKind::Max => x
            .fold_axis(Axis(1), f32::NEG_INFINITY, |a, b| a.max(*b))
            .fold_axis(Axis(1), f32::NEG_INFINITY, |a, b| a.max(*b)),
        };
        Ok(y.into_dyn())
      }
      Op::Flatten => {
        if x.ndim() == 0 {
          return Err(self.incompatible(x.shape()));
        }
        let batch = x.shape()[0];
        let rest = x.len() / batch.max(1);
        Ok(
          x.as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&[batch, rest]))?,
        )
      }
      Op::Dense {
        kernel,
        bias,
        activation,
      } => {
        let shape = x.shape().to_vec();
        let Some(&last) = shape.last() else {
          return Err(self.incompatible(&shape));
        };
        if last != kernel.nrows() {
          return Err(self.incompatible(&shape));
        }
        let rows = x.len() / last.max(1);
        let flat = x
          .as_standard_layout()
          .into_owned()
          .into_shape_with_order((rows, last))?;
        let mut y = flat.dot(kernel);
        if let Some(bias) = bias {
          y += bias;
        }
        let mut out_shape = shape;
        if let Some(units) = out_shape.last_mut() {
          *units = kernel.ncols();
        }
        let mut y = y.into_shape_with_order(IxDyn(&out_shape))?;
        activation.apply(&mut y);
        Ok(y)
      }
      Op::Activation(activation) => {
        let mut x = x;
        activation.apply(&mut x);
        Ok(x)
      }
      Op::Relu {
        max_value,
        negative_slope,
        threshold,
      } => Ok(x.mapv(|v| {
        let v = if v >= *threshold {
          v
        } else {
          negative_slope * (v - threshold)
        };
        max_value.map_or(v, |m| v.min(m))
      })),
    }
  }
}

fn conv2d(
  x: &Array4<f32>,
  kernel: &Array4<f32>,
  bias: Option<&Array1<f32>>,
  (sh, sw): (usize, usize),
  padding: Padding,
) -> Option<Array4<f32>> {
  let (batch, h, w, _) = x.dim();
  let (kh, kw, _, cout) = kernel.dim();
  let (oh, pad_top) = padding.output(h, kh, sh)?;
  let (ow, pad_left) = padding.output(w, kw, sw)?;

  let mut out = Array4::<f32>::zeros((batch, oh, ow, cout));
  for n in 0..batch {
    for oy in 0..oh {
      for ox in 0..ow {
        let mut acc = match bias {
          Some(bias) => bias.clone(),
          None => Array1::zeros(cout),
        };
        for ky in 0..kh {
          let Some(iy) = (oy * sh + ky).checked_sub(pad_top).filter(|&iy| iy < h) else {
            continue;
          };
          for kx in 0..kw {
            let Some(ix) = (ox * sw + kx).checked_sub(pad_left).filter(|&ix| ix < w) else {
              continue;
            };
            let pixel = x.slice(s![n, iy, ix, ..]);
            let taps = kernel.slice(s![ky, kx, .., ..]);
            acc += &pixel.dot(&taps);
          }
        }
        out.slice_mut(s![n, oy, ox, ..]).assign(&acc);
      }
    }
  }
  Some(out)
}

/// 填充位置不参与最大值或均值计算
fn pool2d(
  x: &Array4<f32>,
  kind: PoolKind,
  (ph, pw): (usize, usize),
  (sh, sw): (usize, usize),
  padding: Padding,
) -> Option<Array4<f32>> {
  let (batch, h, w, channels) = x.dim();
  let (oh, pad_top) = padding.output(h, ph, sh)?;
  let (ow, pad_left) = padding.output(w, pw, sw)?;

  let mut out = Array4::<f32>::zeros((batch, oh, ow, channels));
  for n in 0..batch {
    for oy in 0..oh {
      let y0 = (oy * sh).saturating_sub(pad_top);
      let y1 = (oy * sh + ph).saturating_sub(pad_top).min(h);
      for ox in 0..ow {
        let x0 = (ox * sw).saturating_sub(pad_left);
        let x1 = (ox * sw + pw).saturating_sub(pad_left).min(w);
        let window = x.slice(s![n, y0..y1, x0..x1, ..]);
        let count = ((y1 - y0) * (x1 - x0)).max(1) as f32;
        for c in 0..channels {
          let values = window.slice(s![.., .., c]);
          out[[n, oy, ox, c]] = match kind {
            PoolKind::Max => values.fold(f32::NEG_INFINITY, |a, &b| a.max(b)),
            PoolKind::Average => values.sum() / count,
          };
        }
      }
    }
  }
  Some(out)
}

fn softmax_last_axis(x: &mut ArrayD<f32>) {
  if x.ndim() == 0 {
    return;
  }
  let last = x.ndim() - 1;
  for mut lane in x.lanes_mut(Axis(last)) {
    let max = lane.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    lane.mapv_inplace(|v| (v - max).exp());
    let sum = lane.sum();
    if sum > 0.0 {
      lane.mapv_inplace(|v| v / sum);
    }
  }
}
