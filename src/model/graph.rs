// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/model/graph.rs - 计算图模型
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

use std::io::Cursor;

use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

use super::descriptor::SignatureNames;
use super::{Predict, PredictError};
use crate::config::INPUT_SIZE;
use crate::frame::{AsNhwcTensor, InputTensor, RGB_CHANNELS};
use crate::resolve::{OutputTensor, RawOutput};

type Plan = TypedRunnableModel<TypedModel>;

#[derive(Error, Debug)]
pub enum GraphError {
  #[error("计算图解析失败: {0:#}")]
  Parse(TractError),
  #[error("计算图规划失败: {0:#}")]
  Planning(TractError),
  #[error("计算图无法直接执行, 且描述文件中没有签名")]
  NoGraphSignature,
  #[error("计算图执行失败: {0:#}")]
  Execution(TractError),
}

/// 不可变计算图，输入固定为 (1, 224, 224, 3) f32
///
/// 同时保留两份执行计划：不指定名称的默认计划，以及按签名中第一个输入输出名构建的计划。
pub struct GraphPredictor {
  plain: Option<Plan>,
  named: Option<Plan>,
  names: Option<SignatureNames>,
}

impl std::fmt::Debug for GraphPredictor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GraphPredictor")
      .field("plain", &self.plain.is_some())
      .field("named", &self.named.is_some())
      .field("names", &self.names)
      .finish()
  }
}

impl GraphPredictor {
  pub fn from_bytes(graph: &[u8], names: Option<SignatureNames>) -> Result<Self, GraphError> {
    info!(
      "构建计算图执行计划, 大小: {:.2} MB",
      graph.len() as f64 / (1024.0 * 1024.0)
    );

    let model = tract_onnx::onnx()
      .model_for_read(&mut Cursor::new(graph))
      .map_err(GraphError::Parse)?;

    let plain = match build_plan(model.clone(), None) {
      Ok(plan) => Some(plan),
      Err(e) if names.is_none() => {
        warn!("默认执行计划构建失败: {:#}", e);
        return Err(GraphError::NoGraphSignature);
      }
      Err(e) => {
        warn!("默认执行计划构建失败, 仅使用签名名称: {:#}", e);
        None
      }
    };

    let named = match &names {
      None => None,
      Some(names) => match build_plan(model, Some(names)) {
        Ok(plan) => {
          debug!("签名执行计划: 输入 {}, 输出 {}", names.input, names.output);
          Some(plan)
        }
        Err(e) if plain.is_none() => return Err(GraphError::Planning(e)),
        Err(e) => {
          warn!("签名执行计划构建失败: {:#}", e);
          None
        }
      },
    };

    Ok(Self {
      plain,
      named,
      names,
    })
  }

  pub fn signature(&self) -> Option<&SignatureNames> {
    self.names.as_ref()
  }

  fn run(&self, input: &Tensor) -> Result<TVec<TValue>, GraphError> {
    let named = self.named.as_ref().map(|plan| || run_plan(plan, input));
    match &self.plain {
      Some(plain) => run_with_fallback(|| run_plan(plain, input), named),
      None => match named {
        Some(named) => named().map_err(GraphError::Execution),
        None => Err(GraphError::NoGraphSignature),
      },
    }
  }
}

fn build_plan(mut model: InferenceModel, names: Option<&SignatureNames>) -> TractResult<Plan> {
  let side = INPUT_SIZE as usize;
  if let Some(names) = names {
    model = model
      .with_input_names([names.input.as_str()])?
      .with_output_names([names.output.as_str()])?;
  }
  model
    .with_input_fact(
      0,
      InferenceFact::dt_shape(f32::datum_type(), tvec!(1, side, side, RGB_CHANNELS)),
    )?
    .into_optimized()?
    .into_runnable()
}

fn run_plan(plan: &Plan, input: &Tensor) -> TractResult<TVec<TValue>> {
  plan.run(tvec!(input.clone().into()))
}

/// 先执行默认计划，失败时回退到签名计划；没有签名时报告 `NoGraphSignature`
pub fn run_with_fallback<T, P, N>(plain: P, named: Option<N>) -> Result<T, GraphError>
where
  P: FnOnce() -> TractResult<T>,
  N: FnOnce() -> TractResult<T>,
{
  match plain() {
    Ok(value) => Ok(value),
    Err(e) => match named {
      None => {
        warn!("默认执行计划运行失败: {:#}", e);
        Err(GraphError::NoGraphSignature)
      }
      Some(named) => {
        warn!("默认执行计划运行失败, 改用签名名称: {:#}", e);
        named().map_err(GraphError::Execution)
      }
    },
  }
}

impl Predict for GraphPredictor {
  fn execute(&self, input: InputTensor) -> Result<RawOutput, PredictError> {
    let [n, h, w, c] = input.shape();
    let tensor = tract_ndarray::Array4::from_shape_vec((n, h, w, c), input.into_vec())
      .map_err(|e| GraphError::Execution(e.into()))?
      .into_tensor();

    let outputs = self.run(&tensor)?;
    let tensors = outputs
      .iter()
      .map(|value| -> TractResult<OutputTensor> {
        let value = value.cast_to::<f32>()?;
        Ok(OutputTensor::new(
          value.shape().to_vec(),
          value.as_slice::<f32>()?.to_vec(),
        ))
      })
      .collect::<Result<Vec<_>, _>>()
      .map_err(GraphError::Execution)?;
    debug!("计算图输出 {} 个张量", tensors.len());

    Ok(RawOutput::new(tensors))
  }
}
