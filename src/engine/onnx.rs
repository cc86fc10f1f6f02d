// 该文件是 Lubiao （路标） 项目的一部分。
// src/engine/onnx.rs - ONNX Runtime 推理后端
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

use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::{Tensor as OrtTensor, Value};
use tracing::{debug, info};

use crate::engine::{Engine, RawOutput};
use crate::error::{InferenceError, ModelLoadError};
use crate::preprocess::{Tensor, TensorShape};

/// ONNX 引擎构建器
///
/// 输入张量形状由配置固定给出，运行期不重新协商。
pub struct OnnxEngineBuilder {
  model_path: PathBuf,
  input_shape: TensorShape,
  intra_threads: usize,
}

impl OnnxEngineBuilder {
  pub fn new(model_path: impl Into<PathBuf>, input_shape: TensorShape) -> Self {
    Self {
      model_path: model_path.into(),
      input_shape,
      intra_threads: 2,
    }
  }

  pub fn intra_threads(mut self, intra_threads: usize) -> Self {
    self.intra_threads = intra_threads;
    self
  }

  /// 加载模型并创建引擎（一次性，阻塞，可能耗时数百毫秒）
  pub fn build(self) -> Result<OnnxEngine, ModelLoadError> {
    if !self.model_path.exists() {
      return Err(ModelLoadError::NotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort::Error::from)?
      .with_intra_threads(self.intra_threads)
      .map_err(ort::Error::from)?
      .commit_from_memory(&model_data)?;
    info!("模型加载完成");

    Ok(OnnxEngine {
      session,
      input_shape: self.input_shape,
    })
  }
}

/// 基于 ONNX Runtime 的推理引擎
pub struct OnnxEngine {
  session: Session,
  input_shape: TensorShape,
}

impl Engine for OnnxEngine {
  fn input_shape(&self) -> TensorShape {
    self.input_shape
  }

  fn run(&mut self, tensor: &Tensor) -> Result<RawOutput, InferenceError> {
    if *tensor.shape() != self.input_shape {
      return Err(InferenceError::ShapeMismatch {
        expected: self.input_shape,
        actual: *tensor.shape(),
      });
    }

    let shape = vec![
      1usize,
      self.input_shape.channels,
      self.input_shape.height,
      self.input_shape.width,
    ];
    let input: Value = OrtTensor::from_array((shape, tensor.data().to_vec().into_boxed_slice()))
      .map(Value::from)?;

    debug!("执行模型推理");
    let outputs = self.session.run(ort::inputs![input])?;

    let (name, value) = outputs.iter().next().ok_or(InferenceError::EmptyOutput)?;
    let (out_shape, data) = value.try_extract_tensor::<f32>()?;
    debug!("模型输出 {}: 形状 {:?}", name, out_shape);

    Ok(RawOutput {
      data: data.to_vec(),
      shape: out_shape.iter().map(|&d| d as usize).collect(),
    })
  }
}
