// 该文件是 Lubiao （路标） 项目的一部分。
// src/engine.rs - 推理引擎接口
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

use crate::error::InferenceError;
use crate::preprocess::{Tensor, TensorShape};

/// 一次推理产生的原始输出，在当前帧周期内消费并丢弃
#[derive(Debug, Clone)]
pub struct RawOutput {
  pub data: Vec<f32>,
  pub shape: Vec<usize>,
}

/// 推理引擎能力接口
///
/// 模型格式只有实现方可见；更换后端不影响预处理、
/// 后处理与跟踪。`run` 以 `&mut self` 串行化同一引擎
/// 实例上的调用，禁止并发执行。
pub trait Engine: Send {
  /// 模型期望的输入张量形状
  fn input_shape(&self) -> TensorShape;

  /// 同步执行一次前向推理
  fn run(&mut self, tensor: &Tensor) -> Result<RawOutput, InferenceError>;
}

mod onnx;
pub use self::onnx::{OnnxEngine, OnnxEngineBuilder};
