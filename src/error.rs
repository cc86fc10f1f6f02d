// 该文件是 Lubiao （路标） 项目的一部分。
// src/error.rs - 错误类型定义
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

use thiserror::Error;

use crate::preprocess::TensorShape;

/// 预处理错误：该帧被丢弃，流水线继续运行
#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("像素缓冲区长度不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferMismatch { expected: usize, actual: usize },
}

/// 推理错误：该帧被丢弃；连续多次失败后流水线上报引擎不可用
#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("模型没有产生任何输出")]
  EmptyOutput,
  #[error("推理后端错误: {0}")]
  Backend(#[from] ort::Error),
}

/// 模型加载错误：启动阶段致命，流水线无法创建
#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("模型读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  Backend(#[from] ort::Error),
}

/// 配置错误：构造阶段致命，处理任何帧之前快速失败
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("输入分辨率无效: {width}x{height}")]
  InvalidResolution { width: u32, height: u32 },
  #[error("阈值 {name} 必须位于 (0, 1) 区间, 实际为 {value}")]
  InvalidThreshold { name: &'static str, value: f32 },
  #[error("计数 {name} 必须大于 0")]
  InvalidCount { name: &'static str },
  #[error("标签表无效: {0}")]
  InvalidLabelTable(String),
  #[error("引擎输入形状 {engine:?} 与配置 {config:?} 不一致")]
  EngineShapeMismatch {
    engine: TensorShape,
    config: TensorShape,
  },
  #[error("配置文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  Parse(#[from] serde_json::Error),
}

/// 流水线级错误
///
/// 逐帧错误（预处理、单次推理失败）在流水线内部恢复，不会出现在这里。
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("推理引擎连续失败 {failures} 次, 已不可用")]
  EngineUnavailable { failures: u32 },
  #[error("流水线已停止")]
  Stopped,
}
