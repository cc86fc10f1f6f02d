// 该文件是 Lubiao （路标） 项目的一部分。
// src/pipeline.rs - 推理流水线编排
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

use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::engine::{Engine, OnnxEngineBuilder};
use crate::error::{ConfigError, PipelineError};
use crate::frame::Frame;
use crate::labels::LabelTable;
use crate::postprocess::Decoder;
use crate::preprocess::{Preprocessor, TensorPool};
use crate::track::{Track, Tracker};

/// 流水线编排器
///
/// 拥有预处理器、缓冲池、推理引擎、解码器与跟踪器；
/// 引擎在整个生命周期内只加载一次。所有组件归属调用
/// `process_frame` 的那个线程，实例之间没有共享状态，
/// 可独立创建多个流水线。
pub struct Pipeline {
  config: PipelineConfig,
  preprocessor: Preprocessor,
  pool: TensorPool,
  engine: Option<Box<dyn Engine>>,
  decoder: Decoder,
  tracker: Tracker,
  consecutive_failures: u32,
}

impl Pipeline {
  /// 校验配置、加载模型并启动流水线
  ///
  /// 配置或模型错误在此处快速失败，之后不再出现致命的
  /// 构造类错误。
  pub fn start(
    model_path: impl AsRef<Path>,
    config: PipelineConfig,
  ) -> Result<Self, PipelineError> {
    config.validate()?;
    let engine = OnnxEngineBuilder::new(model_path.as_ref(), config.tensor_shape()).build()?;
    Self::with_engine(Box::new(engine), config)
  }

  /// 使用外部提供的引擎启动流水线
  ///
  /// 更换推理后端或在测试中注入桩引擎的接缝。
  pub fn with_engine(
    engine: Box<dyn Engine>,
    config: PipelineConfig,
  ) -> Result<Self, PipelineError> {
    config.validate()?;

    if engine.input_shape() != config.tensor_shape() {
      return Err(
        ConfigError::EngineShapeMismatch {
          engine: engine.input_shape(),
          config: config.tensor_shape(),
        }
        .into(),
      );
    }

    let labels = match &config.label_file {
      Some(path) => LabelTable::from_json_file(path).map_err(PipelineError::Config)?,
      None => LabelTable::default(),
    };
    info!("标签表共 {} 类", labels.len());

    let preprocessor = Preprocessor::new(config.resize_policy, config.normalization);
    let pool = TensorPool::new(config.tensor_shape());
    let decoder = Decoder::new(labels, config.confidence_threshold, config.nms_iou_threshold);
    let tracker = Tracker::new(
      config.match_iou_threshold,
      config.confirm_hits,
      config.expire_misses,
    );

    info!("流水线启动完成");
    Ok(Self {
      config,
      preprocessor,
      pool,
      engine: Some(engine),
      decoder,
      tracker,
      consecutive_failures: 0,
    })
  }

  /// 同步处理一帧，返回当前确认轨迹
  ///
  /// 坏帧与单次推理失败在此处恢复：丢弃该帧并返回现有
  /// 确认轨迹，不跨越调用边界抛出。连续推理失败达到
  /// 配置上限时上报 `EngineUnavailable`。
  pub fn process_frame(&mut self, frame: &Frame) -> Result<Vec<Track>, PipelineError> {
    let Some(engine) = self.engine.as_mut() else {
      return Err(PipelineError::Stopped);
    };

    let slot = self.pool.acquire();
    let transform = match self
      .preprocessor
      .prepare_into(frame, self.pool.get_mut(&slot))
    {
      Ok(transform) => transform,
      Err(e) => {
        warn!("预处理失败, 丢弃该帧: {}", e);
        self.pool.release(slot);
        return Ok(self.tracker.confirmed());
      }
    };

    let raw = match engine.run(self.pool.get(&slot)) {
      Ok(raw) => {
        self.consecutive_failures = 0;
        raw
      }
      Err(e) => {
        self.pool.release(slot);
        self.consecutive_failures += 1;
        warn!(
          "推理失败 ({}/{}), 丢弃该帧: {}",
          self.consecutive_failures, self.config.max_consecutive_failures, e
        );
        if self.consecutive_failures >= self.config.max_consecutive_failures {
          error!("推理引擎连续失败, 上报不可用");
          return Err(PipelineError::EngineUnavailable {
            failures: self.consecutive_failures,
          });
        }
        return Ok(self.tracker.confirmed());
      }
    };
    self.pool.release(slot);

    let detections = self
      .decoder
      .decode(&raw, &transform, frame.timestamp_ms());
    Ok(self.tracker.update(detections))
  }

  /// 停止流水线，释放引擎与缓冲池
  ///
  /// 幂等：重复调用不会二次释放。停止后 `process_frame`
  /// 返回 `Stopped`。
  pub fn stop(&mut self) {
    if let Some(engine) = self.engine.take() {
      drop(engine);
      info!("推理引擎已释放");
    }
    self.pool.clear();
    self.tracker.clear();
  }

  pub fn is_running(&self) -> bool {
    self.engine.is_some()
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }
}

impl Drop for Pipeline {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::RawOutput;
  use crate::error::InferenceError;
  use crate::frame::{Orientation, PixelFormat};
  use crate::preprocess::{Tensor, TensorShape};

  /// 桩引擎：按脚本逐帧返回输出或失败
  pub struct ScriptedEngine {
    shape: TensorShape,
    script: Vec<Result<RawOutput, InferenceError>>,
    cursor: usize,
  }

  impl ScriptedEngine {
    pub fn new(shape: TensorShape, script: Vec<Result<RawOutput, InferenceError>>) -> Self {
      Self {
        shape,
        script,
        cursor: 0,
      }
    }
  }

  impl Engine for ScriptedEngine {
    fn input_shape(&self) -> TensorShape {
      self.shape
    }

    fn run(&mut self, tensor: &Tensor) -> Result<RawOutput, InferenceError> {
      assert_eq!(*tensor.shape(), self.shape);
      let index = self.cursor.min(self.script.len() - 1);
      self.cursor += 1;
      match &self.script[index] {
        Ok(raw) => Ok(raw.clone()),
        Err(_) => Err(InferenceError::EmptyOutput),
      }
    }
  }

  fn test_config() -> PipelineConfig {
    PipelineConfig {
      input_width: 8,
      input_height: 8,
      ..Default::default()
    }
  }

  fn test_frame(timestamp_ms: u64) -> Frame {
    Frame::new(
      vec![128; 16 * 16 * 3],
      16,
      16,
      PixelFormat::Rgb8,
      Orientation::Deg0,
      timestamp_ms,
    )
    .unwrap()
  }

  /// 一个位于画面中心的 stop 标志候选（43 类布局）
  fn sign_output(shape: TensorShape, confidence: f32) -> RawOutput {
    let num_attrs = 4 + 43;
    let mut data = vec![0.0; num_attrs];
    data[0] = shape.width as f32 / 2.0;
    data[1] = shape.height as f32 / 2.0;
    data[2] = shape.width as f32 / 4.0;
    data[3] = shape.height as f32 / 4.0;
    data[4 + 14] = confidence; // stop
    RawOutput {
      data,
      shape: vec![1, num_attrs, 1],
    }
  }

  #[test]
  fn confirmed_tracks_appear_after_three_frames() {
    let config = test_config();
    let shape = config.tensor_shape();
    let engine = ScriptedEngine::new(shape, vec![Ok(sign_output(shape, 0.9))]);
    let mut pipeline = Pipeline::with_engine(Box::new(engine), config).unwrap();

    for frame_index in 1..=5u64 {
      let tracks = pipeline.process_frame(&test_frame(frame_index * 33)).unwrap();
      if frame_index < 3 {
        assert!(tracks.is_empty());
      } else {
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].detection.label, "stop");
      }
    }
  }

  #[test]
  fn invalid_config_fails_before_any_frame() {
    let config = PipelineConfig {
      confidence_threshold: 1.5,
      ..test_config()
    };
    let shape = PipelineConfig::default().tensor_shape();
    let engine = ScriptedEngine::new(shape, vec![Ok(sign_output(shape, 0.9))]);
    assert!(matches!(
      Pipeline::with_engine(Box::new(engine), config),
      Err(PipelineError::Config(_))
    ));
  }

  #[test]
  fn engine_shape_mismatch_is_config_error() {
    let config = test_config();
    let wrong_shape = TensorShape {
      channels: 3,
      height: 4,
      width: 4,
    };
    let engine = ScriptedEngine::new(wrong_shape, vec![Ok(sign_output(wrong_shape, 0.9))]);
    assert!(matches!(
      Pipeline::with_engine(Box::new(engine), config),
      Err(PipelineError::Config(ConfigError::EngineShapeMismatch { .. }))
    ));
  }

  #[test]
  fn missing_model_fails_with_model_load_error() {
    let result = Pipeline::start("/nonexistent/model.onnx", test_config());
    assert!(matches!(result, Err(PipelineError::ModelLoad(_))));
  }

  #[test]
  fn inference_failure_drops_frame_and_recovers() {
    let config = test_config();
    let shape = config.tensor_shape();
    let engine = ScriptedEngine::new(
      shape,
      vec![
        Err(InferenceError::EmptyOutput),
        Ok(sign_output(shape, 0.9)),
      ],
    );
    let mut pipeline = Pipeline::with_engine(Box::new(engine), config).unwrap();

    // 第一帧推理失败：丢帧但不报错
    assert!(pipeline.process_frame(&test_frame(0)).unwrap().is_empty());
    // 后续帧正常
    assert!(pipeline.process_frame(&test_frame(33)).is_ok());
  }

  #[test]
  fn repeated_failures_surface_engine_unavailable() {
    let config = PipelineConfig {
      max_consecutive_failures: 3,
      ..test_config()
    };
    let shape = config.tensor_shape();
    let engine = ScriptedEngine::new(shape, vec![Err(InferenceError::EmptyOutput)]);
    let mut pipeline = Pipeline::with_engine(Box::new(engine), config).unwrap();

    assert!(pipeline.process_frame(&test_frame(0)).is_ok());
    assert!(pipeline.process_frame(&test_frame(33)).is_ok());
    assert!(matches!(
      pipeline.process_frame(&test_frame(66)),
      Err(PipelineError::EngineUnavailable { failures: 3 })
    ));
  }

  #[test]
  fn stop_is_idempotent() {
    let config = test_config();
    let shape = config.tensor_shape();
    let engine = ScriptedEngine::new(shape, vec![Ok(sign_output(shape, 0.9))]);
    let mut pipeline = Pipeline::with_engine(Box::new(engine), config).unwrap();

    pipeline.stop();
    pipeline.stop();
    assert!(!pipeline.is_running());
    assert!(matches!(
      pipeline.process_frame(&test_frame(0)),
      Err(PipelineError::Stopped)
    ));
  }
}
