// 该文件是 Lubiao （路标） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::preprocess::TensorShape;

/// 缩放策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
  /// 保持宽高比，灰色填充
  #[default]
  Letterbox,
  /// 直接拉伸到目标分辨率
  Stretch,
}

/// 像素归一化参数：先缩放到 [0, 1] 再按通道减均值除标准差
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Normalization {
  pub mean: [f32; 3],
  pub std: [f32; 3],
}

impl Default for Normalization {
  fn default() -> Self {
    Self {
      mean: [0.0; 3],
      std: [1.0; 3],
    }
  }
}

/// 流水线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// 模型输入宽度
  pub input_width: u32,
  /// 模型输入高度
  pub input_height: u32,
  pub resize_policy: ResizePolicy,
  pub normalization: Normalization,
  /// 置信度阈值 (0, 1)
  pub confidence_threshold: f32,
  /// NMS IoU 阈值 (0, 1)
  pub nms_iou_threshold: f32,
  /// 轨迹匹配 IoU 阈值 (0, 1)
  pub match_iou_threshold: f32,
  /// 连续命中多少帧后轨迹确认
  pub confirm_hits: u32,
  /// 连续丢失多少帧后确认轨迹过期
  pub expire_misses: u32,
  /// 连续推理失败多少次后上报引擎不可用
  pub max_consecutive_failures: u32,
  /// 可选的标签表文件（JSON，classId → 名称）
  pub label_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      input_width: 640,
      input_height: 640,
      resize_policy: ResizePolicy::default(),
      normalization: Normalization::default(),
      confidence_threshold: 0.5,
      nms_iou_threshold: 0.45,
      match_iou_threshold: 0.3,
      confirm_hits: 3,
      expire_misses: 5,
      max_consecutive_failures: 5,
      label_file: None,
    }
  }
}

impl PipelineConfig {
  /// 从 JSON 文件加载配置，缺失字段使用默认值
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Self = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  /// 校验配置，任何帧处理之前快速失败
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::InvalidResolution {
        width: self.input_width,
        height: self.input_height,
      });
    }

    let thresholds = [
      ("confidence_threshold", self.confidence_threshold),
      ("nms_iou_threshold", self.nms_iou_threshold),
      ("match_iou_threshold", self.match_iou_threshold),
    ];
    for (name, value) in thresholds {
      if !value.is_finite() || value <= 0.0 || value >= 1.0 {
        return Err(ConfigError::InvalidThreshold { name, value });
      }
    }

    if self.confirm_hits == 0 {
      return Err(ConfigError::InvalidCount {
        name: "confirm_hits",
      });
    }
    if self.expire_misses == 0 {
      return Err(ConfigError::InvalidCount {
        name: "expire_misses",
      });
    }
    if self.max_consecutive_failures == 0 {
      return Err(ConfigError::InvalidCount {
        name: "max_consecutive_failures",
      });
    }

    Ok(())
  }

  /// 模型输入张量形状（RGB 三通道）
  pub fn tensor_shape(&self) -> TensorShape {
    TensorShape {
      channels: 3,
      height: self.input_height as usize,
      width: self.input_width as usize,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    assert!(PipelineConfig::default().validate().is_ok());
  }

  #[test]
  fn zero_resolution_is_rejected() {
    let config = PipelineConfig {
      input_width: 0,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidResolution { .. })
    ));
  }

  #[test]
  fn threshold_bounds_are_exclusive() {
    for value in [0.0, 1.0, -0.1, f32::NAN] {
      let config = PipelineConfig {
        confidence_threshold: value,
        ..Default::default()
      };
      assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidThreshold { .. })
      ));
    }
  }

  #[test]
  fn zero_counts_are_rejected() {
    let config = PipelineConfig {
      confirm_hits: 0,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidCount { .. })
    ));
  }

  #[test]
  fn partial_json_uses_defaults() {
    let dir = std::env::temp_dir();
    let path = dir.join("lubiao_config_partial.json");
    std::fs::write(&path, r#"{"confidence_threshold": 0.6}"#).unwrap();
    let config = PipelineConfig::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert!((config.confidence_threshold - 0.6).abs() < 1e-6);
    assert_eq!(config.input_width, 640);
    assert_eq!(config.confirm_hits, 3);
  }

  #[test]
  fn tensor_shape_follows_resolution() {
    let config = PipelineConfig {
      input_width: 416,
      input_height: 320,
      ..Default::default()
    };
    let shape = config.tensor_shape();
    assert_eq!((shape.channels, shape.height, shape.width), (3, 320, 416));
  }
}
