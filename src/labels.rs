// 该文件是 Lubiao （路标） 项目的一部分。
// src/labels.rs - 交通标志标签表
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

use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigError;

/// GTSRB 数据集类别名称（43 类）
pub const GTSRB_CLASSES: [&str; 43] = [
  "speed limit 20",
  "speed limit 30",
  "speed limit 50",
  "speed limit 60",
  "speed limit 70",
  "speed limit 80",
  "end of speed limit 80",
  "speed limit 100",
  "speed limit 120",
  "no passing",
  "no passing for heavy vehicles",
  "right-of-way at next intersection",
  "priority road",
  "yield",
  "stop",
  "no vehicles",
  "heavy vehicles prohibited",
  "no entry",
  "general caution",
  "dangerous curve left",
  "dangerous curve right",
  "double curve",
  "bumpy road",
  "slippery road",
  "road narrows on the right",
  "road work",
  "traffic signals",
  "pedestrians",
  "children crossing",
  "bicycles crossing",
  "beware of ice",
  "wild animals crossing",
  "end of all limits",
  "turn right ahead",
  "turn left ahead",
  "ahead only",
  "go straight or right",
  "go straight or left",
  "keep right",
  "keep left",
  "roundabout mandatory",
  "end of no passing",
  "end of no passing for heavy vehicles",
];

/// 类别索引到标签名称的固定映射
///
/// 类别数同时决定解码器期望的模型输出通道数。
#[derive(Debug, Clone)]
pub struct LabelTable {
  names: Vec<String>,
}

impl Default for LabelTable {
  fn default() -> Self {
    Self {
      names: GTSRB_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl LabelTable {
  pub fn new(names: Vec<String>) -> Result<Self, ConfigError> {
    if names.is_empty() {
      return Err(ConfigError::InvalidLabelTable("标签表为空".to_string()));
    }
    Ok(Self { names })
  }

  /// 从 JSON 文件加载标签表
  ///
  /// 文件格式为 `{"0": "stop", "1": "yield", ...}`，
  /// 索引必须从 0 开始且连续。
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let raw: HashMap<String, String> = serde_json::from_str(&content)?;

    let mut entries = Vec::with_capacity(raw.len());
    for (key, name) in raw {
      let id: usize = key
        .parse()
        .map_err(|_| ConfigError::InvalidLabelTable(format!("类别索引无效: {:?}", key)))?;
      entries.push((id, name));
    }
    entries.sort_by_key(|(id, _)| *id);

    for (expected, (id, _)) in entries.iter().enumerate() {
      if *id != expected {
        return Err(ConfigError::InvalidLabelTable(format!(
          "类别索引不连续: 期望 {}, 实际 {}",
          expected, id
        )));
      }
    }

    Self::new(entries.into_iter().map(|(_, name)| name).collect())
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(|s| s.as_str())
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}
