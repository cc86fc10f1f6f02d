// 该文件是 Lubiao （路标） 项目的一部分。
// src/postprocess.rs - 模型输出解码与非极大值抑制
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

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{debug, warn};

use crate::bbox::BoundingBox;
use crate::engine::RawOutput;
use crate::labels::LabelTable;
use crate::preprocess::FrameTransform;

/// 单帧检测结果，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_id: usize,
  pub label: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
  pub timestamp_ms: u64,
}

/// 解码前的候选框
struct Candidate {
  index: usize,
  class_id: usize,
  score: f32,
  bbox: BoundingBox,
}

/// 检测器输出解码器
///
/// 期望 YOLOv8 风格的输出 `[1, 4+C, N]`（中心格式框加逐类分数）。
/// 不同导出工具可能交换最后两个维度，这里按 `4+C`
/// 匹配维度大小来识别布局。
pub struct Decoder {
  labels: LabelTable,
  confidence_threshold: f32,
  nms_iou_threshold: f32,
}

impl Decoder {
  pub fn new(labels: LabelTable, confidence_threshold: f32, nms_iou_threshold: f32) -> Self {
    Self {
      labels,
      confidence_threshold,
      nms_iou_threshold,
    }
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  /// 把一次推理的原始输出解码为检测序列
  ///
  /// 结果确定：相同输入与阈值产生相同的有序输出，
  /// 分数并列时按候选原始索引稳定排序。
  pub fn decode(
    &self,
    raw: &RawOutput,
    transform: &FrameTransform,
    timestamp_ms: u64,
  ) -> Vec<Detection> {
    let num_attrs = 4 + self.labels.len();

    // 去掉前导的 batch 维度
    let dims: Vec<usize> = {
      let mut dims = raw.shape.clone();
      while dims.len() > 2 && dims.first() == Some(&1) {
        dims.remove(0);
      }
      dims
    };

    if dims.len() != 2 {
      warn!("无法识别的输出形状 {:?}, 丢弃该帧输出", raw.shape);
      return Vec::new();
    }

    // 按 4+C 匹配维度，识别属性主序或候选主序布局
    let (attrs_major, num_candidates) = if dims[0] == num_attrs {
      (true, dims[1])
    } else if dims[1] == num_attrs {
      (false, dims[0])
    } else {
      warn!(
        "输出形状 {:?} 与 {} 类标签表不匹配, 丢弃该帧输出",
        raw.shape, num_attrs - 4
      );
      return Vec::new();
    };

    if raw.data.len() != num_attrs * num_candidates {
      warn!(
        "输出长度 {} 与形状 {:?} 不一致, 丢弃该帧输出",
        raw.data.len(),
        raw.shape
      );
      return Vec::new();
    }

    let at = |candidate: usize, attr: usize| -> f32 {
      if attrs_major {
        raw.data[attr * num_candidates + candidate]
      } else {
        raw.data[candidate * num_attrs + attr]
      }
    };

    let mut candidates = Vec::new();
    for i in 0..num_candidates {
      let mut best_score = 0.0f32;
      let mut best_class = 0usize;
      for c in 0..self.labels.len() {
        let score = at(i, 4 + c);
        if score > best_score {
          best_score = score;
          best_class = c;
        }
      }

      if best_score < self.confidence_threshold {
        continue;
      }

      let cx = at(i, 0);
      let cy = at(i, 1);
      let w = at(i, 2);
      let h = at(i, 3);
      if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
        continue;
      }

      let bbox = transform.unmap(cx, cy, w, h);
      if bbox.w <= 0.0 || bbox.h <= 0.0 {
        continue;
      }

      candidates.push(Candidate {
        index: i,
        class_id: best_class,
        score: best_score,
        bbox,
      });
    }

    let kept = self.nms(candidates);

    let mut detections = Vec::with_capacity(kept.len());
    for candidate in kept {
      match self.labels.get(candidate.class_id) {
        Some(label) => detections.push(Detection {
          class_id: candidate.class_id,
          label: label.to_string(),
          confidence: candidate.score,
          bbox: candidate.bbox,
          timestamp_ms,
        }),
        None => {
          warn!("未知类别索引 {}, 丢弃该检测", candidate.class_id);
        }
      }
    }

    debug!("解码得到 {} 个检测", detections.len());
    detections
  }

  /// 逐类的贪心非极大值抑制
  ///
  /// 保留的同类框两两 IoU 严格低于阈值。
  fn nms(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
      b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.index.cmp(&b.index))
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
      let suppressed = kept.iter().any(|k| {
        k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) >= self.nms_iou_threshold
      });
      if !suppressed {
        kept.push(candidate);
      }
    }
    kept
  }
}
