// 该文件是 Lubiao （路标） 项目的一部分。
// src/bbox.rs - 归一化边界框
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

use serde::{Deserialize, Serialize};

/// 归一化边界框，左上角坐标加宽高，取值范围 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
    Self { x, y, w, h }
  }

  pub fn area(&self) -> f32 {
    self.w * self.h
  }

  /// 裁剪到 [0, 1] 单位区间内
  pub fn clamp_unit(self) -> Self {
    let x = self.x.clamp(0.0, 1.0);
    let y = self.y.clamp(0.0, 1.0);
    let w = self.w.clamp(0.0, 1.0 - x);
    let h = self.h.clamp(0.0, 1.0 - y);
    Self { x, y, w, h }
  }

  /// 计算两个边界框的交并比
  pub fn iou(&self, other: &Self) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = (self.x + self.w).min(other.x + other.w);
    let y2 = (self.y + self.h).min(other.y + other.h);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}
