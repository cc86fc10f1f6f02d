// 该文件是 Lubiao （路标） 项目的一部分。
// src/preprocess.rs - 预处理与张量缓冲池
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

use tracing::trace;

use crate::bbox::BoundingBox;
use crate::config::{Normalization, ResizePolicy};
use crate::error::PreprocessError;
use crate::frame::Frame;

/// 信箱填充的灰度值（YOLO 惯例 114）
const PAD_VALUE: f32 = 114.0;

/// 固定的模型输入张量形状（CHW）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub channels: usize,
  pub height: usize,
  pub width: usize,
}

impl TensorShape {
  pub fn num_elements(&self) -> usize {
    self.channels * self.height * self.width
  }
}

/// CHW 浮点张量，形状固定
///
/// 缓冲区由 `TensorPool` 拥有并跨帧复用，
/// 调用方不得在当前帧周期之外保留其内容。
#[derive(Debug)]
pub struct Tensor {
  shape: TensorShape,
  data: Vec<f32>,
}

impl Tensor {
  fn new(shape: TensorShape) -> Self {
    Self {
      shape,
      data: vec![0.0; shape.num_elements()],
    }
  }

  pub fn shape(&self) -> &TensorShape {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

/// 槽位索引的张量缓冲池
///
/// 按槽位显式取还，取出的缓冲区在归还之前不会被其他帧复用。
#[derive(Debug)]
pub struct TensorPool {
  shape: TensorShape,
  slots: Vec<Tensor>,
  free: Vec<usize>,
}

/// 池槽位句柄，归还后失效
#[derive(Debug)]
pub struct PoolSlot(usize);

impl TensorPool {
  pub fn new(shape: TensorShape) -> Self {
    Self {
      shape,
      slots: Vec::new(),
      free: Vec::new(),
    }
  }

  /// 取出一个槽位，必要时分配新缓冲区
  pub fn acquire(&mut self) -> PoolSlot {
    match self.free.pop() {
      Some(index) => PoolSlot(index),
      None => {
        self.slots.push(Tensor::new(self.shape));
        trace!("张量池扩容到 {} 个槽位", self.slots.len());
        PoolSlot(self.slots.len() - 1)
      }
    }
  }

  pub fn get(&self, slot: &PoolSlot) -> &Tensor {
    &self.slots[slot.0]
  }

  pub fn get_mut(&mut self, slot: &PoolSlot) -> &mut Tensor {
    &mut self.slots[slot.0]
  }

  /// 归还槽位，缓冲区留待复用
  pub fn release(&mut self, slot: PoolSlot) {
    self.free.push(slot.0);
  }

  /// 释放全部缓冲区
  pub fn clear(&mut self) {
    self.slots.clear();
    self.free.clear();
  }

  pub fn allocated(&self) -> usize {
    self.slots.len()
  }
}

/// 模型输入像素坐标到归一化原帧坐标的逆变换
///
/// 由预处理阶段产生，后处理阶段用它把检测框映射回原帧。
#[derive(Debug, Clone, Copy)]
pub struct FrameTransform {
  pub scale_x: f32,
  pub scale_y: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub src_width: f32,
  pub src_height: f32,
}

impl FrameTransform {
  /// 中心格式的模型空间框 → 归一化原帧边界框
  pub fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
    let x = (cx - w * 0.5 - self.pad_x) / self.scale_x / self.src_width;
    let y = (cy - h * 0.5 - self.pad_y) / self.scale_y / self.src_height;
    let bw = w / self.scale_x / self.src_width;
    let bh = h / self.scale_y / self.src_height;
    BoundingBox::new(x, y, bw, bh).clamp_unit()
  }
}

/// 预处理器：双线性缩放 + 归一化，结果直接写入池中张量
#[derive(Debug)]
pub struct Preprocessor {
  policy: ResizePolicy,
  norm: Normalization,
}

impl Preprocessor {
  pub fn new(policy: ResizePolicy, norm: Normalization) -> Self {
    Self { policy, norm }
  }

  /// 把一帧写入目标张量，返回坐标逆变换
  ///
  /// 帧在 `Frame::new` 已校验过缓冲区，这里只需拒绝空帧。
  pub fn prepare_into(
    &self,
    frame: &Frame,
    tensor: &mut Tensor,
  ) -> Result<FrameTransform, PreprocessError> {
    let src_w = frame.upright_width();
    let src_h = frame.upright_height();
    if src_w == 0 || src_h == 0 {
      return Err(PreprocessError::EmptyFrame {
        width: src_w,
        height: src_h,
      });
    }

    let shape = *tensor.shape();
    let (tw, th) = (shape.width, shape.height);

    let (scale_x, scale_y, pad_x, pad_y) = match self.policy {
      ResizePolicy::Letterbox => {
        let scale = (tw as f32 / src_w as f32).min(th as f32 / src_h as f32);
        let resized_w = src_w as f32 * scale;
        let resized_h = src_h as f32 * scale;
        (
          scale,
          scale,
          (tw as f32 - resized_w) * 0.5,
          (th as f32 - resized_h) * 0.5,
        )
      }
      ResizePolicy::Stretch => (
        tw as f32 / src_w as f32,
        th as f32 / src_h as f32,
        0.0,
        0.0,
      ),
    };

    let plane = tw * th;
    let region_w = src_w as f32 * scale_x;
    let region_h = src_h as f32 * scale_y;

    for y in 0..th {
      for x in 0..tw {
        let fx = x as f32 + 0.5 - pad_x;
        let fy = y as f32 + 0.5 - pad_y;

        let rgb = if fx < 0.0 || fy < 0.0 || fx >= region_w || fy >= region_h {
          [PAD_VALUE; 3]
        } else {
          sample_bilinear(frame, fx / scale_x - 0.5, fy / scale_y - 0.5)
        };

        let idx = y * tw + x;
        for c in 0..shape.channels.min(3) {
          tensor.data[c * plane + idx] =
            (rgb[c] / 255.0 - self.norm.mean[c]) / self.norm.std[c];
        }
      }
    }

    Ok(FrameTransform {
      scale_x,
      scale_y,
      pad_x,
      pad_y,
      src_width: src_w as f32,
      src_height: src_h as f32,
    })
  }
}

/// 双线性采样，坐标自动夹取到帧内
fn sample_bilinear(frame: &Frame, fx: f32, fy: f32) -> [f32; 3] {
  let max_x = (frame.upright_width() - 1) as f32;
  let max_y = (frame.upright_height() - 1) as f32;
  let fx = fx.clamp(0.0, max_x);
  let fy = fy.clamp(0.0, max_y);

  let x0 = fx.floor() as u32;
  let y0 = fy.floor() as u32;
  let x1 = (x0 + 1).min(max_x as u32);
  let y1 = (y0 + 1).min(max_y as u32);
  let dx = fx - x0 as f32;
  let dy = fy - y0 as f32;

  let p00 = frame.rgb_at(x0, y0);
  let p10 = frame.rgb_at(x1, y0);
  let p01 = frame.rgb_at(x0, y1);
  let p11 = frame.rgb_at(x1, y1);

  let mut out = [0.0f32; 3];
  for c in 0..3 {
    let top = p00[c] as f32 * (1.0 - dx) + p10[c] as f32 * dx;
    let bottom = p01[c] as f32 * (1.0 - dx) + p11[c] as f32 * dx;
    out[c] = top * (1.0 - dy) + bottom * dy;
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{Orientation, PixelFormat};

  fn shape(h: usize, w: usize) -> TensorShape {
    TensorShape {
      channels: 3,
      height: h,
      width: w,
    }
  }

  fn uniform_frame(width: u32, height: u32, value: u8) -> Frame {
    let data = vec![value; width as usize * height as usize * 3];
    Frame::new(data, width, height, PixelFormat::Rgb8, Orientation::Deg0, 0).unwrap()
  }

  #[test]
  fn output_shape_matches_configuration() {
    let pre = Preprocessor::new(ResizePolicy::Letterbox, Normalization::default());
    let mut pool = TensorPool::new(shape(8, 8));
    let slot = pool.acquire();
    let frame = uniform_frame(5, 3, 128);
    pre.prepare_into(&frame, pool.get_mut(&slot)).unwrap();
    assert_eq!(pool.get(&slot).data().len(), 3 * 8 * 8);
    assert_eq!(*pool.get(&slot).shape(), shape(8, 8));
    pool.release(slot);
  }

  #[test]
  fn stretch_fills_uniform_value() {
    let pre = Preprocessor::new(ResizePolicy::Stretch, Normalization::default());
    let mut pool = TensorPool::new(shape(4, 4));
    let slot = pool.acquire();
    let frame = uniform_frame(2, 2, 51);
    pre.prepare_into(&frame, pool.get_mut(&slot)).unwrap();
    for &v in pool.get(&slot).data() {
      assert!((v - 0.2).abs() < 1e-5);
    }
  }

  #[test]
  fn letterbox_pads_wide_frame_top_and_bottom() {
    let pre = Preprocessor::new(ResizePolicy::Letterbox, Normalization::default());
    let mut pool = TensorPool::new(shape(4, 4));
    let slot = pool.acquire();
    // 4:1 宽帧缩放到 4x1 区域，上下各 1.5 像素填充
    let frame = uniform_frame(8, 2, 255);
    let transform = pre.prepare_into(&frame, pool.get_mut(&slot)).unwrap();
    assert!((transform.scale_x - 0.5).abs() < 1e-6);
    assert!((transform.pad_y - 1.5).abs() < 1e-6);

    let data = pool.get(&slot).data();
    // 第一行中心落在填充区
    assert!((data[0] - PAD_VALUE / 255.0).abs() < 1e-5);
    // 第二行落在图像区
    assert!((data[4] - 1.0).abs() < 1e-5);
  }

  #[test]
  fn normalization_applies_mean_and_std() {
    let norm = Normalization {
      mean: [0.5; 3],
      std: [0.25; 3],
    };
    let pre = Preprocessor::new(ResizePolicy::Stretch, norm);
    let mut pool = TensorPool::new(shape(2, 2));
    let slot = pool.acquire();
    let frame = uniform_frame(2, 2, 255);
    pre.prepare_into(&frame, pool.get_mut(&slot)).unwrap();
    for &v in pool.get(&slot).data() {
      assert!((v - 2.0).abs() < 1e-5);
    }
  }

  #[test]
  fn pool_reuses_released_slots() {
    let mut pool = TensorPool::new(shape(2, 2));
    let a = pool.acquire();
    pool.release(a);
    let _b = pool.acquire();
    assert_eq!(pool.allocated(), 1);
    let _c = pool.acquire();
    assert_eq!(pool.allocated(), 2);
  }

  #[test]
  fn unmap_inverts_letterbox() {
    let transform = FrameTransform {
      scale_x: 0.5,
      scale_y: 0.5,
      pad_x: 0.0,
      pad_y: 1.0,
      src_width: 8.0,
      src_height: 4.0,
    };
    // 模型空间中心 (2, 2), 尺寸 2x1 → 原帧 x: (2-1)/0.5/8, w: 2/0.5/8
    let bbox = transform.unmap(2.0, 2.0, 2.0, 1.0);
    assert!((bbox.x - 0.25).abs() < 1e-6);
    assert!((bbox.w - 0.5).abs() < 1e-6);
    assert!((bbox.y - 0.25).abs() < 1e-6);
    assert!((bbox.h - 0.5).abs() < 1e-6);
  }
}
