// 该文件是 Lubiao （路标） 项目的一部分。
// src/frame.rs - 相机帧定义
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

use crate::error::PreprocessError;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Rgb8,
  Bgr8,
  Rgba8,
}

impl PixelFormat {
  pub fn bytes_per_pixel(&self) -> usize {
    match self {
      PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
      PixelFormat::Rgba8 => 4,
    }
  }
}

/// 设备方向：存储图像顺时针旋转该角度后即为正立图像
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Orientation {
  /// 从角度创建，仅接受 0/90/180/270
  pub fn from_degrees(degrees: u32) -> Option<Self> {
    match degrees % 360 {
      0 => Some(Orientation::Deg0),
      90 => Some(Orientation::Deg90),
      180 => Some(Orientation::Deg180),
      270 => Some(Orientation::Deg270),
      _ => None,
    }
  }

  fn swaps_axes(&self) -> bool {
    matches!(self, Orientation::Deg90 | Orientation::Deg270)
  }
}

/// 不可变的相机帧快照
///
/// 像素缓冲区按存储方向保存；`rgb_at` 以正立坐标读取像素，
/// 旋转在采样时完成，不产生旋转后的副本。
#[derive(Debug, Clone)]
pub struct Frame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  format: PixelFormat,
  orientation: Orientation,
  timestamp_ms: u64,
}

impl Frame {
  pub fn new(
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    orientation: Orientation,
    timestamp_ms: u64,
  ) -> Result<Self, PreprocessError> {
    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyFrame { width, height });
    }

    let expected = width as usize * height as usize * format.bytes_per_pixel();
    if data.len() != expected {
      return Err(PreprocessError::BufferMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
      format,
      orientation,
      timestamp_ms,
    })
  }

  /// 存储宽度
  pub fn width(&self) -> u32 {
    self.width
  }

  /// 存储高度
  pub fn height(&self) -> u32 {
    self.height
  }

  /// 正立宽度（旋转后）
  pub fn upright_width(&self) -> u32 {
    if self.orientation.swaps_axes() {
      self.height
    } else {
      self.width
    }
  }

  /// 正立高度（旋转后）
  pub fn upright_height(&self) -> u32 {
    if self.orientation.swaps_axes() {
      self.width
    } else {
      self.height
    }
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn orientation(&self) -> Orientation {
    self.orientation
  }

  pub fn timestamp_ms(&self) -> u64 {
    self.timestamp_ms
  }

  /// 以正立坐标读取 RGB 像素
  ///
  /// 坐标必须位于 `upright_width` x `upright_height` 范围内。
  pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
    debug_assert!(x < self.upright_width() && y < self.upright_height());

    // 正立坐标映射回存储坐标
    let (sx, sy) = match self.orientation {
      Orientation::Deg0 => (x, y),
      Orientation::Deg90 => (y, self.height - 1 - x),
      Orientation::Deg180 => (self.width - 1 - x, self.height - 1 - y),
      Orientation::Deg270 => (self.width - 1 - y, x),
    };

    let bpp = self.format.bytes_per_pixel();
    let idx = (sy as usize * self.width as usize + sx as usize) * bpp;
    match self.format {
      PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
      }
      PixelFormat::Bgr8 => [self.data[idx + 2], self.data[idx + 1], self.data[idx]],
    }
  }
}
