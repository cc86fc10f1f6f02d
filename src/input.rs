// 该文件是 Lubiao （路标） 项目的一部分。
// src/input.rs - 帧输入源
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

use anyhow::{Context, Result};

use crate::frame::{Frame, Orientation, PixelFormat};

/// 合成时间戳的帧间隔（约 30 fps）
const FRAME_INTERVAL_MS: u64 = 33;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 输入源类型
pub enum FrameSourceType {
  /// 单张图片
  Image,
  /// 图片目录（按文件名排序）
  Directory,
}

/// 帧输入源 trait
///
/// 宿主平台的相机子系统是真正的帧来源；这里的实现
/// 从图片文件构造帧，供命令行演示与离线回放使用。
pub trait FrameSource: Iterator<Item = Result<Frame>> {
  fn source_type(&self) -> FrameSourceType;
}

/// 单张图片输入源
pub struct ImageFileSource {
  path: PathBuf,
  consumed: bool,
}

impl ImageFileSource {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      consumed: false,
    }
  }
}

fn load_frame(path: &Path, timestamp_ms: u64) -> Result<Frame> {
  let image = image::open(path)
    .with_context(|| format!("无法打开图片: {}", path.display()))?
    .to_rgb8();
  let (width, height) = image.dimensions();
  let frame = Frame::new(
    image.into_raw(),
    width,
    height,
    PixelFormat::Rgb8,
    Orientation::Deg0,
    timestamp_ms,
  )
  .with_context(|| format!("无法构造帧: {}", path.display()))?;
  Ok(frame)
}

impl Iterator for ImageFileSource {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.consumed {
      return None;
    }
    self.consumed = true;
    Some(load_frame(&self.path, 0))
  }
}

impl FrameSource for ImageFileSource {
  fn source_type(&self) -> FrameSourceType {
    FrameSourceType::Image
  }
}

/// 图片目录输入源，文件名排序后按固定间隔合成时间戳
pub struct ImageDirSource {
  files: Vec<PathBuf>,
  index: usize,
}

impl ImageDirSource {
  pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in
      std::fs::read_dir(dir).with_context(|| format!("无法读取目录: {}", dir.display()))?
    {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false);
      if is_image {
        files.push(path);
      }
    }
    files.sort();

    if files.is_empty() {
      anyhow::bail!("目录中没有图片文件: {}", dir.display());
    }

    Ok(Self { files, index: 0 })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

impl Iterator for ImageDirSource {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.get(self.index)?;
    let timestamp_ms = self.index as u64 * FRAME_INTERVAL_MS;
    self.index += 1;
    Some(load_frame(path, timestamp_ms))
  }
}

impl FrameSource for ImageDirSource {
  fn source_type(&self) -> FrameSourceType {
    FrameSourceType::Directory
  }
}

/// 根据路径创建输入源：目录或单张图片
pub fn create_frame_source(source: &str) -> Result<Box<dyn FrameSource>> {
  let path = Path::new(source);
  if path.is_dir() {
    Ok(Box::new(ImageDirSource::new(path)?))
  } else {
    Ok(Box::new(ImageFileSource::new(path)))
  }
}
