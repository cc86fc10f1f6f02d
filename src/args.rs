// 该文件是 Lubiao （路标） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;

/// Lubiao 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: String,

  /// 输入来源（单张图片或图片目录）
  #[arg(long, value_name = "SOURCE")]
  pub input: String,

  /// 流水线配置文件（JSON，缺省使用默认配置）
  #[arg(long, value_name = "FILE")]
  pub config: Option<String>,

  /// 置信度阈值 (0.0 - 1.0)，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IoU 阈值 (0.0 - 1.0)，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 标签表文件（JSON，classId → 名称），覆盖配置文件
  #[arg(long, value_name = "FILE")]
  pub labels: Option<String>,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,
}
