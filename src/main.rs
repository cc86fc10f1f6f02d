// 该文件是 Lubiao （路标） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use lubiao::config::PipelineConfig;
use lubiao::input::create_frame_source;
use lubiao::pipeline::Pipeline;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let mut config = match &args.config {
    Some(path) => PipelineConfig::from_json_file(path)?,
    None => PipelineConfig::default(),
  };
  if let Some(confidence) = args.confidence {
    config.confidence_threshold = confidence;
  }
  if let Some(nms_threshold) = args.nms_threshold {
    config.nms_iou_threshold = nms_threshold;
  }
  if let Some(labels) = &args.labels {
    config.label_file = Some(labels.into());
  }

  info!("置信度阈值: {}", config.confidence_threshold);
  info!("NMS IoU 阈值: {}", config.nms_iou_threshold);

  info!("正在加载模型...");
  let mut pipeline = Pipeline::start(&args.model, config)?;

  let source = create_frame_source(&args.input)?;

  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号, 准备退出...");
    let _ = tx.send(());
  })
  .expect("Error setting Ctrl-C handler");

  info!("开始处理...");
  let mut frame_count = 0u64;
  for frame in source {
    let frame = match frame {
      Ok(frame) => frame,
      Err(e) => {
        warn!("读取帧失败, 跳过: {}", e);
        continue;
      }
    };

    frame_count += 1;
    let now = std::time::Instant::now();
    let tracks = pipeline.process_frame(&frame)?;
    let elapsed = now.elapsed();
    info!(
      "第 {} 帧处理完成, 耗时 {:.2?}, 确认轨迹 {} 条",
      frame_count,
      elapsed,
      tracks.len()
    );

    for track in &tracks {
      println!("{}", serde_json::to_string(track)?);
    }

    if args.max_frames > 0 && frame_count >= args.max_frames {
      info!("达到指定帧数 {}, 退出处理循环", args.max_frames);
      break;
    }
    if rx.try_recv().is_ok() {
      warn!("中断信号接收, 退出处理循环");
      break;
    }
  }

  pipeline.stop();
  info!("处理完成, 总帧数: {}", frame_count);

  Ok(())
}
