// 该文件是 Lubiao （路标） 项目的一部分。
// src/worker.rs - 流水线工作线程
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

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::pipeline::Pipeline;
use crate::track::Track;

/// 工作线程产生的事件
#[derive(Debug)]
pub enum PipelineEvent {
  /// 一帧处理完成，携带当前确认轨迹
  Tracks(Vec<Track>),
  /// 致命错误，工作线程随后退出
  Fatal(PipelineError),
}

#[derive(Default)]
struct Mailbox {
  frame: Option<Frame>,
  stopping: bool,
  dropped: u64,
}

struct Shared {
  mailbox: Mutex<Mailbox>,
  cond: Condvar,
}

/// 锁中毒时继续使用内部数据；信箱状态不存在半更新
fn lock(mailbox: &Mutex<Mailbox>) -> MutexGuard<'_, Mailbox> {
  mailbox.lock().unwrap_or_else(|e| e.into_inner())
}

/// 流水线专用工作线程
///
/// 相机回调线程通过 `submit` 投递帧；单槽信箱保证最新
/// 帧优先，处理期间到达的帧覆盖旧帧而不是排队，端到端
/// 延迟有界。流水线与缓冲池归工作线程独占，无跨线程
/// 可变共享。
pub struct PipelineWorker {
  shared: Arc<Shared>,
  handle: Option<JoinHandle<()>>,
}

impl PipelineWorker {
  /// 启动工作线程，事件经 `sink` 回调交给宿主
  pub fn spawn<F>(mut pipeline: Pipeline, mut sink: F) -> Self
  where
    F: FnMut(PipelineEvent) + Send + 'static,
  {
    let shared = Arc::new(Shared {
      mailbox: Mutex::new(Mailbox::default()),
      cond: Condvar::new(),
    });

    let worker_shared = Arc::clone(&shared);
    let handle = thread::spawn(move || {
      info!("流水线工作线程启动");
      loop {
        let frame = {
          let mut mailbox = lock(&worker_shared.mailbox);
          loop {
            if mailbox.stopping {
              break None;
            }
            match mailbox.frame.take() {
              Some(frame) => break Some(frame),
              None => {
                mailbox = worker_shared
                  .cond
                  .wait(mailbox)
                  .unwrap_or_else(|e| e.into_inner());
              }
            }
          }
        };

        let Some(frame) = frame else {
          break;
        };

        match pipeline.process_frame(&frame) {
          Ok(tracks) => sink(PipelineEvent::Tracks(tracks)),
          Err(e) => {
            error!("流水线致命错误, 工作线程退出: {}", e);
            sink(PipelineEvent::Fatal(e));
            break;
          }
        }
      }

      // 在工作线程内释放引擎，保证不与在途推理竞争
      pipeline.stop();
      info!("流水线工作线程退出");
    });

    Self {
      shared,
      handle: Some(handle),
    }
  }

  /// 投递一帧；若上一帧尚未被取走则覆盖之（最新帧优先）
  pub fn submit(&self, frame: Frame) {
    let mut mailbox = lock(&self.shared.mailbox);
    if mailbox.stopping {
      return;
    }
    if mailbox.frame.replace(frame).is_some() {
      mailbox.dropped += 1;
      debug!("上一帧尚未处理, 覆盖旧帧 (累计丢弃 {})", mailbox.dropped);
    }
    drop(mailbox);
    self.shared.cond.notify_one();
  }

  /// 因覆盖而被丢弃的帧数
  pub fn dropped(&self) -> u64 {
    lock(&self.shared.mailbox).dropped
  }

  /// 停止工作线程并等待其退出
  ///
  /// 在途的 `process_frame` 调用会先完成，引擎资源在
  /// 工作线程内释放后本方法才返回。幂等。
  pub fn stop(&mut self) {
    {
      let mut mailbox = lock(&self.shared.mailbox);
      mailbox.stopping = true;
      mailbox.frame = None;
    }
    self.shared.cond.notify_all();
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        error!("流水线工作线程异常终止");
      }
    }
  }
}

impl Drop for PipelineWorker {
  fn drop(&mut self) {
    self.stop();
  }
}
