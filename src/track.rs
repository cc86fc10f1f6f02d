// 该文件是 Lubiao （路标） 项目的一部分。
// src/track.rs - 跨帧轨迹跟踪与去抖
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
use tracing::debug;

use crate::postprocess::Detection;

/// 轨迹状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
  /// 新建，尚未确认
  Tentative,
  /// 已确认，对外输出
  Confirmed,
  /// 已过期，即将从轨迹表移除
  Expired,
}

/// 一条跨帧轨迹
///
/// 轨迹只保存当前检测；轨迹表以 track_id 为键索引，
/// 不构成指针图。track_id 在跟踪器生命周期内唯一。
#[derive(Debug, Clone, Serialize)]
pub struct Track {
  pub track_id: u64,
  pub detection: Detection,
  pub state: TrackState,
  pub first_seen_ms: u64,
  pub last_seen_ms: u64,
  pub hits: u32,
  pub misses: u32,
}

/// 跟踪去抖器
///
/// 贪心 IoU 匹配关联相邻帧的检测，抑制单帧误报。
/// 只有确认后的轨迹才会交给上层渲染或告警。
pub struct Tracker {
  tracks: Vec<Track>,
  next_id: u64,
  match_iou_threshold: f32,
  confirm_hits: u32,
  expire_misses: u32,
}

impl Tracker {
  pub fn new(match_iou_threshold: f32, confirm_hits: u32, expire_misses: u32) -> Self {
    Self {
      tracks: Vec::new(),
      next_id: 0,
      match_iou_threshold,
      confirm_hits,
      expire_misses,
    }
  }

  /// 用一帧的检测更新轨迹表，返回确认轨迹
  ///
  /// 每条轨迹每帧至多关联一个检测。未匹配的检测生成
  /// 新的待定轨迹；未匹配的轨迹记一次丢失，待定轨迹
  /// 连续命中要求被打破即过期，确认轨迹连续丢失
  /// `expire_misses` 帧后过期。
  pub fn update(&mut self, detections: Vec<Detection>) -> Vec<Track> {
    // 候选轨迹-检测对，按 IoU 降序贪心指派
    let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
    for (t, track) in self.tracks.iter().enumerate() {
      for (d, detection) in detections.iter().enumerate() {
        if track.detection.class_id != detection.class_id {
          continue;
        }
        let iou = track.detection.bbox.iou(&detection.bbox);
        if iou >= self.match_iou_threshold {
          pairs.push((iou, t, d));
        }
      }
    }
    pairs.sort_by(|a, b| {
      b.0
        .partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then(a.1.cmp(&b.1))
        .then(a.2.cmp(&b.2))
    });

    let mut track_assignment: Vec<Option<usize>> = vec![None; self.tracks.len()];
    let mut detection_taken = vec![false; detections.len()];
    for (_, t, d) in pairs {
      if track_assignment[t].is_none() && !detection_taken[d] {
        track_assignment[t] = Some(d);
        detection_taken[d] = true;
      }
    }

    // 命中与丢失
    for (t, track) in self.tracks.iter_mut().enumerate() {
      match track_assignment[t] {
        Some(d) => {
          track.detection = detections[d].clone();
          track.hits += 1;
          track.misses = 0;
          track.last_seen_ms = detections[d].timestamp_ms;
          if track.state == TrackState::Tentative && track.hits >= self.confirm_hits {
            track.state = TrackState::Confirmed;
            debug!("轨迹 {} ({}) 已确认", track.track_id, track.detection.label);
          }
        }
        None => {
          track.misses += 1;
          let expired = match track.state {
            // 连续命中要求被打破
            TrackState::Tentative => true,
            TrackState::Confirmed => track.misses >= self.expire_misses,
            TrackState::Expired => true,
          };
          if expired {
            track.state = TrackState::Expired;
            debug!("轨迹 {} 过期", track.track_id);
          }
        }
      }
    }
    self.tracks.retain(|track| track.state != TrackState::Expired);

    // 未匹配的检测生成新轨迹
    for (d, taken) in detection_taken.iter().enumerate() {
      if *taken {
        continue;
      }
      let detection = detections[d].clone();
      let state = if self.confirm_hits <= 1 {
        TrackState::Confirmed
      } else {
        TrackState::Tentative
      };
      let track = Track {
        track_id: self.next_id,
        first_seen_ms: detection.timestamp_ms,
        last_seen_ms: detection.timestamp_ms,
        detection,
        state,
        hits: 1,
        misses: 0,
      };
      debug!("新建轨迹 {} ({})", track.track_id, track.detection.label);
      self.next_id += 1;
      self.tracks.push(track);
    }

    self.confirmed()
  }

  /// 当前确认轨迹的快照
  pub fn confirmed(&self) -> Vec<Track> {
    self
      .tracks
      .iter()
      .filter(|track| track.state == TrackState::Confirmed)
      .cloned()
      .collect()
  }

  /// 活跃轨迹总数（含待定）
  pub fn len(&self) -> usize {
    self.tracks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tracks.is_empty()
  }

  /// 清空轨迹表；track_id 不回卷
  pub fn clear(&mut self) {
    self.tracks.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bbox::BoundingBox;

  fn detection(class_id: usize, x: f32, y: f32, timestamp_ms: u64) -> Detection {
    Detection {
      class_id,
      label: format!("class-{}", class_id),
      confidence: 0.9,
      bbox: BoundingBox::new(x, y, 0.2, 0.2),
      timestamp_ms,
    }
  }

  #[test]
  fn same_sign_confirms_after_three_frames() {
    // 五帧相同位置的标志：第 1 帧待定，第 3 帧确认，3-5 帧输出
    let mut tracker = Tracker::new(0.3, 3, 5);
    for frame in 1..=5u64 {
      let confirmed = tracker.update(vec![detection(14, 0.4, 0.4, frame * 33)]);
      if frame < 3 {
        assert!(confirmed.is_empty(), "第 {} 帧不应有确认轨迹", frame);
        assert_eq!(tracker.len(), 1);
      } else {
        assert_eq!(confirmed.len(), 1, "第 {} 帧应输出确认轨迹", frame);
        assert_eq!(confirmed[0].hits, frame as u32);
      }
    }
  }

  #[test]
  fn track_is_never_confirmed_below_hit_count() {
    let mut tracker = Tracker::new(0.3, 3, 5);
    tracker.update(vec![detection(1, 0.1, 0.1, 0)]);
    let confirmed = tracker.update(vec![detection(1, 0.1, 0.1, 33)]);
    assert!(confirmed.is_empty());
  }

  #[test]
  fn tentative_track_dies_on_first_miss() {
    let mut tracker = Tracker::new(0.3, 3, 5);
    tracker.update(vec![detection(1, 0.1, 0.1, 0)]);
    tracker.update(vec![]);
    assert!(tracker.is_empty());
  }

  #[test]
  fn confirmed_track_survives_m_minus_one_misses() {
    let m = 5;
    let mut tracker = Tracker::new(0.3, 3, m);
    for frame in 0..3 {
      tracker.update(vec![detection(1, 0.1, 0.1, frame * 33)]);
    }

    // M-1 次丢失仍然存活
    for _ in 0..m - 1 {
      tracker.update(vec![]);
    }
    assert_eq!(tracker.len(), 1);

    // 第 M 次丢失后移除
    tracker.update(vec![]);
    assert!(tracker.is_empty());
  }

  #[test]
  fn miss_counter_resets_on_match() {
    let m = 3;
    let mut tracker = Tracker::new(0.3, 1, m);
    tracker.update(vec![detection(1, 0.1, 0.1, 0)]);
    tracker.update(vec![]);
    tracker.update(vec![]);
    tracker.update(vec![detection(1, 0.1, 0.1, 99)]);
    tracker.update(vec![]);
    tracker.update(vec![]);
    assert_eq!(tracker.len(), 1);
  }

  #[test]
  fn track_ids_are_unique() {
    let mut tracker = Tracker::new(0.3, 1, 1);
    let first = tracker.update(vec![detection(1, 0.1, 0.1, 0)]);
    // 轨迹过期后，同位置的新检测分配新 id
    tracker.update(vec![]);
    let second = tracker.update(vec![detection(1, 0.1, 0.1, 66)]);
    assert_ne!(first[0].track_id, second[0].track_id);
  }

  #[test]
  fn each_track_takes_at_most_one_detection() {
    let mut tracker = Tracker::new(0.3, 1, 5);
    tracker.update(vec![detection(1, 0.1, 0.1, 0)]);
    // 两个重叠检测：一个匹配既有轨迹，另一个生成新轨迹
    let confirmed = tracker.update(vec![
      detection(1, 0.1, 0.1, 33),
      detection(1, 0.12, 0.1, 33),
    ]);
    assert_eq!(confirmed.len(), 2);
    assert_eq!(tracker.len(), 2);
  }

  #[test]
  fn different_classes_never_match() {
    let mut tracker = Tracker::new(0.3, 2, 5);
    tracker.update(vec![detection(1, 0.1, 0.1, 0)]);
    tracker.update(vec![detection(2, 0.1, 0.1, 33)]);
    // 类别不同不关联：原待定轨迹丢失过期，新轨迹待定
    assert_eq!(tracker.len(), 1);
    assert!(tracker.confirmed().is_empty());
  }

  #[test]
  fn greedy_matching_prefers_higher_iou() {
    let mut tracker = Tracker::new(0.1, 1, 5);
    tracker.update(vec![detection(1, 0.1, 0.1, 0), detection(1, 0.5, 0.5, 0)]);
    let confirmed = tracker.update(vec![
      detection(1, 0.52, 0.5, 33),
      detection(1, 0.12, 0.1, 33),
    ]);
    assert_eq!(confirmed.len(), 2);
    // 每条轨迹跟随离自己更近的检测
    let by_id: Vec<_> = {
      let mut tracks = confirmed.clone();
      tracks.sort_by_key(|t| t.track_id);
      tracks
    };
    assert!((by_id[0].detection.bbox.x - 0.12).abs() < 1e-6);
    assert!((by_id[1].detection.bbox.x - 0.52).abs() < 1e-6);
  }
}
