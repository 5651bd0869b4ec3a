//! 多目标跟踪
//!
//! 贪心IOU关联: 每帧把新检测与既有轨迹按IOU配对,命中的轨迹做
//! 指数平滑更新,未命中的检测开新轨迹,连续丢失若干帧的轨迹淘汰。

use crate::detection::types::{BBox, MappedDetection};

/// 判定同一目标的最小IOU
const MIN_ASSOCIATION_IOU: f32 = 0.3;
/// 连续丢失多少帧后淘汰轨迹
const MAX_FRAMES_LOST: u32 = 8;
/// 框位置平滑系数 (新观测权重)
const SMOOTHING_ALPHA: f32 = 0.6;

/// 跟踪结果消费方。每帧推理完成后收到一次回调。
pub trait Tracker: Send {
    /// 处理一帧的映射检测。`timestamp`为帧序号,单调递增。
    fn track(&mut self, detections: &[MappedDetection], timestamp: u64);
}

/// 一条活跃轨迹
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub track_id: u64,
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BBox,
    pub last_seen: u64,
    frames_lost: u32,
}

/// 贪心IOU多框跟踪器
#[derive(Debug, Default)]
pub struct MultiBoxTracker {
    tracks: Vec<TrackedObject>,
    next_id: u64,
}

impl MultiBoxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前活跃轨迹
    pub fn tracked(&self) -> &[TrackedObject] {
        &self.tracks
    }

    fn smooth(old: &BBox, new: &BBox) -> BBox {
        let a = SMOOTHING_ALPHA;
        BBox::new(
            old.x1 + a * (new.x1 - old.x1),
            old.y1 + a * (new.y1 - old.y1),
            old.x2 + a * (new.x2 - old.x2),
            old.y2 + a * (new.y2 - old.y2),
        )
    }
}

impl Tracker for MultiBoxTracker {
    fn track(&mut self, detections: &[MappedDetection], timestamp: u64) {
        // 候选配对按IOU降序贪心选取,轨迹与检测各至多配对一次
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                if track.class_id != det.class_id {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= MIN_ASSOCIATION_IOU {
                    pairs.push((ti, di, iou));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        for (ti, di, _) in pairs {
            if track_used[ti] || det_used[di] {
                continue;
            }
            track_used[ti] = true;
            det_used[di] = true;
            let track = &mut self.tracks[ti];
            let det = &detections[di];
            track.bbox = Self::smooth(&track.bbox, &det.bbox);
            track.confidence = det.confidence;
            track.last_seen = timestamp;
            track.frames_lost = 0;
        }

        // 未命中的轨迹累计丢失
        for (ti, used) in track_used.iter().enumerate() {
            if !used {
                self.tracks[ti].frames_lost += 1;
            }
        }
        self.tracks.retain(|t| t.frames_lost <= MAX_FRAMES_LOST);

        // 未配对的检测开新轨迹
        for (di, det) in detections.iter().enumerate() {
            if det_used[di] {
                continue;
            }
            self.next_id += 1;
            self.tracks.push(TrackedObject {
                track_id: self.next_id,
                class_id: det.class_id,
                confidence: det.confidence,
                bbox: det.bbox,
                last_seen: timestamp,
                frames_lost: 0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> MappedDetection {
        MappedDetection {
            class_id,
            confidence,
            bbox: BBox::new(x1, y1, x2, y2),
        }
    }

    #[test]
    fn test_id_stable_across_frames() {
        let mut tracker = MultiBoxTracker::new();
        tracker.track(&[det(0, 0.9, 100.0, 100.0, 200.0, 200.0)], 1);
        assert_eq!(tracker.tracked().len(), 1);
        let id = tracker.tracked()[0].track_id;

        // 小幅移动后仍是同一轨迹
        tracker.track(&[det(0, 0.8, 105.0, 102.0, 205.0, 202.0)], 2);
        assert_eq!(tracker.tracked().len(), 1);
        assert_eq!(tracker.tracked()[0].track_id, id);
        assert_eq!(tracker.tracked()[0].last_seen, 2);
    }

    #[test]
    fn test_different_class_not_associated() {
        let mut tracker = MultiBoxTracker::new();
        tracker.track(&[det(0, 0.9, 100.0, 100.0, 200.0, 200.0)], 1);
        tracker.track(&[det(1, 0.9, 100.0, 100.0, 200.0, 200.0)], 2);
        // 同位置不同类别 → 两条轨迹
        assert_eq!(tracker.tracked().len(), 2);
    }

    #[test]
    fn test_lost_track_expires() {
        let mut tracker = MultiBoxTracker::new();
        tracker.track(&[det(0, 0.9, 0.0, 0.0, 10.0, 10.0)], 1);
        for t in 2..=(2 + MAX_FRAMES_LOST as u64) {
            tracker.track(&[], t);
        }
        assert!(tracker.tracked().is_empty());
    }

    #[test]
    fn test_smoothing_moves_toward_observation() {
        let mut tracker = MultiBoxTracker::new();
        tracker.track(&[det(0, 0.9, 0.0, 0.0, 100.0, 100.0)], 1);
        tracker.track(&[det(0, 0.9, 10.0, 0.0, 110.0, 100.0)], 2);
        let b = tracker.tracked()[0].bbox;
        assert!(b.x1 > 0.0 && b.x1 < 10.0, "x1={}", b.x1);
    }
}
