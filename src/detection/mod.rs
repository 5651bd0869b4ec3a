//! 目标检测模块: 类型、推理后端抽象、置信度过滤与坐标映射、多目标跟踪

pub mod detector;
pub mod tracker;
pub mod types;

pub use detector::{Detector, DetectorFactory};
pub use tracker::{MultiBoxTracker, TrackedObject, Tracker};
pub use types::{Backend, BBox, MappedDetection, RawDetection};

use crate::transform::AffineMatrix;

/// 过滤原始检测并映射回原始帧坐标系。
///
/// 先过滤再变换: 置信度低于阈值(严格小于才丢)、框缺失或畸形的检测
/// 不进入坐标映射。映射用crop→frame逆矩阵变换四个角点后重取min/max,
/// 旋转下的轴对齐外接框由此保证。输出保持输入顺序。
pub fn filter_and_map(
    raw: &[RawDetection],
    min_confidence: f32,
    crop_to_frame: &AffineMatrix,
) -> Vec<MappedDetection> {
    let mut mapped = Vec::with_capacity(raw.len());
    for det in raw {
        // NaN置信度与低于阈值一样丢弃
        if !det.confidence.is_finite() || det.confidence < min_confidence {
            continue;
        }
        let bbox = match det.bbox {
            Some(b) if b.is_well_formed() => b,
            _ => continue,
        };
        let corners = [
            crop_to_frame.transform_point(bbox.x1, bbox.y1),
            crop_to_frame.transform_point(bbox.x2, bbox.y1),
            crop_to_frame.transform_point(bbox.x1, bbox.y2),
            crop_to_frame.transform_point(bbox.x2, bbox.y2),
        ];
        let mut x1 = f32::INFINITY;
        let mut y1 = f32::INFINITY;
        let mut x2 = f32::NEG_INFINITY;
        let mut y2 = f32::NEG_INFINITY;
        for (x, y) in corners {
            x1 = x1.min(x);
            y1 = y1.min(y);
            x2 = x2.max(x);
            y2 = y2.max(y);
        }
        mapped.push(MappedDetection {
            class_id: det.class_id,
            confidence: det.confidence,
            bbox: BBox::new(x1, y1, x2, y2),
        });
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(confidence: f32, bbox: Option<BBox>) -> RawDetection {
        RawDetection {
            class_id: 0,
            confidence,
            bbox,
        }
    }

    #[test]
    fn test_confidence_threshold_boundary() {
        let id = AffineMatrix::identity();
        let dets = vec![
            raw(0.3, Some(BBox::new(0.0, 0.0, 10.0, 10.0))),
            raw(0.2999, Some(BBox::new(0.0, 0.0, 10.0, 10.0))),
        ];
        let out = filter_and_map(&dets, 0.3, &id);
        // 等于阈值保留,低于阈值丢弃
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.3);
    }

    #[test]
    fn test_nan_confidence_dropped() {
        let id = AffineMatrix::identity();
        let dets = vec![raw(f32::NAN, Some(BBox::new(0.0, 0.0, 10.0, 10.0)))];
        assert!(filter_and_map(&dets, 0.3, &id).is_empty());
    }

    #[test]
    fn test_malformed_and_missing_boxes_dropped() {
        let id = AffineMatrix::identity();
        let dets = vec![
            raw(0.9, None),
            raw(0.9, Some(BBox::new(10.0, 0.0, 5.0, 10.0))),
            raw(0.9, Some(BBox::new(0.0, 0.0, 10.0, 10.0))),
        ];
        let out = filter_and_map(&dets, 0.3, &id);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_rotation_remaps_to_axis_aligned_hull() {
        // 90°旋转矩阵: (x,y) → (-y,x),四角变换后重取min/max
        let rot = AffineMatrix::rotation_degrees(90.0);
        let dets = vec![raw(0.9, Some(BBox::new(10.0, 20.0, 30.0, 60.0)))];
        let out = filter_and_map(&dets, 0.3, &rot);
        assert_eq!(out.len(), 1);
        let b = out[0].bbox;
        assert!((b.x1 - -60.0).abs() < 1e-4);
        assert!((b.y1 - 10.0).abs() < 1e-4);
        assert!((b.x2 - -20.0).abs() < 1e-4);
        assert!((b.y2 - 30.0).abs() < 1e-4);
        assert!(b.is_well_formed());
    }

    #[test]
    fn test_order_preserved() {
        let id = AffineMatrix::identity();
        let dets = vec![
            raw(0.5, Some(BBox::new(0.0, 0.0, 1.0, 1.0))),
            raw(0.9, Some(BBox::new(1.0, 1.0, 2.0, 2.0))),
            raw(0.7, Some(BBox::new(2.0, 2.0, 3.0, 3.0))),
        ];
        let out = filter_and_map(&dets, 0.3, &id);
        let confs: Vec<f32> = out.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.5, 0.9, 0.7]);
    }
}
