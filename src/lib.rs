//! 红框通过计数 (Red Frame Crossing Counter)
//!
//! 帧源 → 红框分割 ∥ 目标检测 → 跟踪 → 穿越判定 → WebSocket 推送
pub mod config; // 配置参数
pub mod crossing; // 穿越判定
pub mod detection; // 目标检测
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod pipeline; // 处理流水线
pub mod publish; // 事件推送
pub mod segmentation; // 红框分割
pub mod tracking; // 多目标跟踪

pub use crate::config::AppConfig;
pub use crate::crossing::{CrossingEngine, CrossingEvent, CrossingMessage, CrossingPolicy};
pub use crate::detection::{BBox, Detection, ObjectDetector, Point2};
pub use crate::error::{CaptureError, PublishError};
pub use crate::input::{Frame, FrameSource, NextFrame};
pub use crate::pipeline::{DebugTap, PipelineContext, RunSummary};
pub use crate::publish::{event_queue, EventPublisher, EventSender, ListenerSet};
pub use crate::segmentation::{BoundaryRegion, BoundarySegmenter, RegionStatus};
pub use crate::tracking::{Side, Tracker};

/// 非极大值抑制 (同类别之间), 结果按置信度降序
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id != xs[index].class_id {
                continue;
            }
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
