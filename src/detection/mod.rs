/// 检测系统 (Detection System)
///
/// - types:    检测框 / 检测结果
/// - detector: 检测后端接口 + 时间预算/过滤阶段 + 回放后端
/// - yolo:     ONNX YOLO 后端 (onnx 功能)
pub mod detector;
pub mod types;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use detector::{
    DetectionLog, DetectorStage, DetectorStatus, NullDetector, ObjectDetector, ReplayDetector,
};
pub use types::{compute_iou, BBox, Detection, Point2};
#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;
