//! 运行参数配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crossing::{CrossingPolicy, RepresentativePoint};
use crate::segmentation::HsvThresholds;
use crate::tracking::MatcherKind;

/// 红框分割参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub thresholds: HsvThresholds,
    pub close_radius: u8,          // 形态学闭运算半径 (0=关闭)
    pub min_outer_area: f32,       // 外轮廓最小面积(像素²)
    pub min_aspect_ratio: f32,     // 外接框宽高比下限
    pub max_aspect_ratio: f32,     // 外接框宽高比上限
    pub min_inner_area: f32,       // 内孔最小面积
    pub hole_ratio_min: f32,       // 内孔/外轮廓面积比下限
    pub hole_ratio_max: f32,       // 内孔/外轮廓面积比上限
    pub approx_epsilon_ratio: f32, // 多边形简化 epsilon (周长比例)
    pub outline_margin: f32,       // 无内孔时外接框内缩比例
    pub max_carry_frames: u32,     // 丢失后沿用上一帧区域的最大帧数
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            thresholds: HsvThresholds::default(),
            close_radius: 2,
            min_outer_area: 1000.0,
            min_aspect_ratio: 0.2,
            max_aspect_ratio: 5.0,
            min_inner_area: 300.0,
            hole_ratio_min: 0.10,
            hole_ratio_max: 0.90,
            approx_epsilon_ratio: 0.01,
            outline_margin: 0.10,
            max_carry_frames: 5,
        }
    }
}

/// 检测器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_floor: f32,       // 置信度下限
    pub time_budget_ms: u64,         // 单帧检测时间预算
    pub allowed_labels: Vec<String>, // 类别白名单 (空=全部)
    pub input_size: u32,             // 模型输入尺寸 (onnx)
    pub nms_iou_threshold: f32,      // NMS IOU阈值 (onnx)
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.25,
            time_budget_ms: 200,
            allowed_labels: Vec::new(),
            input_size: 640,
            nms_iou_threshold: 0.45,
        }
    }
}

/// 跟踪器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub matcher: MatcherKind,
    pub min_match_score: f32,       // 最低匹配分数
    pub label_mismatch_weight: f32, // 类别不一致时的分数权重
    pub max_lost_frames: u32,       // 最大丢失帧数
    pub history_len: usize,         // 位置历史长度
    pub motion_prediction: bool,    // 是否使用卡尔曼预测框匹配

    // === 卡尔曼滤波参数 ===
    pub kalman_process_noise: f32,  // 过程噪声 q
    pub kalman_obs_noise: f32,      // 观测噪声 r
    pub kalman_velocity_decay: f32, // 速度衰减
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherKind::Greedy,
            min_match_score: 0.3,
            label_mismatch_weight: 0.5,
            max_lost_frames: 30,
            history_len: 30,
            motion_prediction: true,

            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,
            kalman_velocity_decay: 0.95,
        }
    }
}

/// 穿越判定参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossingConfig {
    pub policy: CrossingPolicy,
    pub point: RepresentativePoint,
    pub debounce_frames: u32,              // 去抖帧数
    pub require_smaller_than_region: bool, // 目标面积须小于红框外接框
}

impl Default for CrossingConfig {
    fn default() -> Self {
        Self {
            policy: CrossingPolicy::EntryOnly,
            point: RepresentativePoint::Center,
            debounce_frames: 3,
            require_smaller_than_region: true,
        }
    }
}

/// 推送参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub listen: String,        // WebSocket 监听地址
    pub event_queue: usize,    // 流水线 → 推送线程队列容量
    pub listener_queue: usize, // 单个监听者队列容量
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8765".to_string(),
            event_queue: 256,
            listener_queue: 64,
        }
    }
}

/// 完整配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub segmenter: SegmenterConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub crossing: CrossingConfig,
    pub publisher: PublisherConfig,
}

impl AppConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写入默认配置; 解析失败时使用默认值。
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {:#}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, json).with_context(|| format!("写入 {}", path.display()))?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前配置:");
        info!("  检测置信度下限: {:.2}", self.detector.confidence_floor);
        info!("  检测时间预算: {} ms", self.detector.time_budget_ms);
        info!(
            "  匹配策略: {:?} (最低分数 {:.2})",
            self.tracker.matcher, self.tracker.min_match_score
        );
        info!("  最大丢失帧: {}", self.tracker.max_lost_frames);
        info!(
            "  穿越策略: {:?}, 去抖 {} 帧",
            self.crossing.policy, self.crossing.debounce_frames
        );
        info!("  监听地址: {}", self.publisher.listen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let path = std::env::temp_dir().join(format!("redframe-cfg-{}.json", std::process::id()));
        let _ = fs::remove_file(&path);

        let config = AppConfig::load(&path);
        assert_eq!(config.crossing.debounce_frames, 3);
        assert!(path.exists());

        let reloaded = AppConfig::load(&path);
        assert_eq!(reloaded.publisher.listen, "127.0.0.1:8765");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "crossing": { "policy": "both_directions" } }"#).unwrap();
        assert_eq!(config.crossing.policy, CrossingPolicy::BothDirections);
        assert_eq!(config.crossing.debounce_frames, 3);
        assert_eq!(config.tracker.max_lost_frames, 30);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let path = std::env::temp_dir().join(format!("redframe-bad-{}.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load(&path);
        assert_eq!(config.detector.time_budget_ms, 200);
        fs::remove_file(&path).ok();
    }
}
