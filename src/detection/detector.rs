//! 检测器适配层 (Detector)
//! 职责: Frame → 任意后端检测 → 过滤 → Vec<Detection>
//!
//! 后端失败或超时都不会中断流水线, 只返回空结果并附带状态。

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::Detection;
use crate::config::DetectorConfig;
use crate::input::Frame;

/// 目标检测后端接口
///
/// 每次调用相互独立; 批处理与延迟隐藏在单次调用内部。
pub trait ObjectDetector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;
}

/// 单帧检测状态 (报告给流水线驱动)
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DetectorStatus {
    /// 正常, 过滤后的检测数
    Ok(usize),
    /// 超出时间预算, 本帧结果作废
    OverBudget(u64),
    /// 后端出错
    Failed(String),
}

impl DetectorStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DetectorStatus::Ok(_))
    }
}

/// 检测阶段: 后端 + 时间预算 + 置信度/类别过滤
pub struct DetectorStage {
    detector: Box<dyn ObjectDetector>,
    config: DetectorConfig,
    budget: Duration,

    // 统计
    last_ms: f64,
    failures: u64,
}

impl DetectorStage {
    pub fn new(detector: Box<dyn ObjectDetector>, config: DetectorConfig) -> Self {
        info!(
            "🔍 检测器: {} (置信度≥{:.2}, 预算 {} ms)",
            detector.name(),
            config.confidence_floor,
            config.time_budget_ms
        );
        let budget = Duration::from_millis(config.time_budget_ms);
        Self {
            detector,
            config,
            budget,
            last_ms: 0.0,
            failures: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.detector.name()
    }

    /// 上一次调用耗时 (毫秒)
    pub fn last_ms(&self) -> f64 {
        self.last_ms
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// 执行一次检测; 失败/超时返回空集合
    pub fn run(&mut self, frame: &Frame) -> (Vec<Detection>, DetectorStatus) {
        let t = Instant::now();
        let result = self.detector.detect(frame);
        let elapsed = t.elapsed();
        self.last_ms = elapsed.as_secs_f64() * 1000.0;

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                self.failures += 1;
                warn!("⚠️ 检测失败 #{}: {:#}", frame.seq, e);
                return (Vec::new(), DetectorStatus::Failed(format!("{:#}", e)));
            }
        };

        if elapsed > self.budget {
            self.failures += 1;
            let ms = elapsed.as_millis() as u64;
            warn!(
                "⏱️ 检测超时 #{}: {} ms > {} ms, 本帧跳过",
                frame.seq, ms, self.config.time_budget_ms
            );
            return (Vec::new(), DetectorStatus::OverBudget(ms));
        }

        let detections = self.filter(raw);
        debug!(
            "检测 #{}: {} 个目标 ({:.1} ms)",
            frame.seq,
            detections.len(),
            self.last_ms
        );
        let n = detections.len();
        (detections, DetectorStatus::Ok(n))
    }

    fn filter(&self, raw: Vec<Detection>) -> Vec<Detection> {
        raw.into_iter()
            .filter(|d| d.bbox.is_valid() && d.confidence.is_finite())
            .map(|mut d| {
                d.confidence = d.confidence.clamp(0.0, 1.0);
                d
            })
            .filter(|d| d.confidence >= self.config.confidence_floor)
            .filter(|d| {
                self.config.allowed_labels.is_empty()
                    || self.config.allowed_labels.iter().any(|l| l == &d.label)
            })
            .collect()
    }
}

// ========== 回放检测器 ==========

/// 录制的检测结果 (按帧序号索引)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DetectionLog {
    pub frames: HashMap<u64, Vec<Detection>>,
}

/// 回放检测器: 从JSON文件读取每帧检测结果
///
/// 文件格式: `{ "frames": { "1": [ {bbox, confidence, class_id, label}, ... ] } }`
pub struct ReplayDetector {
    name: String,
    log: DetectionLog,
}

impl ReplayDetector {
    pub fn new(log: DetectionLog) -> Self {
        Self {
            name: "replay".to_string(),
            log,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("读取检测记录失败: {}", path.display()))?;
        let log: DetectionLog = serde_json::from_str(&json)
            .with_context(|| format!("解析检测记录失败: {}", path.display()))?;
        info!(
            "📼 检测记录已加载: {} ({} 帧)",
            path.display(),
            log.frames.len()
        );
        Ok(Self {
            name: format!("replay:{}", path.display()),
            log,
        })
    }
}

impl ObjectDetector for ReplayDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        Ok(self.log.frames.get(&frame.seq).cloned().unwrap_or_default())
    }
}

/// 空检测器 (未配置模型时只做红框分割)
pub struct NullDetector;

impl ObjectDetector for NullDetector {
    fn name(&self) -> &str {
        "none"
    }

    fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}
