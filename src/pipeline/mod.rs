/// 处理流水线 (Processing Pipeline)
///
/// 每帧: 帧源 → [红框分割 ∥ 目标检测] → 跟踪 → 穿越判定 → 事件队列
///
/// - `PipelineContext` 独占全部可变状态 (分割器 / 检测阶段 / 跟踪器 / 穿越引擎)
/// - 单帧内任何阶段失败都在本帧恢复, 只有采集源丢失会终止循环
/// - 推送与流水线解耦: 事件只进入有界队列, 不等待网络
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::crossing::{CrossingEngine, CrossingEvent};
use crate::detection::{DetectorStage, DetectorStatus, ObjectDetector};
use crate::error::CaptureError;
use crate::input::{Frame, FrameSource, NextFrame};
use crate::publish::EventSender;
use crate::segmentation::{BoundarySegmenter, RegionStatus, ThresholdHandle};
use crate::tracking::{TrackSnapshot, Tracker};

/// 单帧处理结果
#[derive(Clone, Debug, Serialize)]
pub struct FrameReport {
    pub seq: u64,
    pub region: RegionStatus,
    pub detector: DetectorStatus,
    pub tracks: Vec<TrackSnapshot>,
    pub events: Vec<CrossingEvent>,
}

/// 运行统计
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    /// 等待超时次数
    pub pending: u64,
    /// 可恢复的采集错误
    pub capture_errors: u64,
    pub detector_failures: u64,
    /// 本帧无红框 (含沿用耗尽)
    pub regions_missing: u64,
    pub events: u64,
    /// 事件队列溢出丢弃数
    pub events_dropped: u64,
}

// ========== 调试接口 ==========

/// 最新一帧的诊断快照
#[derive(Clone, Debug, Serialize)]
pub struct DebugSnapshot {
    pub seq: u64,
    pub region: RegionStatus,
    pub detector: DetectorStatus,
    pub tracks: Vec<TrackSnapshot>,
    pub total_crossings: u64,
}

/// 诊断快照槽 (流水线写, HTTP 读)
#[derive(Clone, Default)]
pub struct DebugTap {
    inner: Arc<Mutex<Option<DebugSnapshot>>>,
}

impl DebugTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: DebugSnapshot) {
        match self.inner.lock() {
            Ok(mut guard) => *guard = Some(snapshot),
            Err(poisoned) => *poisoned.into_inner() = Some(snapshot),
        }
    }

    pub fn latest(&self) -> Option<DebugSnapshot> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

// ========== 流水线上下文 ==========

pub struct PipelineContext {
    segmenter: BoundarySegmenter,
    detector: DetectorStage,
    tracker: Tracker,
    crossing: CrossingEngine,
}

impl PipelineContext {
    pub fn new(config: &AppConfig, detector: Box<dyn ObjectDetector>) -> Self {
        let thresholds = ThresholdHandle::new(config.segmenter.thresholds);
        Self::with_thresholds(config, detector, thresholds)
    }

    /// 使用外部共享的 HSV 阈值句柄 (运行时调参)
    pub fn with_thresholds(
        config: &AppConfig,
        detector: Box<dyn ObjectDetector>,
        thresholds: ThresholdHandle,
    ) -> Self {
        let tracker = Tracker::new(config.tracker.clone());
        info!("🧭 跟踪器: {} 匹配", tracker.strategy_name());
        Self {
            segmenter: BoundarySegmenter::with_thresholds(config.segmenter.clone(), thresholds),
            detector: DetectorStage::new(detector, config.detector.clone()),
            tracker,
            crossing: CrossingEngine::new(config.crossing.clone()),
        }
    }

    pub fn thresholds(&self) -> ThresholdHandle {
        self.segmenter.thresholds()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn total_crossings(&self) -> u64 {
        self.crossing.total_crossings()
    }

    /// 处理一帧 (分割与检测并行)
    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let segmenter = &mut self.segmenter;
        let detector = &mut self.detector;

        let (region, (detections, detector_status)) = std::thread::scope(|s| {
            let segmentation = s.spawn(|| segmenter.segment(frame));
            let detected = detector.run(frame);
            let region = segmentation.join().unwrap_or_else(|_| {
                error!("❌ 分割线程异常 #{}", frame.seq);
                RegionStatus::NotFound
            });
            (region, detected)
        });

        let tracks = self.tracker.update(&detections, frame.seq);
        let events = self.crossing.evaluate(
            &mut self.tracker,
            &tracks,
            region.region(),
            frame.timestamp_secs(),
            frame.seq,
        );
        for event in &events {
            info!(
                "🚩 穿越 #{} {} ({:?}, 第 {} 次) @ 帧 {}",
                event.object_id, event.object_name, event.direction, event.crossing_count, event.seq
            );
        }

        FrameReport {
            seq: frame.seq,
            region,
            detector: detector_status,
            tracks: self.tracker.snapshots(),
            events,
        }
    }

    /// 运行到帧源结束或采集源丢失
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        events: EventSender,
        tap: Option<DebugTap>,
    ) -> Result<RunSummary, CaptureError> {
        let stop = AtomicBool::new(false);
        self.run_until(source, events, tap, &stop)
    }

    /// 同 `run`, 另外在 `stop` 置位后于帧间退出
    pub fn run_until(
        &mut self,
        source: &mut dyn FrameSource,
        events: EventSender,
        tap: Option<DebugTap>,
        stop: &AtomicBool,
    ) -> Result<RunSummary, CaptureError> {
        info!("🚀 流水线启动: {}", source.name());
        let mut summary = RunSummary::default();

        // 每秒统计
        let mut count = 0u64;
        let mut last = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            let frame = match source.next_frame() {
                Ok(NextFrame::Frame(frame)) => frame,
                Ok(NextFrame::Pending) => {
                    summary.pending += 1;
                    continue;
                }
                Ok(NextFrame::EndOfStream) => {
                    info!("🏁 帧源结束");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        "❌ {} (已处理 {} 帧, {} 次穿越, 丢弃事件 {})",
                        e,
                        summary.frames,
                        summary.events,
                        events.dropped()
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!("⚠️ {}, 跳过本帧", e);
                    summary.capture_errors += 1;
                    continue;
                }
            };

            let report = self.process_frame(&frame);
            summary.frames += 1;
            if !report.detector.is_ok() {
                summary.detector_failures += 1;
            }
            if report.region.region().is_none() {
                summary.regions_missing += 1;
            }
            summary.events += report.events.len() as u64;

            if let Some(tap) = &tap {
                tap.publish(DebugSnapshot {
                    seq: report.seq,
                    region: report.region.clone(),
                    detector: report.detector.clone(),
                    tracks: report.tracks.clone(),
                    total_crossings: self.crossing.total_crossings(),
                });
            }
            for event in report.events {
                events.send(event);
            }

            count += 1;
            let elapsed = last.elapsed().as_secs_f64();
            if elapsed >= 1.0 {
                info!(
                    "📊 {:.1} 帧/秒 | 检测 {:.1} ms | 轨迹 {} | 穿越累计 {}",
                    count as f64 / elapsed,
                    self.detector.last_ms(),
                    self.tracker.len(),
                    self.crossing.total_crossings()
                );
                count = 0;
                last = Instant::now();
            }
        }

        summary.events_dropped = events.dropped();
        debug!("流水线统计: {:?}", summary);
        info!(
            "🛑 流水线结束: {} 帧, {} 次穿越",
            summary.frames, summary.events
        );
        Ok(summary)
    }
}
