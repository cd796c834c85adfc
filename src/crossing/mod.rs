/// 穿越判定系统 (Crossing Engine)
///
/// 每帧对本帧匹配到的轨迹做边界侧判定:
/// 1. 代表点 (中心 / 底边中点) 是否落在红框区域内
/// 2. 新的一侧需连续保持 `debounce_frames` 帧才被接受
/// 3. 被接受的 外→内 (或按策略的 内→外) 变化计数 +1 并生成事件
///
/// 红框未找到的帧不做任何判定, 去抖进度保留。
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CrossingConfig;
use crate::detection::{BBox, Point2};
use crate::segmentation::BoundaryRegion;
use crate::tracking::{Side, TrackSnapshot, Tracker};

/// 计数方向策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingPolicy {
    /// 只计进入 (外→内)
    #[default]
    EntryOnly,
    BothDirections,
    /// 只计离开 (内→外)
    ExitOnly,
}

impl CrossingPolicy {
    pub fn counts(self, direction: CrossingDirection) -> bool {
        matches!(
            (self, direction),
            (CrossingPolicy::EntryOnly, CrossingDirection::Entry)
                | (CrossingPolicy::ExitOnly, CrossingDirection::Exit)
                | (CrossingPolicy::BothDirections, _)
        )
    }
}

impl std::str::FromStr for CrossingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "entry" | "entry_only" => Ok(CrossingPolicy::EntryOnly),
            "both" | "both_directions" => Ok(CrossingPolicy::BothDirections),
            "exit" | "exit_only" => Ok(CrossingPolicy::ExitOnly),
            other => Err(format!("未知的穿越策略: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    Entry,
    Exit,
}

impl CrossingDirection {
    fn of(from: Side, to: Side) -> Option<Self> {
        match (from, to) {
            (Side::Outside, Side::Inside) => Some(CrossingDirection::Entry),
            (Side::Inside, Side::Outside) => Some(CrossingDirection::Exit),
            // 首次确定边界侧不算穿越
            _ => None,
        }
    }
}

/// 轨迹代表点
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativePoint {
    #[default]
    Center,
    BottomCenter,
}

impl RepresentativePoint {
    pub fn of(self, bbox: &BBox) -> Point2 {
        match self {
            RepresentativePoint::Center => bbox.center(),
            RepresentativePoint::BottomCenter => bbox.bottom_center(),
        }
    }
}

/// 穿越事件 (创建后不再修改)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CrossingEvent {
    pub object_id: u64,
    pub object_name: String,
    /// 递增后的计数
    pub crossing_count: u32,
    /// 采集时间 (秒)
    pub timestamp: f64,
    pub direction: CrossingDirection,
    pub seq: u64,
}

impl CrossingEvent {
    pub fn to_message(&self) -> CrossingMessage {
        CrossingMessage {
            kind: CrossingMessage::TYPE.to_string(),
            object_id: self.object_id,
            object_name: self.object_name.clone(),
            crossing_count: self.crossing_count,
            timestamp: self.timestamp,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_message())
    }
}

/// 推送给监听者的 JSON 消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossingMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub object_id: u64,
    pub object_name: String,
    pub crossing_count: u32,
    pub timestamp: f64,
}

impl CrossingMessage {
    pub const TYPE: &'static str = "crossing";

    /// 解析一条消息; 类型不符同样视为无效
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<Self>(text)
            .ok()
            .filter(|m| m.kind == Self::TYPE)
    }
}

pub struct CrossingEngine {
    config: CrossingConfig,
    total_crossings: u64,
}

impl CrossingEngine {
    pub fn new(config: CrossingConfig) -> Self {
        info!(
            "🚪 穿越判定: {:?}, 代表点 {:?}, 去抖 {} 帧",
            config.policy, config.point, config.debounce_frames
        );
        Self {
            config,
            total_crossings: 0,
        }
    }

    pub fn policy(&self) -> CrossingPolicy {
        self.config.policy
    }

    /// 所有轨迹累计的穿越次数
    pub fn total_crossings(&self) -> u64 {
        self.total_crossings
    }

    /// 判定检测框相对红框的位置
    pub fn side_of(&self, region: &BoundaryRegion, bbox: &BBox) -> Side {
        if self.config.require_smaller_than_region && bbox.area() >= region.bounds_area() {
            return Side::Outside;
        }
        if region.contains(&self.config.point.of(bbox)) {
            Side::Inside
        } else {
            Side::Outside
        }
    }

    /// 对本帧轨迹做判定, 返回按 id 升序的事件
    pub fn evaluate(
        &mut self,
        tracker: &mut Tracker,
        tracks: &[TrackSnapshot],
        region: Option<&BoundaryRegion>,
        timestamp: f64,
        seq: u64,
    ) -> Vec<CrossingEvent> {
        let Some(region) = region else {
            return Vec::new();
        };

        let mut ordered: Vec<&TrackSnapshot> = tracks.iter().filter(|t| t.matched).collect();
        ordered.sort_by_key(|t| t.id);

        let mut events = Vec::new();
        for track in ordered {
            let observed = self.side_of(region, &track.bbox);
            let Some(change) = tracker.observe_side(track.id, observed, self.config.debounce_frames)
            else {
                continue;
            };
            tracker.set_side(track.id, change.to);

            let Some(direction) = CrossingDirection::of(change.from, change.to) else {
                continue;
            };
            if !self.config.policy.counts(direction) {
                continue;
            }
            let Some(count) = tracker.increment_crossing(track.id) else {
                continue;
            };
            self.total_crossings += 1;

            info!(
                "🎯 穿越! #{} {} ({:?}) 第 {} 次 @ 帧 {}",
                track.id, track.label, direction, count, seq
            );
            events.push(CrossingEvent {
                object_id: track.id,
                object_name: track.label.clone(),
                crossing_count: count,
                timestamp,
                direction,
                seq,
            });
        }
        events
    }
}
