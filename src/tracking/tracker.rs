//! 多目标跟踪器
//!
//! 每帧: 预测 → 打分 → 分配 → 更新/新建 → 丢失计数 → 删除超时轨迹。
//! 轨迹只由跟踪器持有; 穿越判定只能通过 `observe_side` / `set_side` /
//! `increment_crossing` 修改边界侧标记与计数。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::kalman::KalmanBoxFilter;
use super::matching::{MatchStrategy, ScoreMatrix};
use crate::config::TrackerConfig;
use crate::detection::{BBox, Detection, Point2};

/// 相对红框的位置
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Unknown,
    Outside,
    Inside,
}

/// 一次被接受的边界侧变化
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SideChange {
    pub track_id: u64,
    pub from: Side,
    pub to: Side,
}

#[derive(Clone, Debug)]
struct LabelVote {
    label: String,
    count: u32,
    last_seq: u64,
}

/// 跟踪对象 (跟踪器内部持有)
#[derive(Clone, Debug)]
struct Track {
    id: u64,
    label: String,
    votes: Vec<LabelVote>,
    bbox: BBox,
    confidence: f32,
    kalman: KalmanBoxFilter,
    history: VecDeque<Point2>,

    side: Side,
    // 去抖状态
    pending_side: Option<Side>,
    pending_frames: u32,

    crossings: u32,
    frames_lost: u32,
    first_seq: u64,
    last_seq: u64,
    matched: bool,
}

impl Track {
    fn new(id: u64, det: &Detection, seq: u64, config: &TrackerConfig) -> Self {
        let mut history = VecDeque::with_capacity(config.history_len);
        history.push_back(det.bbox.center());
        Self {
            id,
            label: det.label.clone(),
            votes: vec![LabelVote {
                label: det.label.clone(),
                count: 1,
                last_seq: seq,
            }],
            bbox: det.bbox,
            confidence: det.confidence,
            kalman: KalmanBoxFilter::new(
                &det.bbox,
                config.kalman_process_noise,
                config.kalman_obs_noise,
                config.kalman_velocity_decay,
            ),
            history,
            side: Side::Unknown,
            pending_side: None,
            pending_frames: 0,
            crossings: 0,
            frames_lost: 0,
            first_seq: seq,
            last_seq: seq,
            matched: true,
        }
    }

    fn absorb(&mut self, det: &Detection, seq: u64, history_len: usize) {
        self.kalman.update(&det.bbox);
        self.bbox = det.bbox;
        self.confidence = det.confidence;
        self.frames_lost = 0;
        self.last_seq = seq;
        self.matched = true;

        self.history.push_back(det.bbox.center());
        while self.history.len() > history_len.max(1) {
            self.history.pop_front();
        }

        match self.votes.iter_mut().find(|v| v.label == det.label) {
            Some(v) => {
                v.count += 1;
                v.last_seq = seq;
            }
            None => self.votes.push(LabelVote {
                label: det.label.clone(),
                count: 1,
                last_seq: seq,
            }),
        }
        // 票数最多者胜, 平票取最近出现的
        if let Some(best) = self
            .votes
            .iter()
            .max_by(|a, b| a.count.cmp(&b.count).then(a.last_seq.cmp(&b.last_seq)))
        {
            self.label = best.label.clone();
        }
    }

    fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            label: self.label.clone(),
            bbox: self.bbox,
            confidence: self.confidence,
            history: self.history.iter().copied().collect(),
            side: self.side,
            crossing_count: self.crossings,
            frames_lost: self.frames_lost,
            first_seq: self.first_seq,
            last_seq: self.last_seq,
            matched: self.matched,
        }
    }
}

/// 轨迹只读快照
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub id: u64,
    pub label: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub history: Vec<Point2>,
    pub side: Side,
    pub crossing_count: u32,
    pub frames_lost: u32,
    pub first_seq: u64,
    pub last_seq: u64,
    /// 本帧是否匹配到检测
    pub matched: bool,
}

/// 多目标跟踪器
pub struct Tracker {
    config: TrackerConfig,
    strategy: Box<dyn MatchStrategy>,
    tracks: Vec<Track>,
    next_id: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        let strategy = config.matcher.build();
        Self::with_strategy(config, strategy)
    }

    pub fn with_strategy(config: TrackerConfig, strategy: Box<dyn MatchStrategy>) -> Self {
        Self {
            config,
            strategy,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// 更新跟踪, 返回所有存活轨迹 (按 id 升序)
    pub fn update(&mut self, detections: &[Detection], seq: u64) -> Vec<TrackSnapshot> {
        // 1. 预测
        for track in &mut self.tracks {
            track.kalman.predict();
            track.matched = false;
        }

        // 2. 打分: max(IOU(预测框), IOU(上一帧框)) × 类别权重
        let mut scores = ScoreMatrix::new(self.tracks.len(), detections.len());
        for (r, track) in self.tracks.iter().enumerate() {
            let predicted = self.config.motion_prediction.then(|| track.kalman.bbox());
            for (c, det) in detections.iter().enumerate() {
                let overlap = match predicted {
                    Some(p) => p.iou(&det.bbox).max(track.bbox.iou(&det.bbox)),
                    None => track.bbox.iou(&det.bbox),
                };
                let weight = if det.label == track.label {
                    1.0
                } else {
                    self.config.label_mismatch_weight
                };
                scores.set(r, c, overlap * weight);
            }
        }

        // 3. 分配
        let assignments = self.strategy.assign(&scores, self.config.min_match_score);

        // 4. 匹配的轨迹吸收检测
        let mut det_used = vec![false; detections.len()];
        for &(r, c) in &assignments {
            det_used[c] = true;
            self.tracks[r].absorb(&detections[c], seq, self.config.history_len);
        }

        // 5. 未匹配的轨迹 → 丢失计数
        for track in self.tracks.iter_mut().filter(|t| !t.matched) {
            track.frames_lost += 1;
        }

        // 6. 未匹配的检测 → 新建轨迹
        for (c, det) in detections.iter().enumerate() {
            if det_used[c] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            debug!("🆕 新轨迹 #{} ({}) @ 帧 {}", id, det.label, seq);
            self.tracks.push(Track::new(id, det, seq, &self.config));
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| {
            let keep = t.frames_lost <= max_lost;
            if !keep {
                debug!("💀 轨迹 #{} 丢失 {} 帧, 移除", t.id, t.frames_lost);
            }
            keep
        });

        self.tracks.iter().map(Track::snapshot).collect()
    }

    /// 记录一次边界侧观测, 满足去抖帧数时返回待接受的变化
    ///
    /// 只修改去抖计数; 真正的边界侧由 `set_side` 写入。
    pub fn observe_side(&mut self, id: u64, observed: Side, debounce: u32) -> Option<SideChange> {
        if observed == Side::Unknown {
            return None;
        }
        let track = self.tracks.iter_mut().find(|t| t.id == id)?;
        if observed == track.side {
            track.pending_side = None;
            track.pending_frames = 0;
            return None;
        }
        if track.pending_side == Some(observed) {
            track.pending_frames += 1;
        } else {
            track.pending_side = Some(observed);
            track.pending_frames = 1;
        }
        (track.pending_frames >= debounce.max(1)).then_some(SideChange {
            track_id: id,
            from: track.side,
            to: observed,
        })
    }

    /// 写入边界侧 (不允许回到 Unknown)
    pub fn set_side(&mut self, id: u64, side: Side) -> bool {
        if side == Side::Unknown {
            return false;
        }
        match self.tracks.iter_mut().find(|t| t.id == id) {
            Some(track) => {
                track.side = side;
                track.pending_side = None;
                track.pending_frames = 0;
                true
            }
            None => false,
        }
    }

    /// 穿越计数 +1, 返回新值
    pub fn increment_crossing(&mut self, id: u64) -> Option<u32> {
        let track = self.tracks.iter_mut().find(|t| t.id == id)?;
        track.crossings += 1;
        Some(track.crossings)
    }

    pub fn get(&self, id: u64) -> Option<TrackSnapshot> {
        self.tracks.iter().find(|t| t.id == id).map(Track::snapshot)
    }

    pub fn snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks.iter().map(Track::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// 已分配过的 id 总数
    pub fn ids_issued(&self) -> u64 {
        self.next_id - 1
    }

    /// 清空轨迹 (id 计数不回退)
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::MatcherKind;

    fn det(x: f32, y: f32, label: &str) -> Detection {
        Detection::new(BBox::from_xywh(x, y, 40.0, 40.0), 0.9, 0, label)
    }

    fn tracker() -> Tracker {
        Tracker::new(TrackerConfig::default())
    }

    #[test]
    fn test_moving_object_keeps_id() {
        let mut t = tracker();
        for seq in 1..=20u64 {
            let snaps = t.update(&[det(seq as f32 * 4.0, 100.0, "cup")], seq);
            assert_eq!(snaps.len(), 1);
            assert_eq!(snaps[0].id, 1);
            assert!(snaps[0].matched);
        }
        assert_eq!(t.ids_issued(), 1);
        assert_eq!(t.get(1).map(|s| s.history.len()), Some(20));
    }

    #[test]
    fn test_two_objects_distinct_ids() {
        let mut t = tracker();
        let snaps = t.update(&[det(0.0, 0.0, "cup"), det(300.0, 0.0, "cup")], 1);
        assert_eq!(snaps.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
        // 顺序打乱后仍保持身份
        let snaps = t.update(&[det(302.0, 0.0, "cup"), det(2.0, 0.0, "cup")], 2);
        assert_eq!(snaps[0].id, 1);
        assert!((snaps[0].bbox.x1 - 2.0).abs() < 1e-3);
        assert_eq!(snaps[1].id, 2);
        assert!((snaps[1].bbox.x1 - 302.0).abs() < 1e-3);
    }

    #[test]
    fn test_death_after_max_lost_and_no_reuse() {
        let config = TrackerConfig {
            max_lost_frames: 3,
            ..Default::default()
        };
        let mut t = Tracker::new(config);
        t.update(&[det(0.0, 0.0, "cup")], 1);
        for seq in 2..=4 {
            assert_eq!(t.update(&[], seq).len(), 1);
        }
        // 第4次未匹配 > 3, 删除
        assert!(t.update(&[], 5).is_empty());

        let snaps = t.update(&[det(0.0, 0.0, "cup")], 6);
        assert_eq!(snaps[0].id, 2);
    }

    #[test]
    fn test_reset_clears_tracks_keeps_id_counter() {
        let mut t = tracker();
        t.update(&[det(0.0, 0.0, "cup"), det(300.0, 0.0, "cup")], 1);
        t.reset();
        assert!(t.is_empty());
        assert!(t.get(1).is_none());

        let snaps = t.update(&[det(0.0, 0.0, "cup")], 2);
        assert_eq!(snaps[0].id, 3);
        assert_eq!(t.ids_issued(), 3);
    }

    #[test]
    fn test_label_majority_with_recent_tiebreak() {
        let mut t = tracker();
        t.update(&[det(0.0, 0.0, "cup")], 1);
        let s = t.update(&[det(0.0, 0.0, "bottle")], 2);
        // 1:1 平票 → 最近的 bottle
        assert_eq!(s[0].label, "bottle");
        assert_eq!(s[0].id, 1);
        t.update(&[det(0.0, 0.0, "cup")], 3);
        let s = t.update(&[det(0.0, 0.0, "bottle")], 4);
        assert_eq!(s[0].label, "bottle");
        let s = t.update(&[det(0.0, 0.0, "cup")], 5);
        assert_eq!(s[0].label, "cup");
    }

    #[test]
    fn test_history_is_bounded() {
        let config = TrackerConfig {
            history_len: 5,
            ..Default::default()
        };
        let mut t = Tracker::new(config);
        for seq in 1..=12 {
            t.update(&[det(seq as f32, 0.0, "cup")], seq);
        }
        let s = t.get(1).unwrap();
        assert_eq!(s.history.len(), 5);
        assert!((s.history[4].x - 32.0).abs() < 1e-3);
    }

    #[test]
    fn test_side_mutators() {
        let mut t = tracker();
        t.update(&[det(0.0, 0.0, "cup")], 1);
        assert!(!t.set_side(1, Side::Unknown));
        assert!(t.set_side(1, Side::Outside));
        assert!(!t.set_side(99, Side::Inside));
        assert_eq!(t.increment_crossing(1), Some(1));
        assert_eq!(t.increment_crossing(1), Some(2));
        assert_eq!(t.increment_crossing(7), None);
        assert_eq!(t.get(1).unwrap().crossing_count, 2);
    }

    #[test]
    fn test_observe_side_debounce() {
        let mut t = tracker();
        t.update(&[det(0.0, 0.0, "cup")], 1);
        assert!(t.set_side(1, Side::Outside));

        assert_eq!(t.observe_side(1, Side::Inside, 3), None);
        assert_eq!(t.observe_side(1, Side::Inside, 3), None);
        // 抖回外侧, 进度清零
        assert_eq!(t.observe_side(1, Side::Outside, 3), None);
        assert_eq!(t.observe_side(1, Side::Inside, 3), None);
        assert_eq!(t.observe_side(1, Side::Inside, 3), None);
        let change = t.observe_side(1, Side::Inside, 3).unwrap();
        assert_eq!(change.from, Side::Outside);
        assert_eq!(change.to, Side::Inside);
        // 未 set_side 前边界侧不变
        assert_eq!(t.get(1).unwrap().side, Side::Outside);
    }

    #[test]
    fn test_hungarian_tracker_matches() {
        let config = TrackerConfig {
            matcher: MatcherKind::Hungarian,
            ..Default::default()
        };
        let mut t = Tracker::new(config);
        assert_eq!(t.strategy_name(), "hungarian");
        t.update(&[det(0.0, 0.0, "cup"), det(100.0, 0.0, "cup")], 1);
        let s = t.update(&[det(101.0, 0.0, "cup"), det(1.0, 0.0, "cup")], 2);
        assert_eq!(s.len(), 2);
        assert!((s[0].bbox.x1 - 1.0).abs() < 1e-3);
    }
}
