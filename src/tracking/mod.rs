/// 跟踪系统 (Tracking System)
///
/// - kalman:   匀速卡尔曼框滤波 (提供预测框)
/// - matching: 分数矩阵 + 可替换的分配策略 (贪心 / 匈牙利)
/// - tracker:  轨迹生命周期 (新建 / 更新 / 丢失 / 删除) 与边界侧状态
pub mod kalman;
pub mod matching;
pub mod tracker;

pub use kalman::KalmanBoxFilter;
pub use matching::{GreedyMatcher, HungarianMatcher, MatchStrategy, MatcherKind, ScoreMatrix};
pub use tracker::{Side, SideChange, TrackSnapshot, Tracker};
