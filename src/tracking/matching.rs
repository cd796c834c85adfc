//! 轨迹-检测关联 (可替换的分配策略)
//!
//! 分数矩阵: 行 = 轨迹, 列 = 检测, 值越大越匹配。
//! 低于最低分数的配对永远不会被连接。

use serde::{Deserialize, Serialize};

/// 稠密分数矩阵 (行主序)
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl ScoreMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut m = Self::new(rows.len(), cols);
        for (r, row) in rows.iter().enumerate() {
            for (c, &v) in row.iter().enumerate().take(cols) {
                m.set(r, c, v);
            }
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.data[r * self.cols + c] = v;
    }
}

/// 分配策略
pub trait MatchStrategy: Send {
    fn name(&self) -> &'static str;

    /// 一对一分配, 返回 (轨迹下标, 检测下标), 按轨迹下标升序
    fn assign(&self, scores: &ScoreMatrix, min_score: f32) -> Vec<(usize, usize)>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    Greedy,
    Hungarian,
}

impl MatcherKind {
    pub fn build(self) -> Box<dyn MatchStrategy> {
        match self {
            MatcherKind::Greedy => Box::new(GreedyMatcher),
            MatcherKind::Hungarian => Box::new(HungarianMatcher),
        }
    }
}

// ========== 贪心 ==========

/// 贪心匹配: 按分数降序 (同分按下标) 依次占用
#[derive(Clone, Copy, Debug, Default)]
pub struct GreedyMatcher;

impl MatchStrategy for GreedyMatcher {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn assign(&self, scores: &ScoreMatrix, min_score: f32) -> Vec<(usize, usize)> {
        let mut candidates = Vec::new();
        for r in 0..scores.rows() {
            for c in 0..scores.cols() {
                let s = scores.get(r, c);
                if s >= min_score && s > 0.0 {
                    candidates.push((s, r, c));
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut used_track = vec![false; scores.rows()];
        let mut used_det = vec![false; scores.cols()];
        let mut assignments = Vec::new();
        for (_, r, c) in candidates {
            if !used_track[r] && !used_det[c] {
                used_track[r] = true;
                used_det[c] = true;
                assignments.push((r, c));
            }
        }
        assignments.sort_unstable();
        assignments
    }
}

// ========== 匈牙利 ==========

/// 最优二分匹配 (Kuhn-Munkres, 最大化总分)
#[derive(Clone, Copy, Debug, Default)]
pub struct HungarianMatcher;

impl MatchStrategy for HungarianMatcher {
    fn name(&self) -> &'static str {
        "hungarian"
    }

    fn assign(&self, scores: &ScoreMatrix, min_score: f32) -> Vec<(usize, usize)> {
        let n = scores.rows().max(scores.cols());
        if scores.rows() == 0 || scores.cols() == 0 {
            return Vec::new();
        }

        // 代价 = 1 - 分数; 不合格配对与补齐位置的分数视为 0
        let valid = |r: usize, c: usize| {
            r < scores.rows()
                && c < scores.cols()
                && scores.get(r, c) >= min_score
                && scores.get(r, c) > 0.0
        };
        let mut cost = vec![vec![1.0f64; n]; n];
        for (r, row) in cost.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                if valid(r, c) {
                    *v = 1.0 - scores.get(r, c) as f64;
                }
            }
        }

        let row_to_col = solve_min_cost(&cost);
        let mut assignments: Vec<(usize, usize)> = row_to_col
            .into_iter()
            .enumerate()
            .filter(|&(r, c)| valid(r, c))
            .collect();
        assignments.sort_unstable();
        assignments
    }
}

/// 方阵最小代价完美匹配 (势函数版, O(n³)), 返回每行分配的列
fn solve_min_cost(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    // 1 基下标, 0 为哨兵
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_to_col = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            row_to_col[p[j] - 1] = j - 1;
        }
    }
    row_to_col
}
