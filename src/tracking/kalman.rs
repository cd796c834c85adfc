//! 卡尔曼框滤波 (匀速模型, 对角协方差)
//!
//! 状态向量: [cx, cy, w, h, vx, vy, vw, vh]

use crate::detection::BBox;

#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],
    /// 估计误差协方差 (对角)
    p: [f32; 8],
    /// 过程噪声
    q: f32,
    /// 观测噪声
    r: f32,
    velocity_decay: f32,
}

/// 残差小于该值视为静止 (像素)
const STILL_RESIDUAL: f32 = 2.0;
/// 残差大于该值视为跳变 (像素)
const JUMP_RESIDUAL: f32 = 10.0;

impl KalmanBoxFilter {
    /// - `q`: 过程噪声 (越小越平滑)
    /// - `r`: 观测噪声 (越大越信任预测)
    pub fn new(bbox: &BBox, q: f32, r: f32, velocity_decay: f32) -> Self {
        let c = bbox.center();
        Self {
            state: [c.x, c.y, bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
            velocity_decay,
        }
    }

    /// 预测下一帧: 位置/尺寸 += 速度, 速度衰减
    pub fn predict(&mut self) {
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
            self.state[i + 4] *= self.velocity_decay;
        }
        for p in self.p.iter_mut() {
            *p += self.q;
        }
    }

    /// 融合观测框
    pub fn update(&mut self, bbox: &BBox) {
        let c = bbox.center();
        let z = [c.x, c.y, bbox.width(), bbox.height()];
        let mut residual = [0.0f32; 4];
        for i in 0..4 {
            residual[i] = z[i] - self.state[i];
        }

        // 残差越大越不信任观测
        let shift = (residual[0].powi(2) + residual[1].powi(2)).sqrt();
        let r = if shift < STILL_RESIDUAL {
            self.r * 0.3
        } else if shift < JUMP_RESIDUAL {
            self.r
        } else {
            self.r * 3.0
        };

        for i in 0..4 {
            let k_pos = self.p[i] / (self.p[i] + r);
            let k_vel = self.p[i + 4] / (self.p[i + 4] + r * 10.0);
            self.state[i] += k_pos * residual[i];
            self.state[i + 4] += k_vel * residual[i];
            self.p[i] *= 1.0 - k_pos;
            self.p[i + 4] *= 1.0 - k_vel;
        }
    }

    /// 当前估计框
    pub fn bbox(&self) -> BBox {
        BBox::from_cxcywh(
            self.state[0],
            self.state[1],
            self.state[2].max(1.0),
            self.state[3].max(1.0),
        )
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.state[4], self.state[5])
    }
}
