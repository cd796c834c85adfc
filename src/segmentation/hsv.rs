//! HSV 阈值与红色掩码
//!
//! 色相使用 0–180 刻度 (与常见 8 位 HSV 表示一致)。
//! 红色横跨色相 0 点, 因此阈值由两个色相区间组成。

use std::sync::{Arc, RwLock};

use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 单通道闭区间 [low, high]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub low: u8,
    pub high: u8,
}

impl ChannelRange {
    pub const fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    #[inline]
    pub fn contains(&self, v: u8) -> bool {
        v >= self.low && v <= self.high
    }

    /// 保证 low <= high (反了就交换)
    pub fn normalized(self) -> Self {
        Self::new(self.low.min(self.high), self.low.max(self.high))
    }
}

/// 红色阈值 (两个色相区间 + 共用的饱和度/亮度区间)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvThresholds {
    pub hue_low_band: ChannelRange,
    pub hue_high_band: ChannelRange,
    pub saturation: ChannelRange,
    pub value: ChannelRange,
}

impl Default for HsvThresholds {
    fn default() -> Self {
        Self {
            hue_low_band: ChannelRange::new(0, 9),
            hue_high_band: ChannelRange::new(150, 180),
            saturation: ChannelRange::new(160, 255),
            value: ChannelRange::new(193, 255),
        }
    }
}

impl HsvThresholds {
    pub fn normalized(self) -> Self {
        Self {
            hue_low_band: self.hue_low_band.normalized(),
            hue_high_band: self.hue_high_band.normalized(),
            saturation: self.saturation.normalized(),
            value: self.value.normalized(),
        }
    }

    #[inline]
    pub fn matches(&self, h: u8, s: u8, v: u8) -> bool {
        (self.hue_low_band.contains(h) || self.hue_high_band.contains(h))
            && self.saturation.contains(s)
            && self.value.contains(v)
    }
}

/// 运行时可调的阈值句柄
///
/// 分割线程每帧开始时读取一次; 调试接口可随时写入。
#[derive(Clone, Debug, Default)]
pub struct ThresholdHandle {
    inner: Arc<RwLock<HsvThresholds>>,
}

impl ThresholdHandle {
    pub fn new(thresholds: HsvThresholds) -> Self {
        Self {
            inner: Arc::new(RwLock::new(thresholds.normalized())),
        }
    }

    pub fn get(&self) -> HsvThresholds {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// 写入新阈值, 返回实际生效值
    pub fn set(&self, thresholds: HsvThresholds) -> HsvThresholds {
        let thresholds = thresholds.normalized();
        match self.inner.write() {
            Ok(mut guard) => *guard = thresholds,
            Err(poisoned) => *poisoned.into_inner() = thresholds,
        }
        info!("🎚️ HSV阈值已更新: {:?}", thresholds);
        thresholds
    }
}

/// RGB → HSV (H: 0–180, S/V: 0–255)
#[inline]
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let rf = r as f32;
    let gf = g as f32;
    let bf = b as f32;
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };

    let h = if delta == 0.0 {
        0.0
    } else if max == rf {
        let h = 60.0 * (gf - bf) / delta;
        if h < 0.0 {
            h + 360.0
        } else {
            h
        }
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };

    (
        (h / 2.0).round().min(180.0) as u8,
        s.round() as u8,
        v.round() as u8,
    )
}

/// 生成红色掩码 (命中=255)
pub fn red_mask(image: &RgbImage, thresholds: &HsvThresholds) -> GrayImage {
    let mut mask = GrayImage::new(image.width(), image.height());
    for (src, dst) in image.pixels().zip(mask.pixels_mut()) {
        let (h, s, v) = rgb_to_hsv(src[0], src[1], src[2]);
        if thresholds.matches(h, s, v) {
            *dst = Luma([255]);
        }
    }
    mask
}
