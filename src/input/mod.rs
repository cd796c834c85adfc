/// 视频输入系统 (Video Input System)
///
/// 负责按有限速率产出原始帧, 每次只持有一帧
/// - ImageSequenceSource: 图片序列目录 (离线回放 / 测试)
/// - FfmpegSource:        摄像头 / 桌面 / 窗口 / URL 解码 (ffmpeg 功能)
/// - DecodeFilter:        FFmpeg 帧过滤 (YUV420P → RGB)
pub mod image_dir;

#[cfg(feature = "ffmpeg")]
pub mod camera;
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;

pub use image_dir::ImageSequenceSource;

#[cfg(feature = "ffmpeg")]
pub use camera::{get_camera_devices, FfmpegSource, InputSource};
#[cfg(feature = "ffmpeg")]
pub use decode_filter::DecodeFilter;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::RgbImage;

use crate::error::CaptureError;

/// 原始帧 (只读, 一次流水线迭代后丢弃)
#[derive(Clone, Debug)]
pub struct Frame {
    /// 单调递增的帧序号
    pub seq: u64,
    /// 采集时间
    pub captured_at: DateTime<Utc>,
    /// RGB像素 (Arc共享, 分割线程与检测线程同时只读)
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(seq: u64, captured_at: DateTime<Utc>, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 采集时间 (秒, Unix纪元)
    pub fn timestamp_secs(&self) -> f64 {
        self.captured_at.timestamp_micros() as f64 / 1_000_000.0
    }
}

/// `next_frame` 的结果
#[derive(Debug)]
pub enum NextFrame {
    Frame(Frame),
    /// 等待超时, 暂无新帧 (调用方直接进入下一轮)
    Pending,
    /// 输入结束 (文件/目录播放完毕)
    EndOfStream,
}

/// 帧源接口
///
/// 阻塞等待有上限; 不缓存超过一帧。
pub trait FrameSource: Send {
    fn name(&self) -> String;

    fn next_frame(&mut self) -> Result<NextFrame, CaptureError>;
}

/// 限速器: 保证两帧之间至少间隔 1/fps
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(fps: Option<f32>) -> Self {
        let interval = fps
            .filter(|f| f.is_finite() && *f > 0.0)
            .map(|f| Duration::from_secs_f32(1.0 / f));
        Self {
            interval,
            last: None,
        }
    }

    /// 阻塞到下一个时间槽
    pub fn wait(&mut self) {
        if let (Some(interval), Some(last)) = (self.interval, self.last) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// 内存帧源 (预先准备好的帧序列, 用于回放与测试)
pub struct MemorySource {
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for MemorySource {
    fn name(&self) -> String {
        format!("memory({} frames)", self.frames.len())
    }

    fn next_frame(&mut self) -> Result<NextFrame, CaptureError> {
        Ok(match self.frames.pop_front() {
            Some(frame) => NextFrame::Frame(frame),
            None => NextFrame::EndOfStream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_ends() {
        let f = Frame::new(1, Utc::now(), RgbImage::new(4, 4));
        let mut src = MemorySource::new(vec![f]);
        assert!(matches!(src.next_frame(), Ok(NextFrame::Frame(_))));
        assert!(matches!(src.next_frame(), Ok(NextFrame::EndOfStream)));
    }
}
