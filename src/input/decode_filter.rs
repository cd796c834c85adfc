/// FFmpeg解码过滤器模块
/// FFmpeg decode filter: YUV420P → RgbImage → 单帧槽
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{info, warn};

/// FFmpeg解码过滤器
///
/// 帧槽容量为 1: 流水线还在处理上一帧时, 新帧直接丢弃。
#[derive(Clone)]
pub struct DecodeFilter {
    slot: Sender<RgbImage>,
    count: usize,
    last: Instant,
    current_fps: f64,
    pub dropped_frames: usize, // 损坏/非法帧
    pub busy_frames: usize,    // 流水线忙, 未送出
    pub total_frames: usize,
}

impl DecodeFilter {
    pub fn new(slot: Sender<RgbImage>) -> Self {
        Self {
            slot,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            dropped_frames: 0,
            busy_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: std::fmt::Arguments<'_>) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        self.total_frames += 1;

        let image = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame(format_args!("空帧/损坏帧"));
                return Ok(None);
            }

            let raw = &*frame.as_ptr();
            let w = raw.width as usize;
            let h = raw.height as usize;
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                self.drop_frame(format_args!("非法分辨率 {}x{}", w, h));
                return Ok(None);
            }

            // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
            if raw.decode_error_flags & 0x03 != 0 {
                self.drop_frame(format_args!("解码错误标志=0x{:02x}", raw.decode_error_flags));
                return Ok(None);
            }

            let (y_plane, u_plane, v_plane) = (raw.data[0], raw.data[1], raw.data[2]);
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.drop_frame(format_args!("YUV指针为空"));
                return Ok(None);
            }
            if !strides_cover(w, y_stride, uv_stride) {
                self.drop_frame(format_args!("步长异常 y={} uv={}", y_stride, uv_stride));
                return Ok(None);
            }

            let mut rgb = vec![0u8; w * h * 3];
            yuv420p_to_rgb(y_plane, u_plane, v_plane, y_stride, uv_stride, &mut rgb, w, h);
            match RgbImage::from_raw(w as u32, h as u32, rgb) {
                Some(img) => img,
                None => {
                    self.drop_frame(format_args!("RGB缓冲尺寸不符"));
                    return Ok(None);
                }
            }
        };

        match self.slot.try_send(image) {
            Ok(()) => self.count += 1,
            Err(TrySendError::Full(_)) => self.busy_frames += 1,
            Err(TrySendError::Disconnected(_)) => {
                info!("🛑 流水线已关闭, 停止解码");
                return Err("pipeline closed".to_string());
            }
        }

        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.current_fps = self.count as f64 / elapsed;
            info!(
                "📺 解码统计: 送出{}帧 | {:.1}fps | 总帧{} | 丢弃{} | 忙{}",
                self.count, self.current_fps, self.total_frames, self.dropped_frames, self.busy_frames
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!("✅ 解码线程退出");
    }
}

/// 步长是否覆盖一行 (色度按 `x >> 1` 取样, 奇数宽度需要 (w+1)/2)
fn strides_cover(width: usize, y_stride: usize, uv_stride: usize) -> bool {
    y_stride >= width && uv_stride >= (width + 1) / 2
}

/// YUV420P → RGB24 (BT.601 定点系数 ×128)
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;
        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out + 1] = (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out += 3;
        }
    }
}
