//! FFmpeg 帧源 - 摄像头 / 桌面 / 窗口 / URL
//!
//! 解码在独立线程中运行, 经单帧槽交给流水线。
//! 摄像头: DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)
//! 屏幕:   GDI(Windows) / AVFoundation(macOS) / X11(Linux)

use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::{error, info, warn};

use super::decode_filter::DecodeFilter;
use super::{Frame, FrameSource, NextFrame, RateLimiter};
use crate::error::CaptureError;

/// 输入类型
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSource {
    /// `camera:N`
    Camera(usize),
    /// `desktop`
    Desktop,
    /// `window:<标题>` 单个窗口 (仅 Windows gdigrab)
    Window(String),
    /// 文件 / rtsp / http 等任意 FFmpeg 输入
    Url(String),
}

impl InputSource {
    pub fn parse(s: &str) -> Self {
        if s == "desktop" {
            return InputSource::Desktop;
        }
        if let Some(title) = s.strip_prefix("window:").filter(|t| !t.is_empty()) {
            return InputSource::Window(title.to_string());
        }
        match s.strip_prefix("camera:").map(str::parse::<usize>) {
            Some(Ok(index)) => InputSource::Camera(index),
            _ => InputSource::Url(s.to_string()),
        }
    }

    /// 实时源: 停止出帧视为采集源丢失; 文件视为播放结束
    pub fn is_live(&self) -> bool {
        match self {
            InputSource::Camera(_) | InputSource::Desktop | InputSource::Window(_) => true,
            InputSource::Url(url) => url.contains("://"),
        }
    }
}

/// FFmpeg 帧源
pub struct FfmpegSource {
    input: InputSource,
    slot: Receiver<RgbImage>,
    worker: Option<JoinHandle<()>>,
    limiter: RateLimiter,
    timeout: Duration,
    seq: u64,
}

impl FfmpegSource {
    /// 打开输入并启动解码线程
    pub fn open(input: InputSource, fps: Option<f32>) -> Result<Self, CaptureError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let filter = DecodeFilter::new(tx);
        let target = input.clone();
        let worker = std::thread::Builder::new()
            .name("ffmpeg-decode".to_string())
            .spawn(move || {
                if let Err(e) = decode(&target, filter) {
                    error!("❌ {}", e);
                }
            })?;
        info!("🎥 FFmpeg 输入: {:?}", input);
        Ok(Self::with_slot(input, rx, Some(worker), fps))
    }

    fn with_slot(
        input: InputSource,
        slot: Receiver<RgbImage>,
        worker: Option<JoinHandle<()>>,
        fps: Option<f32>,
    ) -> Self {
        Self {
            input,
            slot,
            worker,
            limiter: RateLimiter::new(fps),
            timeout: Duration::from_secs(2),
            seq: 0,
        }
    }
}

impl FrameSource for FfmpegSource {
    fn name(&self) -> String {
        format!("ffmpeg({:?})", self.input)
    }

    fn next_frame(&mut self) -> Result<NextFrame, CaptureError> {
        self.limiter.wait();
        match self.slot.recv_timeout(self.timeout) {
            Ok(image) => {
                self.seq += 1;
                Ok(NextFrame::Frame(Frame::new(self.seq, Utc::now(), image)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(NextFrame::Pending),
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
                if self.input.is_live() {
                    Err(CaptureError::SourceLost(format!("{:?} 停止出帧", self.input)))
                } else {
                    Ok(NextFrame::EndOfStream)
                }
            }
        }
    }
}

/// 运行解码直到输入结束 (过滤器随上下文释放, 帧槽随之断开)
fn decode(input: &InputSource, filter: DecodeFilter) -> Result<(), String> {
    match input {
        InputSource::Camera(index) => {
            let device = get_camera_devices()
                .into_iter()
                .find(|(i, _)| i == index)
                .map(|(_, name)| name)
                .unwrap_or_default();
            let url = format_camera_url(*index, &device);
            run_context(&url, Some(camera_format()), true, filter)
        }
        InputSource::Desktop | InputSource::Window(_) => {
            let (format, name) = screen_input(input)?;
            run_context(&name, Some(format), true, filter)
        }
        InputSource::Url(url) => run_context(url, None, false, filter),
    }
}

/// 屏幕采集的 (格式, 输入名)
///
/// 窗口关闭后 gdigrab 停止出帧, 由 `next_frame` 报告采集源丢失
fn screen_input(input: &InputSource) -> Result<(&'static str, String), String> {
    match input {
        #[cfg(target_os = "windows")]
        InputSource::Desktop => Ok(("gdigrab", "desktop".to_string())),
        #[cfg(target_os = "windows")]
        InputSource::Window(title) => Ok(("gdigrab", format!("title={}", title))),

        #[cfg(target_os = "macos")]
        InputSource::Desktop => Ok(("avfoundation", "Capture screen 0".to_string())),

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        InputSource::Desktop => {
            let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string());
            Ok(("x11grab", display))
        }

        #[cfg(not(target_os = "windows"))]
        InputSource::Window(title) => Err(format!("当前平台不支持按标题采集窗口: {}", title)),

        other => Err(format!("不是屏幕输入: {:?}", other)),
    }
}

fn run_context(
    url: &str,
    format: Option<&str>,
    capture_opts: bool,
    filter: DecodeFilter,
) -> Result<(), String> {
    info!("🔍 使用格式: {:?}, 输入: {}", format, url);

    let mut retry_count = 0;
    let max_retries = 3;
    loop {
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter.clone()));
        let out = create_null_output().add_frame_pipeline(pipe);

        let mut input = Input::new(url);
        if let Some(format) = format {
            input = input.set_format(format);
        }
        if capture_opts {
            input = input.set_input_opts([("framerate", "30")].into());
        } else if url.starts_with("rtsp://") {
            input = input.set_input_opts([("rtsp_transport", "tcp")].into());
        }

        let ctx = match FfmpegContext::builder()
            .input(input)
            .filter_descs(["format=yuv420p"].into())
            .output(out)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                retry_count += 1;
                if retry_count >= max_retries {
                    return Err(format!("构建失败 (重试{}次): {}", max_retries, e));
                }
                warn!(
                    "⚠️ 输入忙或无法打开, 1秒后重试... ({}/{})",
                    retry_count, max_retries
                );
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        };

        let sch = ctx.start().map_err(|e| format!("启动失败: {}", e))?;
        info!("✅ 连接成功, 开始解码!");
        let _ = sch.wait();
        info!("📹 解码循环结束");
        return Ok(());
    }
}

/// 摄像头URL - 根据平台选择
fn format_camera_url(index: usize, name: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        let _ = index;
        format!("video={}", name)
    }
    #[cfg(target_os = "linux")]
    {
        let _ = name;
        format!("/dev/video{}", index)
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        let _ = name;
        format!("{}", index)
    }
}

fn camera_format() -> &'static str {
    #[cfg(target_os = "windows")]
    return "dshow";
    #[cfg(target_os = "macos")]
    return "avfoundation";
    #[cfg(target_os = "linux")]
    return "v4l2";
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    return "video4linux2";
}

/// 获取可用的摄像头设备列表
pub fn get_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}
