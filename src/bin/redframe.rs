/// 红框通过计数 (Red Frame Crossing Counter)
///
/// 线程架构:
/// 1. 流水线线程: 采集 → 分割 ∥ 检测 → 跟踪 → 穿越判定
/// 2. 推送线程:   事件队列 → 各监听者队列
/// 3. tokio 运行时: WebSocket 监听者 + 调试接口
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use redframe_counter::crossing::CrossingPolicy;
use redframe_counter::detection::{NullDetector, ObjectDetector, ReplayDetector};
use redframe_counter::input::{FrameSource, ImageSequenceSource};
use redframe_counter::publish::websocket::{self, ServerState};
use redframe_counter::segmentation::ThresholdHandle;
use redframe_counter::{event_queue, AppConfig, DebugTap, EventPublisher, ListenerSet, PipelineContext};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 红框通过计数参数
#[derive(Parser, Debug)]
#[command(author, version, about = "红框通过计数 - 物体进入红框时推送 WebSocket 事件", long_about = None)]
struct Args {
    /// 输入: 图片目录, 或 (ffmpeg 功能) camera:N / desktop / window:<标题> / 文件 / URL
    #[arg(short, long)]
    source: String,

    /// YOLO ONNX 模型路径 (onnx 功能)
    #[arg(short, long)]
    model: Option<String>,

    /// 回放检测记录 (JSON), 优先于 --model
    #[arg(long)]
    detections: Option<String>,

    /// 配置文件
    #[arg(short, long, default_value = "redframe.json")]
    config: String,

    /// WebSocket 监听地址 (覆盖配置)
    #[arg(long)]
    listen: Option<String>,

    /// 最大采集帧率
    #[arg(long)]
    fps: Option<f32>,

    /// 检测置信度下限 (覆盖配置)
    #[arg(long)]
    conf: Option<f32>,

    /// 穿越策略: entry / exit / both (覆盖配置)
    #[arg(long)]
    policy: Option<CrossingPolicy>,

    /// 关闭 /api/state 诊断快照
    #[arg(long, default_value_t = false)]
    no_tap: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("redframe_counter=info,redframe=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(&args.config);
    if let Some(listen) = &args.listen {
        config.publisher.listen = listen.clone();
    }
    if let Some(conf) = args.conf {
        config.detector.confidence_floor = conf;
    }
    if let Some(policy) = args.policy {
        config.crossing.policy = policy;
    }
    config.log_summary();

    let detector = build_detector(&args, &config)?;
    let mut source = open_source(&args)?;

    // 共享状态
    let thresholds = ThresholdHandle::new(config.segmenter.thresholds);
    let listeners = ListenerSet::new(config.publisher.listener_queue);
    let tap = (!args.no_tap).then(DebugTap::new);
    let stop = Arc::new(AtomicBool::new(false));

    // 推送线程
    let (events, queue) = event_queue(config.publisher.event_queue);
    let publisher = EventPublisher::spawn(queue, listeners.clone())?;

    // 流水线线程
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let pipeline = {
        let mut ctx = PipelineContext::with_thresholds(&config, detector, thresholds.clone());
        let tap = tap.clone();
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || {
                let result = ctx.run_until(source.as_mut(), events, tap, &stop);
                let _ = done_tx.send(());
                result
            })?
    };

    // WebSocket 服务 (Ctrl+C 或流水线结束时退出)
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("创建 tokio 运行时失败")?;
    let state = ServerState {
        listeners,
        tap,
        thresholds,
    };
    let shutdown_flag = Arc::clone(&stop);
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 收到 Ctrl+C, 正在退出...");
                shutdown_flag.store(true, Ordering::Relaxed);
            }
            _ = done_rx => {}
        }
    };
    let served = runtime.block_on(websocket::serve(&config.publisher.listen, state, shutdown));
    stop.store(true, Ordering::Relaxed);

    let outcome = match pipeline.join() {
        Ok(Ok(summary)) => {
            info!(
                "📊 共处理 {} 帧, 穿越 {} 次, 丢弃事件 {}",
                summary.frames, summary.events, summary.events_dropped
            );
            Ok(())
        }
        Ok(Err(e)) => {
            error!("❌ 流水线终止: {}", e);
            Err(anyhow::Error::new(e))
        }
        Err(_) => Err(anyhow::anyhow!("流水线线程异常退出")),
    };

    match publisher.join() {
        Ok(stats) => info!(
            "📡 推送 {} 个事件, 送达 {} 次, 跳过 {} 次",
            stats.events, stats.deliveries, stats.skipped
        ),
        Err(_) => warn!("⚠️ 推送线程异常退出"),
    }

    served?;
    outcome
}

fn build_detector(args: &Args, config: &AppConfig) -> anyhow::Result<Box<dyn ObjectDetector>> {
    if let Some(path) = &args.detections {
        return Ok(Box::new(ReplayDetector::load(path)?));
    }
    if let Some(model) = &args.model {
        #[cfg(feature = "onnx")]
        {
            let detector = redframe_counter::detection::YoloDetector::new(model, &config.detector)?;
            return Ok(Box::new(detector));
        }
        #[cfg(not(feature = "onnx"))]
        {
            let _ = config;
            anyhow::bail!("模型 {} 需要启用 onnx 功能", model);
        }
    }
    warn!("⚠️ 未配置检测器, 只做红框分割");
    Ok(Box::new(NullDetector))
}

fn open_source(args: &Args) -> anyhow::Result<Box<dyn FrameSource>> {
    let path = Path::new(&args.source);
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::new(path, args.fps)?));
    }
    #[cfg(feature = "ffmpeg")]
    {
        use redframe_counter::input::{FfmpegSource, InputSource};
        let input = InputSource::parse(&args.source);
        Ok(Box::new(FfmpegSource::open(input, args.fps)?))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        anyhow::bail!("{} 不是图片目录 (摄像头/视频需要启用 ffmpeg 功能)", args.source)
    }
}
