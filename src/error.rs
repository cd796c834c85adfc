//! 错误类型
//! Error taxonomy shared by the capture, pipeline and publish layers

use thiserror::Error;

/// 采集错误 (Frame Source)
///
/// 只有 `SourceLost` 会终止流水线, 其余错误在单帧内恢复。
#[derive(Debug, Error)]
pub enum CaptureError {
    /// 采集源已不存在 (窗口关闭 / 设备拔出)
    #[error("采集源丢失: {0}")]
    SourceLost(String),

    #[error("读取帧失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("帧解码失败: {0}")]
    Decode(String),
}

impl CaptureError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::SourceLost(_))
    }
}

/// 推送错误 (Event Publisher → 单个监听者)
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("监听者 #{0} 已断开")]
    Closed(u64),

    #[error("监听者 #{0} 队列已满")]
    Full(u64),

    #[error("事件序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}
