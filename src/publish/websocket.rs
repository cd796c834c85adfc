//! WebSocket 推送 + 调试接口 (axum)
//!
//! - `GET /` `GET /ws`        升级为 WebSocket 监听者, 只下发穿越消息
//! - `GET /api/state`         最新一帧诊断快照
//! - `GET/POST /api/thresholds` 读取 / 调整 HSV 阈值

use std::future::Future;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, info};

use super::ListenerSet;
use crate::pipeline::DebugTap;
use crate::segmentation::{HsvThresholds, ThresholdHandle};

/// 服务共享状态
#[derive(Clone)]
pub struct ServerState {
    pub listeners: ListenerSet,
    pub tap: Option<DebugTap>,
    pub thresholds: ThresholdHandle,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/api/state", get(get_state))
        .route("/api/thresholds", get(get_thresholds).post(set_thresholds))
        .with_state(state)
}

/// 启动服务, `shutdown` 完成后优雅退出
pub async fn serve<F>(listen: &str, state: ServerState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("监听失败: {}", listen))?;
    info!("🌐 WebSocket 服务: ws://{}/ws", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("🌐 WebSocket 服务已停止");
    Ok(())
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(st): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, st.listeners))
}

async fn handle_socket(mut socket: WebSocket, listeners: ListenerSet) {
    let (handle, mut rx) = listeners.register();
    info!("🔌 监听者 #{} 已连接 (当前 {} 个)", handle.0, listeners.len());

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(text) => {
                    if socket.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                // 推送端已注销本监听者
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // 监听者发来的消息一律忽略
                Some(Ok(other)) => debug!("监听者 #{} 消息已忽略: {:?}", handle.0, other),
            },
        }
    }

    listeners.unregister(handle);
    info!("🔌 监听者 #{} 已断开 (剩余 {} 个)", handle.0, listeners.len());
}

pub async fn get_state(State(st): State<ServerState>) -> impl IntoResponse {
    match st.tap.as_ref().and_then(DebugTap::latest) {
        Some(snapshot) => (StatusCode::OK, Json(json!(snapshot))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no frame processed yet" })),
        ),
    }
}

pub async fn get_thresholds(State(st): State<ServerState>) -> Json<HsvThresholds> {
    Json(st.thresholds.get())
}

pub async fn set_thresholds(
    State(st): State<ServerState>,
    Json(thresholds): Json<HsvThresholds>,
) -> Json<HsvThresholds> {
    Json(st.thresholds.set(thresholds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::DebugSnapshot;
    use crate::detection::DetectorStatus;
    use crate::segmentation::{ChannelRange, RegionStatus};

    fn state(tap: Option<DebugTap>) -> ServerState {
        ServerState {
            listeners: ListenerSet::new(4),
            tap,
            thresholds: ThresholdHandle::new(HsvThresholds::default()),
        }
    }

    #[tokio::test]
    async fn test_state_unavailable_before_first_frame() {
        let resp = get_state(State(state(Some(DebugTap::new()))))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = get_state(State(state(None))).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_state_returns_snapshot() {
        let tap = DebugTap::new();
        tap.publish(DebugSnapshot {
            seq: 9,
            region: RegionStatus::NotFound,
            detector: DetectorStatus::Ok(0),
            tracks: Vec::new(),
            total_crossings: 2,
        });
        let resp = get_state(State(state(Some(tap)))).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_set_thresholds_normalizes() {
        let st = state(None);
        let mut t = HsvThresholds::default();
        t.saturation = ChannelRange::new(250, 100);
        let Json(applied) = set_thresholds(State(st.clone()), Json(t)).await;
        assert_eq!(applied.saturation, ChannelRange::new(100, 250));

        let Json(current) = get_thresholds(State(st)).await;
        assert_eq!(current, applied);
    }
}
