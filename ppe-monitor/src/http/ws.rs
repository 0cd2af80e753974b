// WebSocket推送端点
//
// 视频、状态、告警三路推送共用同一个会话处理流程，只是挂接的会话中心不同。

use super::handlers::{bad_request, unavailable, StreamParams};
use super::AppState;
use crate::streaming::{IntoPayload, SessionHub, WebSocketTransport};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

/// 视频流（二进制JPEG帧）
pub async fn ws_video(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    if state.pipeline.is_shutting_down() {
        return unavailable();
    }
    let cadence = match params.cadence() {
        Ok(cadence) => cadence,
        Err(message) => return bad_request(message),
    };
    let hub = state.pipeline.frames.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub, cadence))
}

/// 状态流（JSON）
pub async fn ws_status(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.pipeline.is_shutting_down() {
        return unavailable();
    }
    let hub = state.pipeline.status_hub.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub, None))
}

/// 告警流（JSON，每个违规事件一条）
pub async fn ws_alerts(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.pipeline.is_shutting_down() {
        return unavailable();
    }
    let hub = state.pipeline.alerts.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub, None))
}

/// 挂接会话并读取客户端消息，直到任一方关闭
async fn serve_socket<T>(socket: WebSocket, hub: SessionHub<T>, cadence: Option<Duration>)
where
    T: IntoPayload + Clone + Send + Sync + 'static,
{
    let (sink, mut stream) = socket.split();
    let handle = hub.attach(Box::new(WebSocketTransport::new(sink)), cadence);
    info!("WebSocket session {} connected to {} hub", handle.id, hub.name());

    loop {
        tokio::select! {
            _ = handle.closed() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket session {} closed by client", handle.id);
                    hub.detach(&handle.id);
                    break;
                }
                Some(Err(e)) => {
                    debug!("WebSocket session {} read error: {}", handle.id, e);
                    hub.detach(&handle.id);
                    break;
                }
                // 客户端消息不影响推送
                Some(Ok(_)) => {}
            }
        }
    }
}
