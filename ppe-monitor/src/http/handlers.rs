use super::AppState;
use crate::streaming::{ConsumerSession, MultipartTransport, MULTIPART_CONTENT_TYPE};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use common::StatusMessage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// multipart响应缓冲的分段数
const MULTIPART_BUFFER: usize = 2;

/// 内置首页
const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>PPE Monitor</title></head>
<body>
  <h1>PPE Compliance Monitor</h1>
  <img src="/video" alt="live stream">
  <p>Status: <span id="status">No detection</span></p>
  <ul id="alerts"></ul>
  <script>
    const status = new WebSocket(`ws://${location.host}/ws/status`);
    status.onmessage = (e) => {
      document.getElementById("status").textContent = JSON.parse(e.data).status;
    };
    const alerts = new WebSocket(`ws://${location.host}/ws/alerts`);
    alerts.onmessage = (e) => {
      const item = document.createElement("li");
      item.textContent = JSON.parse(e.data).message;
      document.getElementById("alerts").prepend(item);
    };
  </script>
</body>
</html>
"#;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            status: "error".to_string(),
            data: None,
            error: Some(message),
        }
    }
}

/// 流参数
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// 该会话期望的帧率上限
    pub fps: Option<f64>,
}

impl StreamParams {
    /// 转换为推送间隔
    pub fn cadence(&self) -> Result<Option<Duration>, String> {
        match self.fps {
            None => Ok(None),
            Some(fps) if fps.is_finite() && fps > 0.0 => Ok(Some(Duration::from_secs_f64(1.0 / fps))),
            Some(fps) => Err(format!("Invalid fps: {}", fps)),
        }
    }
}

pub(crate) fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::error(message))).into_response()
}

pub(crate) fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<()>::error("Server is shutting down".to_string())),
    )
        .into_response()
}

/// 首页
pub async fn index(State(state): State<AppState>) -> Html<String> {
    if let Some(path) = &state.index_page {
        match tokio::fs::read_to_string(path).await {
            Ok(page) => return Html(page),
            Err(e) => debug!("Index page {:?} unavailable ({}), using built-in page", path, e),
        }
    }
    Html(FALLBACK_INDEX.to_string())
}

/// 健康检查
pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("OK".to_string()))
}

/// 当前状态
pub async fn get_status(State(state): State<AppState>) -> Json<StatusMessage> {
    Json(StatusMessage::from(state.pipeline.status.current()))
}

#[derive(Serialize)]
pub struct SessionsOverview {
    pub video: Vec<ConsumerSession>,
    pub status: Vec<ConsumerSession>,
    pub alerts: Vec<ConsumerSession>,
}

/// 当前连接的会话
pub async fn get_sessions(State(state): State<AppState>) -> Json<ApiResponse<SessionsOverview>> {
    let pipeline = &state.pipeline;
    Json(ApiResponse::success(SessionsOverview {
        video: pipeline.frames.sessions(),
        status: pipeline.status_hub.sessions(),
        alerts: pipeline.alerts.sessions(),
    }))
}

/// multipart视频流
///
/// 客户端断开或服务停止时流结束。
pub async fn video_stream(
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

    let (transport, body) = MultipartTransport::channel(MULTIPART_BUFFER);
    let handle = state.pipeline.frames.attach(Box::new(transport), cadence);
    info!("Multipart video session {} opened", handle.id);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            state.pipeline.frames.detach(&handle.id);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        })
}
