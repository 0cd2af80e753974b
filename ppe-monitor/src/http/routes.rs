use super::AppState;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // 页面
        .route("/", get(super::handlers::index))
        // multipart视频流
        .route("/video", get(super::handlers::video_stream))
        // 状态
        .route("/status", get(super::handlers::get_status))
        .route("/sessions", get(super::handlers::get_sessions))
        // WebSocket推送
        .route("/ws/video", get(super::ws::ws_video))
        .route("/ws/status", get(super::ws::ws_status))
        .route("/ws/alerts", get(super::ws::ws_alerts))
        // 健康检查
        .route("/health", get(super::handlers::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // CORS中间件
        .layer(CorsLayer::permissive())
}
