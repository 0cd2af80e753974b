// HTTP路由测试

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use chrono::Local;
use common::{AlertEvent, AlertLevel, ComplianceStatus, StatusMessage};
use futures::{SinkExt, StreamExt};
use image::{Rgb, RgbImage};
use ppe_monitor::alert::{AlertCoordinator, DispatchSettings, LogTransport};
use ppe_monitor::capture::Frame;
use ppe_monitor::http::{create_router, AppState};
use ppe_monitor::streaming::{EncodedFrame, IntoPayload, SessionHub, StatusPublisher};
use ppe_monitor::{Config, PipelineContext};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn context() -> PipelineContext {
    PipelineContext::new(&Config::default(), CancellationToken::new())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(body: Body) -> serde_json::Value {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = create_router(AppState::new(context(), None));
    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["data"], "OK");
}

#[tokio::test]
async fn test_status_reflects_current_value() {
    let context = context();
    let app = create_router(AppState::new(context.clone(), None));

    let response = app.clone().oneshot(get("/status")).await.unwrap();
    assert_eq!(
        json_body(response.into_body()).await,
        serde_json::json!({ "status": "No detection" })
    );

    context.status.set(ComplianceStatus::NonCompliant);
    let response = app.oneshot(get("/status")).await.unwrap();
    assert_eq!(
        json_body(response.into_body()).await,
        serde_json::json!({ "status": "PPE not complied" })
    );
}

#[tokio::test]
async fn test_index_falls_back_to_builtin_page() {
    let app = create_router(AppState::new(
        context(),
        Some("/nonexistent/templates/index.html".into()),
    ));
    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let page = String::from_utf8(body.to_vec()).unwrap();
    assert!(page.contains("/video"));
    assert!(page.contains("/ws/alerts"));
}

#[tokio::test]
async fn test_index_serves_configured_page() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("index.html");
    std::fs::write(&page, "<h1>site camera</h1>").unwrap();

    let app = create_router(AppState::new(context(), Some(page)));
    let response = app.oneshot(get("/")).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"<h1>site camera</h1>");
}

#[tokio::test]
async fn test_video_stream_emits_multipart_parts() {
    let context = context();
    let app = create_router(AppState::new(context.clone(), None));

    let response = app.oneshot(get("/video")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    assert_eq!(context.frames.session_count(), 1);

    context.frames.publish(EncodedFrame {
        sequence: 1,
        captured_at: Local::now(),
        status: ComplianceStatus::Compliant,
        data: Bytes::from_static(b"\xFF\xD8jpeg\xFF\xD9"),
    });

    let mut body = response.into_body().into_data_stream();
    let part = tokio::time::timeout(Duration::from_secs(1), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        &part[..],
        b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8jpeg\xFF\xD9\r\n".as_slice()
    );

    // 停机后流结束，会话被移除
    context.shutdown.cancel();
    let end = tokio::time::timeout(Duration::from_secs(1), body.next())
        .await
        .unwrap();
    assert!(end.is_none());
    for _ in 0..50 {
        if context.frames.session_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(context.frames.session_count(), 0);
}

#[tokio::test]
async fn test_video_stream_rejects_invalid_fps() {
    let context = context();
    let app = create_router(AppState::new(context.clone(), None));

    let response = app.oneshot(get("/video?fps=-3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(context.frames.session_count(), 0);
}

#[tokio::test]
async fn test_streams_unavailable_during_shutdown() {
    let context = context();
    context.shutdown.cancel();
    let app = create_router(AppState::new(context.clone(), None));

    let response = app.oneshot(get("/video")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_sessions_listing() {
    let context = context();
    let app = create_router(AppState::new(context.clone(), None));

    let _stream = app.clone().oneshot(get("/video?fps=10")).await.unwrap();
    let response = app.oneshot(get("/sessions")).await.unwrap();
    let json = json_body(response.into_body()).await;

    let video = json["data"]["video"].as_array().unwrap();
    assert_eq!(video.len(), 1);
    assert_eq!(video[0]["kind"], "multipart");
    assert_eq!(video[0]["cadence"], 100);
    assert!(json["data"]["alerts"].as_array().unwrap().is_empty());
}

/// 在本地端口上运行路由，停止信号触发时退出
async fn serve(context: &PipelineContext) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(AppState::new(context.clone(), None));
    let shutdown = context.shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
    client
}

async fn wait_for_sessions<T>(hub: &SessionHub<T>, expected: usize)
where
    T: IntoPayload + Clone + Send + Sync + 'static,
{
    for _ in 0..100 {
        if hub.session_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} sessions, have {}", expected, hub.session_count());
}

/// 下一条数据消息（跳过控制帧）
async fn next_message(client: &mut Client) -> Message {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no message within 2s")
            .expect("socket closed")
            .unwrap();
        match message {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn test_ws_video_streams_binary_frames() {
    let context = context();
    let addr = serve(&context).await;
    let mut client = connect(addr, "/ws/video").await;
    wait_for_sessions(&context.frames, 1).await;

    let jpeg = Bytes::from_static(b"\xFF\xD8frame\xFF\xD9");
    context.frames.publish(EncodedFrame {
        sequence: 7,
        captured_at: Local::now(),
        status: ComplianceStatus::Compliant,
        data: jpeg.clone(),
    });

    match next_message(&mut client).await {
        Message::Binary(data) => assert_eq!(data, jpeg.to_vec()),
        other => panic!("unexpected message: {:?}", other),
    }

    // 客户端关闭后会话被移除
    client.close(None).await.unwrap();
    wait_for_sessions(&context.frames, 0).await;
    context.shutdown.cancel();
}

#[tokio::test]
async fn test_ws_status_pushes_current_status() {
    let context = context();
    let addr = serve(&context).await;
    let publisher = StatusPublisher::new(
        context.status.clone(),
        context.status_hub.clone(),
        Duration::from_millis(20),
    );
    tokio::spawn(publisher.run(context.shutdown.clone()));

    context.status.set(ComplianceStatus::NonCompliant);
    let mut client = connect(addr, "/ws/status").await;

    match next_message(&mut client).await {
        Message::Text(text) => {
            let message: StatusMessage = serde_json::from_str(&text).unwrap();
            assert_eq!(message.status, ComplianceStatus::NonCompliant);
        }
        other => panic!("unexpected message: {:?}", other),
    }

    client.close(None).await.unwrap();
    wait_for_sessions(&context.status_hub, 0).await;
    context.shutdown.cancel();
}

#[tokio::test]
async fn test_ws_alerts_delivers_one_event_per_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let context = context();
    let addr = serve(&context).await;
    let mut client = connect(addr, "/ws/alerts").await;
    wait_for_sessions(&context.alerts, 1).await;

    let (mut coordinator, worker) = AlertCoordinator::start(
        dir.path(),
        context.alerts.clone(),
        Arc::new(LogTransport),
        DispatchSettings::default(),
        context.shutdown.clone(),
    );
    let frame = Frame::new(1, RgbImage::from_pixel(8, 8, Rgb([200, 0, 0])));
    let record = coordinator.on_violation_confirmed(&frame, frame.image.clone());

    match next_message(&mut client).await {
        Message::Text(text) => {
            let event: AlertEvent = serde_json::from_str(&text).unwrap();
            assert_eq!(event.level, AlertLevel::Critical);
            assert_eq!(event.message, record.message);
        }
        other => panic!("unexpected message: {:?}", other),
    }

    // 同一事件不会重复推送
    let extra = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(extra.is_err());

    client.close(None).await.unwrap();
    wait_for_sessions(&context.alerts, 0).await;

    context.shutdown.cancel();
    let stats = worker.await.unwrap();
    assert_eq!(stats.delivered, 1);
    assert!(record.image_path.exists());
}
