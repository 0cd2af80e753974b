// 会话传输抽象
//
// 同一套广播核心通过可插拔的传输层推送到不同类型的连接：
// HTTP multipart、WebSocket 以及进程内通道。

use super::error::TransportError;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::{Bytes, BytesMut};
use common::{AlertEvent, StatusMessage};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// multipart分隔符
pub const MULTIPART_BOUNDARY: &str = "frame";

/// multipart响应的Content-Type
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 推送负载
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// 二进制数据（JPEG帧）
    Binary(Bytes),
    /// 文本数据（JSON消息）
    Text(String),
}

/// 传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Multipart,
    WebSocket,
    Channel,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Multipart => write!(f, "multipart"),
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Channel => write!(f, "channel"),
        }
    }
}

/// 转换为推送负载
pub trait IntoPayload {
    fn to_payload(&self) -> Result<Payload, TransportError>;
}

impl IntoPayload for StatusMessage {
    fn to_payload(&self) -> Result<Payload, TransportError> {
        Ok(Payload::Text(serde_json::to_string(self)?))
    }
}

impl IntoPayload for AlertEvent {
    fn to_payload(&self) -> Result<Payload, TransportError> {
        Ok(Payload::Text(serde_json::to_string(self)?))
    }
}

/// 会话传输
///
/// 每个会话独占一个传输实例；`push` 的背压只影响该会话本身。
#[async_trait]
pub trait SessionTransport: Send + 'static {
    fn kind(&self) -> TransportKind;

    /// 推送一条负载
    async fn push(&mut self, payload: Payload) -> Result<(), TransportError>;

    /// 关闭传输（可重复调用）
    async fn close(&mut self);
}

/// HTTP multipart传输
///
/// 每个负载封装为一个 `image/jpeg` 分段，写入响应体流。
pub struct MultipartTransport {
    tx: Option<mpsc::Sender<Result<Bytes, Infallible>>>,
}

impl MultipartTransport {
    /// 创建传输及对应的响应体流
    ///
    /// # 参数
    ///
    /// - `buffer`: 缓冲的分段数；写满后 `push` 等待客户端读取
    pub fn channel(buffer: usize) -> (Self, ReceiverStream<Result<Bytes, Infallible>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx: Some(tx) }, ReceiverStream::new(rx))
    }

    /// 构造一个multipart分段
    pub fn encode_part(data: &[u8]) -> Bytes {
        let header = format!(
            "--{}\r\nContent-Type: image/jpeg\r\n\r\n",
            MULTIPART_BOUNDARY
        );
        let mut part = BytesMut::with_capacity(header.len() + data.len() + 2);
        part.extend_from_slice(header.as_bytes());
        part.extend_from_slice(data);
        part.extend_from_slice(b"\r\n");
        part.freeze()
    }
}

#[async_trait]
impl SessionTransport for MultipartTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Multipart
    }

    async fn push(&mut self, payload: Payload) -> Result<(), TransportError> {
        let data = match payload {
            Payload::Binary(data) => data,
            Payload::Text(_) => return Err(TransportError::Unsupported("multipart")),
        };
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(Ok(Self::encode_part(&data)))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        // 丢弃发送端后响应体流结束
        self.tx = None;
    }
}

/// WebSocket传输
pub struct WebSocketTransport {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl WebSocketTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink,
            closed: false,
        }
    }
}

#[async_trait]
impl SessionTransport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn push(&mut self, payload: Payload) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let message = match payload {
            Payload::Binary(data) => Message::Binary(data.to_vec()),
            Payload::Text(text) => Message::Text(text),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.sink.close().await;
        }
    }
}

/// 进程内通道传输
pub struct ChannelTransport {
    tx: Option<mpsc::Sender<Payload>>,
}

impl ChannelTransport {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait]
impl SessionTransport for ChannelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Channel
    }

    async fn push(&mut self, payload: Payload) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(payload).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}
