// 消费者会话管理
//
// 每种输出（视频帧、状态、告警）对应一个会话中心。中心通过broadcast
// 通道扇出，每个会话由独立的推送任务驱动，慢会话只会丢帧或被移除，
// 不会阻塞生产者或其他会话。

use super::error::TransportError;
use super::transport::{IntoPayload, SessionTransport, TransportKind};
use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 会话信息
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerSession {
    pub id: Uuid,
    pub kind: TransportKind,
    /// 两次推送的最小间隔；为空时每条都推送
    #[serde(with = "crate::serde_helpers::option_duration_ms")]
    pub cadence: Option<Duration>,
    pub connected_at: DateTime<Local>,
    /// 已推送条数
    pub delivered: u64,
    /// 因落后被跳过的条数
    pub skipped: u64,
}

struct SessionEntry {
    info: ConsumerSession,
    token: CancellationToken,
}

/// 会话句柄
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    token: CancellationToken,
}

impl SessionHandle {
    /// 等待会话结束
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

/// 会话结束原因
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Detached,
    SourceClosed,
    Timeout,
    Failed(TransportError),
}

/// 会话中心
pub struct SessionHub<T> {
    name: &'static str,
    tx: broadcast::Sender<T>,
    sessions: Arc<DashMap<Uuid, SessionEntry>>,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl<T> Clone for SessionHub<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            sessions: self.sessions.clone(),
            send_timeout: self.send_timeout,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<T> SessionHub<T>
where
    T: IntoPayload + Clone + Send + Sync + 'static,
{
    /// 创建会话中心
    ///
    /// # 参数
    ///
    /// - `name`: 名称（用于日志）
    /// - `capacity`: 广播通道容量，落后超过该值的会话会跳过旧条目
    /// - `send_timeout`: 单次推送超时，超时即移除会话
    /// - `shutdown`: 停止信号，取消后所有会话结束
    pub fn new(
        name: &'static str,
        capacity: usize,
        send_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name,
            tx,
            sessions: Arc::new(DashMap::new()),
            send_timeout,
            shutdown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 发布一条消息
    ///
    /// # 返回
    ///
    /// 收到该消息的会话数
    pub fn publish(&self, item: T) -> usize {
        self.tx.send(item).unwrap_or(0)
    }

    /// 订阅原始消息流
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// 挂接一个会话
    ///
    /// 为会话启动独立的推送任务，立即返回。
    pub fn attach(
        &self,
        transport: Box<dyn SessionTransport>,
        cadence: Option<Duration>,
    ) -> SessionHandle {
        let id = Uuid::new_v4();
        let token = self.shutdown.child_token();
        let rx = self.tx.subscribe();

        let info = ConsumerSession {
            id,
            kind: transport.kind(),
            cadence,
            connected_at: Local::now(),
            delivered: 0,
            skipped: 0,
        };
        info!(
            "Session {} attached to {} hub ({}, cadence: {:?})",
            id, self.name, info.kind, cadence
        );

        self.sessions.insert(
            id,
            SessionEntry {
                info,
                token: token.clone(),
            },
        );

        let pump = SessionPump {
            hub: self.name,
            id,
            rx,
            transport,
            cadence,
            send_timeout: self.send_timeout,
            token: token.clone(),
            shutdown: self.shutdown.clone(),
            sessions: self.sessions.clone(),
        };
        tokio::spawn(pump.run());

        SessionHandle { id, token }
    }

    /// 移除会话
    pub fn detach(&self, id: &Uuid) -> bool {
        match self.sessions.get(id) {
            Some(entry) => {
                debug!("Detaching session {} from {} hub", id, self.name);
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> Vec<ConsumerSession> {
        self.sessions
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect()
    }

    pub fn session(&self, id: &Uuid) -> Option<ConsumerSession> {
        self.sessions.get(id).map(|entry| entry.info.clone())
    }

    /// 当前broadcast接收端数量
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// 单个会话的推送任务
struct SessionPump<T> {
    hub: &'static str,
    id: Uuid,
    rx: broadcast::Receiver<T>,
    transport: Box<dyn SessionTransport>,
    cadence: Option<Duration>,
    send_timeout: Duration,
    token: CancellationToken,
    shutdown: CancellationToken,
    sessions: Arc<DashMap<Uuid, SessionEntry>>,
}

impl<T> SessionPump<T>
where
    T: IntoPayload + Clone + Send + Sync + 'static,
{
    async fn run(mut self) {
        let mut last_sent: Option<Instant> = None;

        let end = loop {
            let item = tokio::select! {
                _ = self.token.cancelled() => break self.cancel_reason(),
                result = self.rx.recv() => result,
            };

            let item = match item {
                Ok(item) => item,
                Err(RecvError::Lagged(count)) => {
                    debug!("Session {} lagged, skipped {} items", self.id, count);
                    if let Some(mut entry) = self.sessions.get_mut(&self.id) {
                        entry.info.skipped += count;
                    }
                    continue;
                }
                Err(RecvError::Closed) => break SessionEnd::SourceClosed,
            };

            if let (Some(cadence), Some(last)) = (self.cadence, last_sent) {
                if last.elapsed() < cadence {
                    continue;
                }
            }

            let payload = match item.to_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Session {}: failed to build payload: {}", self.id, e);
                    continue;
                }
            };

            let result = tokio::select! {
                _ = self.token.cancelled() => break self.cancel_reason(),
                result = tokio::time::timeout(self.send_timeout, self.transport.push(payload)) => result,
            };

            match result {
                Ok(Ok(())) => {
                    last_sent = Some(Instant::now());
                    if let Some(mut entry) = self.sessions.get_mut(&self.id) {
                        entry.info.delivered += 1;
                    }
                }
                Ok(Err(e)) => break SessionEnd::Failed(e),
                Err(_) => break SessionEnd::Timeout,
            }
        };

        self.transport.close().await;
        self.token.cancel();
        let delivered = self
            .sessions
            .remove(&self.id)
            .map(|(_, entry)| entry.info.delivered)
            .unwrap_or(0);

        match end {
            SessionEnd::Failed(ref e) if !e.is_disconnect() => warn!(
                "Session {} removed from {} hub: {} (delivered: {})",
                self.id, self.hub, e, delivered
            ),
            SessionEnd::Timeout => warn!(
                "Session {} removed from {} hub: send timed out after {:?} (delivered: {})",
                self.id, self.hub, self.send_timeout, delivered
            ),
            _ => info!(
                "Session {} left {} hub ({:?}, delivered: {})",
                self.id, self.hub, end, delivered
            ),
        }
    }

    fn cancel_reason(&self) -> SessionEnd {
        if self.shutdown.is_cancelled() {
            SessionEnd::Shutdown
        } else {
            SessionEnd::Detached
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::transport::{ChannelTransport, Payload};
    use async_trait::async_trait;
    use common::{ComplianceStatus, StatusMessage};

    fn status(value: ComplianceStatus) -> StatusMessage {
        StatusMessage::from(value)
    }

    fn hub(shutdown: &CancellationToken) -> SessionHub<StatusMessage> {
        SessionHub::new("status", 16, Duration::from_millis(100), shutdown.clone())
    }

    async fn wait_for_sessions<T>(hub: &SessionHub<T>, count: usize)
    where
        T: IntoPayload + Clone + Send + Sync + 'static,
    {
        for _ in 0..200 {
            if hub.session_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} sessions, found {}", count, hub.session_count());
    }

    /// 永不完成推送的传输
    struct StalledTransport;

    #[async_trait]
    impl SessionTransport for StalledTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Channel
        }

        async fn push(&mut self, _payload: Payload) -> Result<(), TransportError> {
            futures::future::pending::<()>().await;
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_every_session_receives_messages() {
        let shutdown = CancellationToken::new();
        let hub = hub(&shutdown);

        let (first, mut first_rx) = ChannelTransport::channel(8);
        let (second, mut second_rx) = ChannelTransport::channel(8);
        hub.attach(Box::new(first), None);
        hub.attach(Box::new(second), None);
        assert_eq!(hub.session_count(), 2);

        assert_eq!(hub.publish(status(ComplianceStatus::Compliant)), 2);

        let expected = Payload::Text(r#"{"status":"PPE complied"}"#.to_string());
        assert_eq!(first_rx.recv().await.unwrap(), expected);
        assert_eq!(second_rx.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_stalled_session_removed_others_unaffected() {
        let shutdown = CancellationToken::new();
        let hub = hub(&shutdown);

        let (healthy, mut healthy_rx) = ChannelTransport::channel(64);
        hub.attach(Box::new(StalledTransport), None);
        hub.attach(Box::new(healthy), None);

        for _ in 0..5 {
            hub.publish(status(ComplianceStatus::NonCompliant));
        }
        for _ in 0..5 {
            let payload = tokio::time::timeout(Duration::from_millis(50), healthy_rx.recv())
                .await
                .expect("healthy session stalled")
                .unwrap();
            assert!(matches!(payload, Payload::Text(_)));
        }

        // 超时后只剩健康会话
        wait_for_sessions(&hub, 1).await;
        hub.publish(status(ComplianceStatus::Compliant));
        assert!(healthy_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_disconnected_session_removed() {
        let shutdown = CancellationToken::new();
        let hub = hub(&shutdown);

        let (transport, rx) = ChannelTransport::channel(8);
        let handle = hub.attach(Box::new(transport), None);
        drop(rx);

        hub.publish(status(ComplianceStatus::Inconclusive));
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .unwrap();
        wait_for_sessions(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_detach_and_shutdown() {
        let shutdown = CancellationToken::new();
        let hub = hub(&shutdown);

        let (first, _first_rx) = ChannelTransport::channel(8);
        let (second, _second_rx) = ChannelTransport::channel(8);
        let first = hub.attach(Box::new(first), None);
        let second = hub.attach(Box::new(second), None);

        assert!(hub.detach(&first.id));
        first.closed().await;
        wait_for_sessions(&hub, 1).await;
        assert!(!hub.detach(&Uuid::new_v4()));

        shutdown.cancel();
        second.closed().await;
        wait_for_sessions(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_cadence_limits_push_rate() {
        let shutdown = CancellationToken::new();
        let hub = hub(&shutdown);

        let (transport, mut rx) = ChannelTransport::channel(64);
        let handle = hub.attach(Box::new(transport), Some(Duration::from_secs(60)));

        for _ in 0..10 {
            hub.publish(status(ComplianceStatus::Compliant));
        }
        assert!(rx.recv().await.is_some());
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let info = hub.session(&handle.id).unwrap();
        assert_eq!(info.delivered, 1);
    }

    #[tokio::test]
    async fn test_lagging_session_skips_old_items() {
        let shutdown = CancellationToken::new();
        let hub: SessionHub<StatusMessage> =
            SessionHub::new("status", 2, Duration::from_secs(1), shutdown.clone());

        let (transport, mut rx) = ChannelTransport::channel(1);
        hub.attach(Box::new(transport), None);

        for _ in 0..20 {
            hub.publish(status(ComplianceStatus::Compliant));
        }
        hub.publish(status(ComplianceStatus::NonCompliant));

        // 最终一定能收到最新一条
        let last = Payload::Text(r#"{"status":"PPE not complied"}"#.to_string());
        let mut received = Vec::new();
        while let Ok(Some(payload)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            received.push(payload);
        }
        assert_eq!(received.last(), Some(&last));
        assert!(received.len() < 21);
    }
}
