// 状态发布
//
// 广播循环每个周期写入一次当前状态；状态发布器按固定间隔把它推送给
// 状态订阅会话，与帧率无关。

use super::session::SessionHub;
use common::{ComplianceStatus, StatusMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 当前状态
///
/// 由流水线上下文持有，广播循环是唯一写者。
#[derive(Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<ComplianceStatus>>,
    updates: Arc<AtomicU64>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ComplianceStatus::default());
        Self {
            tx: Arc::new(tx),
            updates: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set(&self, status: ComplianceStatus) {
        self.tx.send_replace(status);
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current(&self) -> ComplianceStatus {
        *self.tx.borrow()
    }

    /// 状态写入次数
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

/// 状态发布器
pub struct StatusPublisher {
    board: StatusBoard,
    hub: SessionHub<StatusMessage>,
    interval: Duration,
}

impl StatusPublisher {
    pub fn new(board: StatusBoard, hub: SessionHub<StatusMessage>, interval: Duration) -> Self {
        Self {
            board,
            hub,
            interval,
        }
    }

    /// 运行发布循环直到收到停止信号
    ///
    /// # 返回
    ///
    /// 发布次数
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        info!("Status publisher started (interval: {:?})", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut published = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.hub.subscriber_count() == 0 {
                continue;
            }

            let status = self.board.current();
            let receivers = self.hub.publish(StatusMessage::from(status));
            published += 1;
            debug!("Status {:?} published to {} sessions", status, receivers);
        }

        info!("Status publisher stopped (published: {})", published);
        published
    }
}
