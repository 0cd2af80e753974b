// 告警协调
//
// 违规确认后生成告警记录、推送告警事件并立即开始保存证据图片。外部投递
// 交给独立的派发任务；派发队列有界，满时只放弃投递，证据照常保存。

pub mod transport;

use crate::capture::Frame;
use crate::streaming::SessionHub;
use chrono::{DateTime, Local};
use common::AlertEvent;
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub use transport::{AlertTransport, LogTransport, MailEnvelope, OutboxTransport};

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Failed to persist evidence {path:?}: {reason}")]
    Persist { path: PathBuf, reason: String },

    #[error("Alert transport {transport} failed: {reason}")]
    Transport {
        transport: &'static str,
        reason: String,
    },

    #[error("Alert transport {transport} timed out after {timeout:?}")]
    Timeout {
        transport: &'static str,
        timeout: Duration,
    },

    #[error("Alert dispatch queue is full")]
    QueueFull,

    #[error("Alert dispatch queue is closed")]
    QueueClosed,
}

/// 告警记录
///
/// 每个确认的违规事件生成一条，创建后不再修改。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub image_path: PathBuf,
    pub timestamp: DateTime<Local>,
    pub message: String,
}

/// 证据文件名
pub fn evidence_file_name(timestamp: DateTime<Local>) -> String {
    format!("violation_{}.jpg", timestamp.format("%Y%m%d-%H%M%S"))
}

/// 派发参数
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// 派发队列容量
    pub queue_capacity: usize,
    /// 同时进行的投递数上限
    pub max_in_flight: usize,
    /// 单次投递超时
    pub send_timeout: Duration,
    /// 停机时等待证据写入和投递完成的最长时间
    pub drain_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            max_in_flight: 2,
            send_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(1),
        }
    }
}

/// 派发任务
struct DispatchJob {
    record: AlertRecord,
    /// 证据写入任务
    evidence: JoinHandle<Result<(), AlertError>>,
}

/// 派发统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// 已开始派发
    pub dispatched: u64,
    /// 投递成功
    pub delivered: u64,
    /// 证据保存或投递失败
    pub failed: u64,
    /// 停机超时被中止
    pub abandoned: u64,
}

/// 告警协调器
///
/// 由广播循环独占；`on_violation_confirmed` 不等待任何IO，立即返回。
pub struct AlertCoordinator {
    evidence_dir: PathBuf,
    events: SessionHub<AlertEvent>,
    queue: mpsc::Sender<DispatchJob>,
    evidence_tasks: TaskTracker,
    last_name: Option<String>,
    dropped: Arc<AtomicU64>,
}

impl AlertCoordinator {
    /// 创建协调器并启动派发任务
    ///
    /// # 参数
    ///
    /// - `evidence_dir`: 证据图片目录
    /// - `events`: 告警事件会话中心
    /// - `transport`: 外部投递通道
    /// - `settings`: 队列容量、并发与超时
    /// - `shutdown`: 停止信号
    ///
    /// # 返回
    ///
    /// 协调器与派发任务句柄
    pub fn start(
        evidence_dir: impl Into<PathBuf>,
        events: SessionHub<AlertEvent>,
        transport: Arc<dyn AlertTransport>,
        settings: DispatchSettings,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<DispatchStats>) {
        let evidence_dir = evidence_dir.into();
        let (queue, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let evidence_tasks = TaskTracker::new();

        let worker = DispatchWorker {
            rx,
            transport,
            semaphore: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
            evidence_tasks: evidence_tasks.clone(),
        };
        let handle = tokio::spawn(worker.run(shutdown));

        info!(
            "Alert coordinator started (evidence: {:?}, queue: {}, in-flight: {})",
            evidence_dir, settings.queue_capacity, settings.max_in_flight
        );

        (
            Self {
                evidence_dir,
                events,
                queue,
                evidence_tasks,
                last_name: None,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// 违规确认
    ///
    /// 生成告警记录、推送告警事件、在阻塞线程池上保存证据，并把投递放入
    /// 派发队列。队列满时只放弃投递。
    ///
    /// # 参数
    ///
    /// - `frame`: 确认违规的帧
    /// - `evidence`: 证据图像（已绘制叠加层）
    pub fn on_violation_confirmed(&mut self, frame: &Frame, evidence: Arc<RgbImage>) -> AlertRecord {
        let timestamp = frame.captured_at;
        let name = self.unique_name(timestamp);
        let image_path = self.evidence_dir.join(name);
        let event = AlertEvent::violation(timestamp);

        let record = AlertRecord {
            image_path,
            timestamp,
            message: event.message.clone(),
        };

        let receivers = self.events.publish(event);
        debug!("Alert event published to {} sessions", receivers);

        let target = record.image_path.clone();
        let job = DispatchJob {
            record: record.clone(),
            evidence: self
                .evidence_tasks
                .spawn_blocking(move || write_evidence(&target, &evidence)),
        };
        match self.queue.try_send(job) {
            Ok(()) => info!("🚨 Violation confirmed, alert queued: {:?}", record.image_path),
            Err(mpsc::error::TrySendError::Full(job)) => self.skip_delivery(job, AlertError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.skip_delivery(job, AlertError::QueueClosed)
            }
        }

        record
    }

    /// 因队列满或已关闭而放弃的投递数
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 放弃投递，证据写入结果仍然记录
    fn skip_delivery(&self, job: DispatchJob, reason: AlertError) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!("{}, skipping delivery for {:?}", reason, job.record.image_path);

        let DispatchJob { record, evidence } = job;
        self.evidence_tasks.spawn(async move {
            match evidence.await {
                Ok(Ok(())) => debug!("Evidence saved without delivery: {:?}", record.image_path),
                Ok(Err(e)) => error!("{}", e),
                Err(e) => error!("Evidence task for {:?} failed: {}", record.image_path, e),
            }
        });
    }

    /// 同一秒内多次确认时追加序号
    fn unique_name(&mut self, timestamp: DateTime<Local>) -> String {
        let base = evidence_file_name(timestamp);
        let name = match self.last_name.as_deref() {
            Some(last) if last.starts_with(base.trim_end_matches(".jpg")) => {
                let stem = base.trim_end_matches(".jpg");
                let next = last
                    .trim_end_matches(".jpg")
                    .strip_prefix(stem)
                    .and_then(|suffix| suffix.strip_prefix('_'))
                    .and_then(|n| n.parse::<u32>().ok())
                    .unwrap_or(0)
                    + 1;
                format!("{}_{}.jpg", stem, next)
            }
            _ => base,
        };
        self.last_name = Some(name.clone());
        name
    }
}

/// 派发任务
struct DispatchWorker {
    rx: mpsc::Receiver<DispatchJob>,
    transport: Arc<dyn AlertTransport>,
    semaphore: Arc<Semaphore>,
    settings: DispatchSettings,
    evidence_tasks: TaskTracker,
}

impl DispatchWorker {
    async fn run(mut self, shutdown: CancellationToken) -> DispatchStats {
        let mut tasks: JoinSet<Result<(), AlertError>> = JoinSet::new();
        let mut stats = DispatchStats::default();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    record_outcome(&mut stats, result);
                }
                job = self.rx.recv() => match job {
                    Some(job) => {
                        self.spawn_dispatch(&mut tasks, job);
                        stats.dispatched += 1;
                    }
                    None => break,
                },
            }
        }

        // 停机：不再接收新任务，已入队的任务在期限内完成
        let deadline = Instant::now() + self.settings.drain_timeout;
        self.rx.close();
        while let Ok(job) = self.rx.try_recv() {
            self.spawn_dispatch(&mut tasks, job);
            stats.dispatched += 1;
        }

        self.evidence_tasks.close();
        if tokio::time::timeout_at(deadline, self.evidence_tasks.wait())
            .await
            .is_err()
        {
            warn!("Evidence writes still pending after {:?}", self.settings.drain_timeout);
        }

        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(result) = tasks.join_next().await {
                record_outcome(&mut stats, result);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "Alert dispatch drain timed out, aborting {} dispatches",
                tasks.len()
            );
            tasks.abort_all();
            while let Some(result) = tasks.join_next().await {
                record_outcome(&mut stats, result);
            }
        }

        info!(
            "Alert dispatcher stopped (dispatched: {}, delivered: {}, failed: {}, abandoned: {})",
            stats.dispatched, stats.delivered, stats.failed, stats.abandoned
        );
        stats
    }

    /// 许可在任务内获取，派发循环本身从不等待
    fn spawn_dispatch(&self, tasks: &mut JoinSet<Result<(), AlertError>>, job: DispatchJob) {
        let semaphore = self.semaphore.clone();
        let transport = self.transport.clone();
        let send_timeout = self.settings.send_timeout;
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| AlertError::QueueClosed)?;
            dispatch(job, transport, send_timeout).await
        });
    }
}

fn record_outcome(stats: &mut DispatchStats, result: Result<Result<(), AlertError>, JoinError>) {
    match result {
        Ok(Ok(())) => stats.delivered += 1,
        Ok(Err(e)) => {
            stats.failed += 1;
            error!("Alert dispatch failed: {}", e);
        }
        Err(e) if e.is_cancelled() => {
            stats.abandoned += 1;
            warn!("Alert dispatch abandoned at shutdown");
        }
        Err(e) => {
            stats.failed += 1;
            error!("Alert dispatch task panicked: {}", e);
        }
    }
}

/// 等待证据写入后投递
async fn dispatch(
    job: DispatchJob,
    transport: Arc<dyn AlertTransport>,
    send_timeout: Duration,
) -> Result<(), AlertError> {
    let DispatchJob { record, evidence } = job;

    evidence.await.map_err(|e| AlertError::Persist {
        path: record.image_path.clone(),
        reason: e.to_string(),
    })??;
    debug!("Evidence saved: {:?}", record.image_path);

    match tokio::time::timeout(send_timeout, transport.send(&record.image_path, record.timestamp)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(AlertError::Transport {
                transport: transport.name(),
                reason: format!("{:#}", e),
            })
        }
        Err(_) => {
            return Err(AlertError::Timeout {
                transport: transport.name(),
                timeout: send_timeout,
            })
        }
    }

    info!("✓ Alert delivered via {} ({:?})", transport.name(), record.image_path);
    Ok(())
}

/// 保存证据图片（阻塞）
fn write_evidence(path: &Path, image: &RgbImage) -> Result<(), AlertError> {
    let persist_error = |reason: String| AlertError::Persist {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| persist_error(e.to_string()))?;
    }
    image
        .save_with_format(path, ImageFormat::Jpeg)
        .map_err(|e| persist_error(e.to_string()))
}
