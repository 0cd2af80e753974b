// 流水线生命周期
//
// 启动：打开采集设备（失败即退出），再启动广播、状态发布和告警派发。
// 停机：发出停止信号，逐个限时等待各循环退出，最后释放采集设备。

use crate::alert::{
    AlertCoordinator, AlertTransport, DispatchSettings, DispatchStats, LogTransport, OutboxTransport,
};
use crate::capture::{CaptureDevice, FrameSlot, FrameSource, ImageDirCamera, SyntheticCamera};
use crate::config::{CaptureKind, Config};
use crate::detection::{DetectionAdapter, Detector, StaticDetector};
use crate::encode::{FrameEncoder, JpegFrameEncoder};
use crate::streaming::{
    BroadcastSettings, BroadcastStats, EncodedFrame, FrameBroadcaster, SessionHub, StatusBoard,
    StatusPublisher,
};
use common::{AlertEvent, MonitorError, Result, StatusMessage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 告警事件会话中心容量
const ALERT_CHANNEL_CAPACITY: usize = 32;

/// 流水线上下文
///
/// 持有当前状态、帧缓冲和各路会话中心，随流水线一起销毁。
#[derive(Clone)]
pub struct PipelineContext {
    pub slot: Arc<FrameSlot>,
    pub status: StatusBoard,
    pub frames: SessionHub<EncodedFrame>,
    pub status_hub: SessionHub<StatusMessage>,
    pub alerts: SessionHub<AlertEvent>,
    pub shutdown: CancellationToken,
}

impl PipelineContext {
    pub fn new(config: &Config, shutdown: CancellationToken) -> Self {
        let send_timeout = config.stream.send_timeout;
        Self {
            slot: Arc::new(FrameSlot::new()),
            status: StatusBoard::new(),
            frames: SessionHub::new(
                "video",
                config.stream.channel_capacity,
                send_timeout,
                shutdown.clone(),
            ),
            status_hub: SessionHub::new(
                "status",
                config.stream.channel_capacity,
                send_timeout,
                shutdown.clone(),
            ),
            alerts: SessionHub::new("alerts", ALERT_CHANNEL_CAPACITY, send_timeout, shutdown.clone()),
            shutdown,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// 流水线的外部协作者
pub struct PipelineParts {
    pub device: Box<dyn CaptureDevice>,
    pub detector: Arc<dyn Detector>,
    pub encoder: Arc<dyn FrameEncoder>,
    pub alert_transport: Arc<dyn AlertTransport>,
}

impl PipelineParts {
    /// 按配置构造默认协作者
    pub fn from_config(config: &Config) -> Result<Self> {
        let capture = &config.capture;
        let device: Box<dyn CaptureDevice> = match capture.kind {
            CaptureKind::Synthetic => Box::new(SyntheticCamera::new(
                capture.width,
                capture.height,
                capture.fps,
            )),
            CaptureKind::Images => {
                let dir = capture.image_dir.clone().ok_or_else(|| {
                    MonitorError::ConfigError(
                        "capture.image_dir is required for the images capture kind".to_string(),
                    )
                })?;
                Box::new(ImageDirCamera::new(dir, capture.fps))
            }
        };

        let alert_transport: Arc<dyn AlertTransport> = match &config.alert.outbox_dir {
            Some(outbox) => Arc::new(OutboxTransport::new(
                outbox,
                config.alert.recipient.clone(),
                config.alert.subject.clone(),
            )),
            None => Arc::new(LogTransport),
        };

        Ok(Self {
            device,
            detector: Arc::new(StaticDetector::new(config.detection.labels.clone())),
            encoder: Arc::new(JpegFrameEncoder::new(config.stream.jpeg_quality)),
            alert_transport,
        })
    }
}

/// 停机报告
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    /// 广播循环统计；超时或异常退出时为空
    pub broadcast: Option<BroadcastStats>,
    /// 状态发布次数
    pub status_published: Option<u64>,
    pub alerts: Option<DispatchStats>,
    /// 采集线程是否在超时前退出
    pub capture_stopped: bool,
}

impl ShutdownReport {
    /// 所有循环都在超时前正常退出
    pub fn is_clean(&self) -> bool {
        self.broadcast.is_some()
            && self.status_published.is_some()
            && self.alerts.is_some()
            && self.capture_stopped
    }
}

/// 流水线
pub struct Pipeline {
    context: PipelineContext,
    frame_source: Option<FrameSource>,
    broadcaster: Option<JoinHandle<BroadcastStats>>,
    status_publisher: Option<JoinHandle<u64>>,
    dispatcher: Option<JoinHandle<DispatchStats>>,
    shutdown_timeout: Duration,
}

impl Pipeline {
    /// 启动流水线
    ///
    /// 采集设备打开失败时返回错误，其余组件不会启动。
    pub async fn start(config: &Config, parts: PipelineParts) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let context = PipelineContext::new(config, shutdown.clone());

        let PipelineParts {
            device,
            detector,
            encoder,
            alert_transport,
        } = parts;

        // 打开设备可能阻塞
        let slot = context.slot.clone();
        let capture_token = shutdown.child_token();
        let retry_delay = config.capture.retry_delay;
        let frame_source = tokio::task::spawn_blocking(move || {
            FrameSource::start(device, slot, capture_token, retry_delay)
        })
        .await
        .map_err(|e| MonitorError::CaptureError(format!("capture startup task failed: {}", e)))??;
        info!("✓ Capture source started ({})", frame_source.device_name());

        let (alerts, dispatcher) = AlertCoordinator::start(
            config.alert.evidence_dir.clone(),
            context.alerts.clone(),
            alert_transport,
            DispatchSettings {
                queue_capacity: config.alert.queue_capacity,
                max_in_flight: config.alert.max_in_flight,
                send_timeout: config.alert.send_timeout,
                // 留出余量，派发任务在整体停机超时前返回统计
                drain_timeout: config.shutdown.timeout / 2,
            },
            shutdown.clone(),
        );

        let settings = BroadcastSettings {
            max_fps: config.stream.max_fps,
            frame_backoff: config.stream.frame_backoff,
            overlay: config.detection.overlay,
            violation_persist: config.violation.persist,
        };
        let broadcaster = FrameBroadcaster::new(
            context.slot.clone(),
            DetectionAdapter::new(detector),
            encoder,
            context.status.clone(),
            context.frames.clone(),
            settings,
        )
        .with_alerts(alerts);
        let broadcaster = tokio::spawn(broadcaster.run(shutdown.clone()));
        info!("✓ Frame broadcaster started");

        let publisher = StatusPublisher::new(
            context.status.clone(),
            context.status_hub.clone(),
            config.status.interval,
        );
        let status_publisher = tokio::spawn(publisher.run(shutdown.clone()));
        info!("✓ Status publisher started");

        Ok(Self {
            context,
            frame_source: Some(frame_source),
            broadcaster: Some(broadcaster),
            status_publisher: Some(status_publisher),
            dispatcher: Some(dispatcher),
            shutdown_timeout: config.shutdown.timeout,
        })
    }

    pub fn context(&self) -> PipelineContext {
        self.context.clone()
    }

    /// 停机
    ///
    /// 每个循环最多等待 `shutdown.timeout`，超时的任务被中止。
    /// 采集设备最后释放。
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!("Shutting down pipeline...");
        self.context.shutdown.cancel();

        let timeout = self.shutdown_timeout;
        let broadcast = join_with_timeout("frame broadcaster", self.broadcaster.take(), timeout).await;
        let status_published =
            join_with_timeout("status publisher", self.status_publisher.take(), timeout).await;
        let alerts = join_with_timeout("alert dispatcher", self.dispatcher.take(), timeout).await;

        let capture_stopped = match self.frame_source.take() {
            Some(mut source) => tokio::task::spawn_blocking(move || source.stop(timeout))
                .await
                .unwrap_or_else(|e| {
                    error!("Capture stop task failed: {}", e);
                    false
                }),
            None => true,
        };

        let report = ShutdownReport {
            broadcast,
            status_published,
            alerts,
            capture_stopped,
        };
        if report.is_clean() {
            info!("✓ Pipeline stopped cleanly");
        } else {
            warn!("Pipeline stopped with timeouts: {:?}", report);
        }
        report
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.context.shutdown.cancel();
    }
}

async fn join_with_timeout<T>(
    name: &str,
    handle: Option<JoinHandle<T>>,
    timeout: Duration,
) -> Option<T> {
    let mut handle = handle?;
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(value)) => {
            info!("✓ {} stopped", name);
            Some(value)
        }
        Ok(Err(e)) => {
            error!("{} task failed: {}", name, e);
            None
        }
        Err(_) => {
            warn!("{} did not stop within {:?}, aborting", name, timeout);
            handle.abort();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_images_kind_requires_directory() {
        let mut config = Config::default();
        config.capture.kind = CaptureKind::Images;
        assert!(matches!(
            PipelineParts::from_config(&config),
            Err(MonitorError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_open_failure_is_fatal() {
        let mut config = Config::default();
        config.capture.kind = CaptureKind::Images;
        config.capture.image_dir = Some("/nonexistent/ppe-frames".into());

        let parts = PipelineParts::from_config(&config).unwrap();
        let result = Pipeline::start(&config, parts).await;
        assert!(matches!(result, Err(MonitorError::CaptureError(_))));
    }

    #[tokio::test]
    async fn test_start_and_shutdown_with_synthetic_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.capture.width = 64;
        config.capture.height = 48;
        config.alert.evidence_dir = dir.path().join("violations");
        config.shutdown.timeout = Duration::from_secs(1);

        let parts = PipelineParts::from_config(&config).unwrap();
        let pipeline = Pipeline::start(&config, parts).await.unwrap();
        let context = pipeline.context();

        for _ in 0..100 {
            if context.status.update_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(context.status.current(), common::ComplianceStatus::Compliant);

        let report = pipeline.shutdown().await;
        assert!(report.is_clean());
        assert!(context.is_shutting_down());
    }
}
