// 帧广播
//
// 每个周期取最新帧，检测、判定违规、绘制叠加层并编码，然后发布到视频
// 会话中心。发布只写入broadcast通道，不等待任何会话。

use super::error::TransportError;
use super::pacer::FrameRatePacer;
use super::session::SessionHub;
use super::status::StatusBoard;
use super::transport::{IntoPayload, Payload};
use crate::alert::AlertCoordinator;
use crate::capture::FrameSlot;
use crate::detection::{draw_overlay, DetectionAdapter};
use crate::encode::{EncodeError, FrameEncoder};
use crate::tracker::ViolationTracker;
use bytes::Bytes;
use chrono::{DateTime, Local};
use common::ComplianceStatus;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 编码后的输出帧
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub captured_at: DateTime<Local>,
    pub status: ComplianceStatus,
    pub data: Bytes,
}

impl IntoPayload for EncodedFrame {
    fn to_payload(&self) -> Result<Payload, TransportError> {
        Ok(Payload::Binary(self.data.clone()))
    }
}

/// 单个周期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 没有新帧
    NoFrame,
    /// 检测失败，本周期跳过
    SkippedDetection,
    /// 编码失败，本周期不发布
    SkippedEncode,
    /// 已发布
    Published { sequence: u64, receivers: usize },
}

/// 广播统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    /// 处理的帧数
    pub cycles: u64,
    pub published: u64,
    pub skipped_detection: u64,
    pub skipped_encode: u64,
    /// 确认的违规次数
    pub alerts: u64,
}

/// 广播参数
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// 输出帧率上限
    pub max_fps: f64,
    /// 没有新帧时的等待间隔
    pub frame_backoff: Duration,
    /// 是否绘制检测框
    pub overlay: bool,
    /// 违规持续阈值
    pub violation_persist: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            max_fps: 30.0,
            frame_backoff: Duration::from_millis(10),
            overlay: true,
            violation_persist: crate::tracker::DEFAULT_PERSIST,
        }
    }
}

/// 帧广播器
pub struct FrameBroadcaster {
    slot: Arc<FrameSlot>,
    detection: DetectionAdapter,
    encoder: Arc<dyn FrameEncoder>,
    tracker: ViolationTracker,
    status: StatusBoard,
    frames: SessionHub<EncodedFrame>,
    alerts: Option<AlertCoordinator>,
    pacer: FrameRatePacer,
    settings: BroadcastSettings,
    last_sequence: Option<u64>,
    stats: BroadcastStats,
}

impl FrameBroadcaster {
    pub fn new(
        slot: Arc<FrameSlot>,
        detection: DetectionAdapter,
        encoder: Arc<dyn FrameEncoder>,
        status: StatusBoard,
        frames: SessionHub<EncodedFrame>,
        settings: BroadcastSettings,
    ) -> Self {
        Self {
            slot,
            detection,
            encoder,
            tracker: ViolationTracker::new(settings.violation_persist),
            status,
            frames,
            alerts: None,
            pacer: FrameRatePacer::new(settings.max_fps),
            settings,
            last_sequence: None,
            stats: BroadcastStats::default(),
        }
    }

    /// 接入告警协调器
    pub fn with_alerts(mut self, alerts: AlertCoordinator) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }

    /// 执行一个处理周期
    pub async fn cycle(&mut self) -> CycleOutcome {
        let Some(frame) = self.slot.get() else {
            return CycleOutcome::NoFrame;
        };
        if self.last_sequence == Some(frame.sequence) {
            return CycleOutcome::NoFrame;
        }
        self.last_sequence = Some(frame.sequence);
        self.stats.cycles += 1;

        let classification = match self.detection.classify(&frame).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!("Detection failed for frame {}, skipping: {}", frame.sequence, e);
                self.stats.skipped_detection += 1;
                return CycleOutcome::SkippedDetection;
            }
        };

        let status = classification.status;
        self.status.set(status);
        let confirmed = self.tracker.observe(status, frame.captured_instant);

        // 叠加层与编码在阻塞线程池执行
        let encoder = self.encoder.clone();
        let source = frame.image.clone();
        let boxes = if self.settings.overlay {
            classification.detection.boxes
        } else {
            Vec::new()
        };
        let rendered = tokio::task::spawn_blocking(move || {
            let output = if boxes.is_empty() {
                source
            } else {
                Arc::new(draw_overlay(&source, &boxes))
            };
            let encoded = encoder.encode(&output);
            (output, encoded)
        })
        .await;

        let (output, encoded) = match rendered {
            Ok(rendered) => rendered,
            Err(e) => {
                error!("Render task for frame {} failed: {}", frame.sequence, e);
                (frame.image.clone(), Err(EncodeError::Other(e.to_string())))
            }
        };

        if confirmed {
            self.stats.alerts += 1;
            match self.alerts.as_mut() {
                Some(alerts) => {
                    alerts.on_violation_confirmed(&frame, output);
                }
                None => warn!("Violation confirmed on frame {} but alerts are disabled", frame.sequence),
            }
        }

        match encoded {
            Ok(data) => {
                let receivers = self.frames.publish(EncodedFrame {
                    sequence: frame.sequence,
                    captured_at: frame.captured_at,
                    status,
                    data,
                });
                self.stats.published += 1;
                CycleOutcome::Published {
                    sequence: frame.sequence,
                    receivers,
                }
            }
            Err(e) => {
                warn!("Encoding failed for frame {}, skipping: {}", frame.sequence, e);
                self.stats.skipped_encode += 1;
                CycleOutcome::SkippedEncode
            }
        }
    }

    /// 运行广播循环直到收到停止信号
    pub async fn run(mut self, shutdown: CancellationToken) -> BroadcastStats {
        info!(
            "🚀 Frame broadcaster starting (detector: {}, max {:.1}fps)",
            self.detection.detector_name(),
            self.pacer.target_fps()
        );

        while !shutdown.is_cancelled() {
            self.pacer.begin_cycle();

            let delay = match self.cycle().await {
                CycleOutcome::NoFrame => self.settings.frame_backoff,
                CycleOutcome::Published { sequence, receivers } => {
                    if sequence % 300 == 0 {
                        debug!("Frame {} published to {} sessions", sequence, receivers);
                    }
                    self.pacer.delay_until_next()
                }
                CycleOutcome::SkippedDetection | CycleOutcome::SkippedEncode => {
                    self.pacer.delay_until_next()
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(
            "Frame broadcaster stopped (cycles: {}, published: {}, skipped: {}/{}, alerts: {})",
            self.stats.cycles,
            self.stats.published,
            self.stats.skipped_detection,
            self.stats.skipped_encode,
            self.stats.alerts
        );
        self.stats
    }
}
