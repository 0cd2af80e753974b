// 检测适配模块
//
// 封装外部检测模型，把原始标签集合映射为合规状态。

pub mod overlay;
pub mod stub;

use crate::capture::Frame;
use common::ComplianceStatus;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use overlay::draw_overlay;
pub use stub::StaticDetector;

/// 缺失装备标签
pub const MISSING_EQUIPMENT_LABELS: &[&str] = &["no_helmet", "no_boots"];
/// 完全未佩戴防护装备标签
pub const NO_PPE_LABEL: &str = "none";
/// 已佩戴装备标签
pub const EQUIPMENT_LABELS: &[&str] = &["helmet", "vest", "boots"];
/// 人员标签
pub const SUBJECT_LABELS: &[&str] = &["person", "Person"];

/// 检测错误
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detector failed: {0}")]
    Model(String),

    #[error("Detection worker failed: {0}")]
    Worker(String),
}

/// 检测框（叠加层数据）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub label: String,
    pub confidence: f32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 一次检测的原始结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// 检测到的标签
    pub labels: Vec<String>,
    /// 可选的检测框
    pub boxes: Vec<BoundingBox>,
}

impl Detection {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            boxes: Vec::new(),
        }
    }

    fn has(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    fn has_any(&self, labels: &[&str]) -> bool {
        labels.iter().any(|label| self.has(label))
    }
}

/// 外部检测模型
///
/// 同步调用，可能较慢；由适配器放到阻塞线程池执行。
pub trait Detector: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn detect(&self, image: &RgbImage) -> Result<Detection, DetectionError>;
}

/// 把标签集合映射为合规状态
///
/// 纯函数，不保留任何调用间状态。
pub fn classify_labels(detection: &Detection) -> ComplianceStatus {
    if !detection.has_any(SUBJECT_LABELS) {
        return ComplianceStatus::NoDetection;
    }

    if detection.has_any(MISSING_EQUIPMENT_LABELS) || detection.has(NO_PPE_LABEL) {
        ComplianceStatus::NonCompliant
    } else if detection.has_any(EQUIPMENT_LABELS) {
        ComplianceStatus::Compliant
    } else {
        ComplianceStatus::Inconclusive
    }
}

/// 分类结果
#[derive(Debug, Clone)]
pub struct Classification {
    pub status: ComplianceStatus,
    pub detection: Detection,
}

/// 检测适配器
#[derive(Clone)]
pub struct DetectionAdapter {
    detector: Arc<dyn Detector>,
}

impl DetectionAdapter {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// 对一帧进行分类
    ///
    /// 模型调用在阻塞线程池上执行，不占用异步工作线程。
    pub async fn classify(&self, frame: &Frame) -> Result<Classification, DetectionError> {
        let detector = self.detector.clone();
        let image = frame.image.clone();

        let detection = tokio::task::spawn_blocking(move || detector.detect(&image))
            .await
            .map_err(|e| DetectionError::Worker(e.to_string()))??;

        let status = classify_labels(&detection);
        debug!(
            "Frame {} classified as {:?} (labels: {:?})",
            frame.sequence, status, detection.labels
        );

        Ok(Classification { status, detection })
    }
}
