use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;

/// 采集错误
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open capture device: {0}")]
    OpenFailed(String),

    #[error("Capture device not opened")]
    NotOpened,

    #[error("Frame read failed: {0}")]
    ReadFailed(String),

    #[error("No images found in {0:?}")]
    NoImages(PathBuf),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<CaptureError> for common::MonitorError {
    fn from(error: CaptureError) -> Self {
        common::MonitorError::CaptureError(error.to_string())
    }
}

/// 阻塞式采集设备
///
/// 由采集线程独占；`read` 允许阻塞直到下一帧可用。
/// 读取失败视为暂时性错误，由采集循环退避重试。
pub trait CaptureDevice: Send + 'static {
    /// 设备名称（用于日志）
    fn name(&self) -> &str;

    /// 打开设备
    fn open(&mut self) -> Result<(), CaptureError>;

    /// 读取一帧
    fn read(&mut self) -> Result<RgbImage, CaptureError>;

    /// 释放设备
    fn release(&mut self);
}
