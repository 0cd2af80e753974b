use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Capture device error: {0}")]
    CaptureError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
