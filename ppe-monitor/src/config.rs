// 配置模块
//
// 从TOML文件加载运行参数；文件不存在时使用内置默认值。

use common::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub stream: StreamConfig,
    pub status: StatusConfig,
    pub violation: ViolationConfig,
    pub alert: AlertConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP监听地址
    pub bind: String,
    /// 首页模板路径（不存在时使用内置页面）
    pub index_page: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            index_page: Some(PathBuf::from("templates/index.html")),
        }
    }
}

/// 采集设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// 合成测试画面
    Synthetic,
    /// 循环读取目录中的图片
    Images,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub kind: CaptureKind,
    pub image_dir: Option<PathBuf>,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// 读取失败后的重试间隔
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub retry_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            kind: CaptureKind::Synthetic,
            image_dir: None,
            fps: 30,
            width: 640,
            height: 480,
            retry_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// 是否在输出画面上绘制检测框
    pub overlay: bool,
    /// 静态检测器返回的标签
    pub labels: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            overlay: true,
            labels: vec!["person".to_string(), "helmet".to_string(), "vest".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 输出帧率上限
    pub max_fps: f64,
    /// JPEG编码质量（1-100）
    pub jpeg_quality: u8,
    /// 没有新帧时的等待间隔
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub frame_backoff: Duration,
    /// 单个会话发送超时，超时即移除该会话
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub send_timeout: Duration,
    /// 广播通道容量
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_fps: 30.0,
            jpeg_quality: 80,
            frame_backoff: Duration::from_millis(10),
            send_timeout: Duration::from_secs(2),
            channel_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub interval: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViolationConfig {
    /// 违规持续多久才确认
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub persist: Duration,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            persist: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// 证据图片目录
    pub evidence_dir: PathBuf,
    /// 邮件发件箱目录；为空时只记录日志
    pub outbox_dir: Option<PathBuf>,
    pub recipient: String,
    pub subject: String,
    /// 派发队列容量
    pub queue_capacity: usize,
    /// 同时进行的派发数上限
    pub max_in_flight: usize,
    /// 单次投递超时
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub send_timeout: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            evidence_dir: PathBuf::from("violations"),
            outbox_dir: None,
            recipient: "supervisor@example.com".to_string(),
            subject: "PPE Violation Detected".to_string(),
            queue_capacity: 8,
            max_in_flight: 2,
            send_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// 每个循环退出的最长等待时间
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// 加载配置
    ///
    /// `path` 为空或文件不存在时返回默认配置。
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) if path.exists() => {
                let content = tokio::fs::read_to_string(path).await?;
                let config = Self::from_toml(&content)?;
                info!("Configuration loaded from {:?}", path);
                config
            }
            Some(path) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| MonitorError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.capture.fps == 0 {
            return Err(MonitorError::ConfigError(
                "capture.fps must be greater than 0".to_string(),
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(MonitorError::ConfigError(
                "capture frame size must be non-zero".to_string(),
            ));
        }
        if self.stream.max_fps <= 0.0 {
            return Err(MonitorError::ConfigError(
                "stream.max_fps must be greater than 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(MonitorError::ConfigError(format!(
                "stream.jpeg_quality must be between 1 and 100, got {}",
                self.stream.jpeg_quality
            )));
        }
        if self.stream.channel_capacity == 0
            || self.alert.queue_capacity == 0
            || self.alert.max_in_flight == 0
        {
            return Err(MonitorError::ConfigError(
                "channel and queue capacities must be greater than 0".to_string(),
            ));
        }
        if self.alert.send_timeout.is_zero() {
            return Err(MonitorError::ConfigError(
                "alert.send_timeout must be greater than 0".to_string(),
            ));
        }
        if self.status.interval.is_zero() {
            return Err(MonitorError::ConfigError(
                "status.interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
