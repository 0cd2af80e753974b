// 告警发送通道
//
// 外部告警投递（如邮件）的接口。发送失败只记录日志，不影响画面处理。

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 邮件正文
pub const ALERT_BODY: &str =
    "A PPE non-compliance has been detected. The attached image shows the violation as evidence.";

/// 附件文件名
pub const ATTACHMENT_NAME: &str = "violation.jpg";

/// 告警发送通道
#[async_trait]
pub trait AlertTransport: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// 发送一条告警
    ///
    /// # 参数
    ///
    /// - `image_path`: 证据图片路径
    /// - `timestamp`: 违规确认时间
    async fn send(&self, image_path: &Path, timestamp: DateTime<Local>) -> anyhow::Result<()>;
}

/// 只写日志的发送通道
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl AlertTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, image_path: &Path, timestamp: DateTime<Local>) -> anyhow::Result<()> {
        warn!(
            "🚨 PPE violation at {} (evidence: {:?})",
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            image_path
        );
        Ok(())
    }
}

/// 邮件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailEnvelope {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// 附件源文件
    pub attachment: PathBuf,
    /// 附件显示名
    pub attachment_name: String,
    pub timestamp: DateTime<Local>,
}

/// 发件箱通道
///
/// 把邮件信封以JSON写入发件箱目录，由外部邮件程序投递。
pub struct OutboxTransport {
    outbox_dir: PathBuf,
    recipient: String,
    subject: String,
}

impl OutboxTransport {
    pub fn new(
        outbox_dir: impl Into<PathBuf>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
            recipient: recipient.into(),
            subject: subject.into(),
        }
    }

    pub fn envelope(&self, image_path: &Path, timestamp: DateTime<Local>) -> MailEnvelope {
        MailEnvelope {
            to: self.recipient.clone(),
            subject: self.subject.clone(),
            body: ALERT_BODY.to_string(),
            attachment: image_path.to_path_buf(),
            attachment_name: ATTACHMENT_NAME.to_string(),
            timestamp,
        }
    }
}

#[async_trait]
impl AlertTransport for OutboxTransport {
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn send(&self, image_path: &Path, timestamp: DateTime<Local>) -> anyhow::Result<()> {
        if !tokio::fs::try_exists(image_path).await? {
            anyhow::bail!("evidence image {:?} does not exist", image_path);
        }

        tokio::fs::create_dir_all(&self.outbox_dir).await?;

        let stem = image_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("violation");
        let path = self.outbox_dir.join(format!("{}.json", stem));

        let envelope = self.envelope(image_path, timestamp);
        tokio::fs::write(&path, serde_json::to_vec_pretty(&envelope)?).await?;

        info!("✓ Alert mail queued for {} at {:?}", self.recipient, path);
        Ok(())
    }
}
