use crate::types::ComplianceStatus;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 状态推送消息
///
/// `GET /status` 与状态WebSocket共用：`{"status": "PPE complied"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: ComplianceStatus,
}

impl From<ComplianceStatus> for StatusMessage {
    fn from(status: ComplianceStatus) -> Self {
        Self { status }
    }
}

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Critical,
}

/// 告警推送消息
///
/// 每个确认的违规事件只推送一次：`{"message": "...", "level": "critical"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub message: String,
    pub level: AlertLevel,
}

impl AlertEvent {
    /// 违规确认告警
    pub fn violation(timestamp: DateTime<Local>) -> Self {
        Self {
            message: format!(
                "PPE violation detected at {}",
                timestamp.format("%Y-%m-%d %H:%M:%S")
            ),
            level: AlertLevel::Critical,
        }
    }
}
