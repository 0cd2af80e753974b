// 会话传输错误

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// 客户端已断开
    #[error("Session closed")]
    Closed,

    /// 传输不支持该负载
    #[error("Payload not supported by {0} transport")]
    Unsupported(&'static str),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Serialization failed: {0}")]
    Serialize(String),
}

impl TransportError {
    /// 是否为客户端主动断开
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        TransportError::Serialize(error.to_string())
    }
}
