// 流输出模块
//
// 视频帧、状态和告警三路输出共用同一套会话中心与传输抽象。

pub mod broadcaster;
pub mod error;
pub mod pacer;
pub mod session;
pub mod status;
pub mod transport;

pub use broadcaster::{BroadcastSettings, BroadcastStats, CycleOutcome, EncodedFrame, FrameBroadcaster};
pub use error::TransportError;
pub use pacer::FrameRatePacer;
pub use session::{ConsumerSession, SessionHandle, SessionHub};
pub use status::{StatusBoard, StatusPublisher};
pub use transport::{
    ChannelTransport, IntoPayload, MultipartTransport, Payload, SessionTransport, TransportKind,
    WebSocketTransport, MULTIPART_CONTENT_TYPE,
};
