// PPE合规监控
//
// 采集线程 -> 单槽帧缓冲 -> 广播循环（检测、违规判定、编码）-> 各路会话；
// 违规确认后由告警协调器保存证据并派发。

pub mod alert;
pub mod capture;
pub mod config;
pub mod detection;
pub mod encode;
pub mod http;
pub mod pipeline;
pub mod serde_helpers;
pub mod streaming;
pub mod tracker;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineContext, PipelineParts, ShutdownReport};
