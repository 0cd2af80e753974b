pub mod handlers;
pub mod routes;
pub mod server;
pub mod ws;

use crate::pipeline::PipelineContext;
use std::path::PathBuf;

pub use routes::create_router;
pub use server::HttpServer;

/// HTTP共享状态
#[derive(Clone)]
pub struct AppState {
    pub pipeline: PipelineContext,
    /// 首页模板路径
    pub index_page: Option<PathBuf>,
}

impl AppState {
    pub fn new(pipeline: PipelineContext, index_page: Option<PathBuf>) -> Self {
        Self {
            pipeline,
            index_page,
        }
    }
}
