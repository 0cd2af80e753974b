use super::AppState;
use common::Result;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct HttpServer {
    addr: SocketAddr,
    state: AppState,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// 运行HTTP服务，收到停止信号后优雅退出
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let app = super::routes::create_router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("HTTP server running on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}
