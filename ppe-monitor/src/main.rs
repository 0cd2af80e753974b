use anyhow::{Context, Result};
use clap::Parser;
use ppe_monitor::http::{AppState, HttpServer};
use ppe_monitor::{Config, Pipeline, PipelineParts};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ppe-monitor", version, about = "PPE compliance video monitor")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, env = "PPE_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// 覆盖监听地址
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志 - 使用环境变量 RUST_LOG 控制级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    info!("🚀 PPE monitor starting...");

    // 加载配置
    let mut config = Config::load(args.config.as_deref()).await?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.server.bind))?;
    info!("✓ Configuration loaded");
    info!("  Capture: {:?} @ {}fps", config.capture.kind, config.capture.fps);
    info!("  Evidence dir: {:?}", config.alert.evidence_dir);

    // 打开采集设备，失败直接退出
    let parts = PipelineParts::from_config(&config)?;
    let pipeline = Pipeline::start(&config, parts)
        .await
        .context("failed to start pipeline")?;
    let context = pipeline.context();

    let server = HttpServer::new(addr, AppState::new(context.clone(), config.server.index_page.clone()));
    let server_shutdown = context.shutdown.clone();
    let mut server_task = tokio::spawn(async move { server.run(server_shutdown).await });

    info!("✅ PPE monitor ready on http://{}", addr);
    info!("   Press Ctrl+C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C");
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => warn!("HTTP server exited"),
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
        }
    }

    let report = pipeline.shutdown().await;

    if !server_task.is_finished() {
        match tokio::time::timeout(config.shutdown.timeout, &mut server_task).await {
            Ok(_) => {}
            Err(_) => {
                warn!("HTTP server did not stop within {:?}", config.shutdown.timeout);
                server_task.abort();
            }
        }
    }

    info!(
        "👋 PPE monitor stopped (frames published: {}, alerts: {})",
        report.broadcast.map(|stats| stats.published).unwrap_or(0),
        report.broadcast.map(|stats| stats.alerts).unwrap_or(0)
    );
    Ok(())
}
