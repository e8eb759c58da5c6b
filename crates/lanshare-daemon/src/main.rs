//! Lanshare Daemon
//!
//! 后台守护进程，负责：
//! - 局域网发现（信标、广播、监听、扫描）
//! - HTTP 传输服务（上传、下载开关、事件拉取、下载）
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;
mod service;

use anyhow::Result;
use lanshare_core::AppSettings;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（lanshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lanshare_core=debug")),
        )
        .try_init();

    tracing::info!("Lanshare Daemon starting...");

    let settings = AppSettings::load();
    // 存储目录无法创建或上传上限非法时拒绝启动
    settings.validate()?;
    tracing::info!(
        "设备: {}, 存储目录: {:?}",
        settings.device_name,
        settings.storage_root
    );

    let cancel = CancellationToken::new();
    let node = Arc::new(service::NodeService::start(&settings, cancel.clone()).await?);

    let ipc_handle = tokio::spawn(ipc::run_ipc_server(node.clone(), cancel.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("收到 Ctrl-C，正在退出");
        }
        _ = cancel.cancelled() => {}
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
    }

    cancel.cancel();
    node.shutdown().await;
    Ok(())
}
