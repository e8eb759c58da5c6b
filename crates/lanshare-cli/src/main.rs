//! Lanshare CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信；
//! `watch` 子命令在本进程内运行接收文件分发引擎。

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use lanshare_core::dispatch::{HostCapabilities, HttpEventSource, StorageWatch};
use lanshare_core::ipc::{IpcRequest, IpcResponse};
use lanshare_core::transfer::PeerSendStatus;
use lanshare_core::{AppSettings, DispatchEngine, GateState, NoticeSender, PeerRecord, SendReport};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lanshare", version, about = "局域网文件分发工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 发送文件到指定设备
    Send {
        /// 要发送的文件路径
        file: String,
        /// 目标地址（可重复，支持 host:port）
        #[arg(short, long = "to", required = true)]
        to: Vec<String>,
    },
    /// 发送文件到所有已发现设备
    SendAll {
        /// 要发送的文件路径
        file: String,
    },
    /// 重新扫描局域网
    Scan,
    /// 列出已发现设备
    Peers,
    /// 查看或修改本机下载开关
    Gate {
        #[arg(value_enum, default_value = "status")]
        action: GateAction,
    },
    /// 查看本机状态
    Status,
    /// 停止守护进程
    Stop,
    /// 自动处理接收到的文件（打开文档、执行脚本）
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum GateAction {
    On,
    Off,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Send { file, to } => {
            println!("📤 发送文件: {}", file);
            let resp = client::send_request(IpcRequest::Send {
                file_path: absolute(&file),
                targets: to,
            })
            .await?;
            if let IpcResponse::SendReport { report } = resp {
                print_report(&report);
            }
        }
        Commands::SendAll { file } => {
            println!("📤 发送文件到所有设备: {}", file);
            let resp = client::send_request(IpcRequest::SendAll {
                file_path: absolute(&file),
            })
            .await?;
            if let IpcResponse::SendReport { report } = resp {
                print_report(&report);
            }
        }
        Commands::Scan => {
            println!("🔍 扫描局域网...");
            if let IpcResponse::Peers { peers } = client::send_request(IpcRequest::Scan).await? {
                print_peers(&peers);
            }
        }
        Commands::Peers => {
            if let IpcResponse::Peers { peers } = client::send_request(IpcRequest::Peers).await? {
                print_peers(&peers);
            }
        }
        Commands::Gate { action } => match action {
            GateAction::On => {
                client::send_request(IpcRequest::SetGate { enabled: true }).await?;
            }
            GateAction::Off => {
                client::send_request(IpcRequest::SetGate { enabled: false }).await?;
            }
            GateAction::Status => {
                if let IpcResponse::Status {
                    downloads_enabled, ..
                } = client::send_request(IpcRequest::Status).await?
                {
                    println!(
                        "下载开关: {}",
                        if downloads_enabled { "开启" } else { "关闭" }
                    );
                }
            }
        },
        Commands::Status => {
            if let IpcResponse::Status {
                local_address,
                display_name,
                platform_label,
                downloads_enabled,
                peer_count,
            } = client::send_request(IpcRequest::Status).await?
            {
                println!("本机: {} ({})", display_name, local_address);
                println!("平台: {}", platform_label);
                println!(
                    "下载开关: {}",
                    if downloads_enabled { "开启" } else { "关闭" }
                );
                println!("已发现设备: {}", peer_count);
            }
        }
        Commands::Stop => {
            println!("⏹️  停止守护进程");
            client::send_request(IpcRequest::Stop).await?;
        }
        Commands::Watch => watch().await?,
    }

    Ok(())
}

async fn watch() -> Result<()> {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,lanshare_core=info")),
        )
        .try_init();

    let settings = AppSettings::load();
    settings.validate()?;

    let cancel = CancellationToken::new();
    let (notices, mut rx) = NoticeSender::channel(64);
    let capabilities = HostCapabilities::detect(&settings);
    let engine = DispatchEngine::new(&settings, capabilities, notices, cancel.clone());
    let source = HttpEventSource::local(settings.transfer_port)?;
    // 监视失败不影响事件日志轮询
    let storage_watch = match StorageWatch::start(&settings.storage_root) {
        Ok(w) => Some(w),
        Err(e) => {
            eprintln!("⚠️ 无法监视存储目录，仅轮询事件日志: {}", e);
            None
        }
    };

    println!("👀 监视接收文件: {:?}", settings.storage_root);

    let printer = tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            println!("{}", entry);
        }
    });

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    engine.run(&source, storage_watch, cancel).await;
    drop(engine);
    let _ = printer.await;
    Ok(())
}

fn absolute(file: &str) -> String {
    std::path::absolute(Path::new(file))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| file.to_string())
}

fn print_peers(peers: &[PeerRecord]) {
    if peers.is_empty() {
        println!("   未发现设备");
        return;
    }
    for (i, peer) in peers.iter().enumerate() {
        let gate = match peer.downloads_enabled {
            GateState::Enabled => "接收中",
            GateState::Disabled => "已关闭接收",
            GateState::Unknown => "状态未知",
        };
        println!(
            "   [{}] {} ({}, {}) - {}",
            i, peer.display_name, peer.address, peer.platform_label, gate
        );
    }
}

fn print_report(report: &SendReport) {
    for result in &report.results {
        match &result.status {
            PeerSendStatus::Succeeded => println!("   ✅ {}", result.target),
            PeerSendStatus::Skipped { reason } => println!("   ⏭️  {} ({})", result.target, reason),
            PeerSendStatus::Failed { reason } => println!("   ❌ {} ({})", result.target, reason),
        }
    }
    println!("{}", report);
}
