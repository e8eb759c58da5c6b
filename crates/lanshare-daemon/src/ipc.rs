//! IPC Server - Unix Domain Socket 通信

use anyhow::Result;
use lanshare_core::ipc::{IpcRequest, IpcResponse, socket_path};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::service::NodeService;

pub async fn run_ipc_server(node: Arc<NodeService>, cancel: CancellationToken) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC 服务器已启动: {:?}", path);

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, _)) => {
                let node = node.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, node, cancel).await {
                        tracing::debug!("IPC 连接结束: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("接受连接失败: {}", e);
            }
        }
    }

    let _ = std::fs::remove_file(&path);
    Ok(())
}

async fn handle_client(
    stream: UnixStream,
    node: Arc<NodeService>,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => {
                tracing::debug!("收到请求: {:?}", request);
                handle_request(request, &node, &cancel).await
            }
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        writer
            .write_all(serde_json::to_string(&response)?.as_bytes())
            .await?;
        writer.write_all(b"\n").await?;
        line.clear();
    }

    Ok(())
}

async fn handle_request(
    request: IpcRequest,
    node: &NodeService,
    cancel: &CancellationToken,
) -> IpcResponse {
    match request {
        IpcRequest::Status => node.status().await,
        IpcRequest::Peers => IpcResponse::Peers {
            peers: node.peers().await,
        },
        IpcRequest::Scan => {
            tracing::info!("开始扫描局域网...");
            IpcResponse::Peers {
                peers: node.scan().await,
            }
        }
        IpcRequest::Send { file_path, targets } => {
            tracing::info!("发送文件: {} -> {:?}", file_path, targets);
            match check_file(&file_path) {
                Ok(()) => IpcResponse::SendReport {
                    report: node.send(Path::new(&file_path), &targets).await,
                },
                Err(resp) => resp,
            }
        }
        IpcRequest::SendAll { file_path } => {
            tracing::info!("发送文件到所有对端: {}", file_path);
            match check_file(&file_path) {
                Ok(()) => IpcResponse::SendReport {
                    report: node.send_all(Path::new(&file_path)).await,
                },
                Err(resp) => resp,
            }
        }
        IpcRequest::SetGate { enabled } => match node.set_gate(enabled).await {
            Ok(()) => IpcResponse::Ok {
                message: if enabled {
                    "Downloads enabled".to_string()
                } else {
                    "Downloads disabled".to_string()
                },
            },
            Err(e) => IpcResponse::Error {
                message: format!("Failed to update downloads gate: {}", e),
            },
        },
        IpcRequest::Stop => {
            tracing::info!("收到停止请求");
            cancel.cancel();
            IpcResponse::Ok {
                message: "Daemon stopping".to_string(),
            }
        }
    }
}

fn check_file(file_path: &str) -> std::result::Result<(), IpcResponse> {
    if Path::new(file_path).is_file() {
        Ok(())
    } else {
        Err(IpcResponse::Error {
            message: format!("File not found: {}", file_path),
        })
    }
}
