//! Node Service - 发现服务 + 传输服务 + 发送端

use anyhow::Result;
use futures_util::future::join_all;
use lanshare_core::discovery::DirectoryUpdate;
use lanshare_core::ipc::IpcResponse;
use lanshare_core::transfer::PeerSendResult;
use lanshare_core::{
    AppSettings, DiscoveryService, EventLog, GateStore, PeerRecord,
    SendProgressCallback, SendReport, TransferClient, TransferServer,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MERGE_WAIT_ATTEMPTS: usize = 20;
const MERGE_WAIT_STEP: Duration = Duration::from_millis(25);

/// 将发送进度写入日志
struct LogSendCallback;

impl SendProgressCallback for LogSendCallback {
    fn on_status(&self, status: &str) {
        tracing::debug!("{}", status);
    }

    fn on_peer_result(&self, result: &PeerSendResult) {
        tracing::info!("{}: {:?}", result.target, result.status);
    }

    fn on_complete(&self, report: &SendReport) {
        tracing::info!("发送完成: {}", report);
    }
}

pub struct NodeService {
    discovery: DiscoveryService,
    client: TransferClient,
    gate: GateStore,
    transfer_task: Mutex<Option<JoinHandle<()>>>,
}

impl NodeService {
    pub async fn start(settings: &AppSettings, cancel: CancellationToken) -> Result<Self> {
        tracing::info!("核心服务初始化...");

        let gate = GateStore::new(AppSettings::gate_file());
        let events = EventLog::new(AppSettings::event_log_file());
        tracing::info!(
            "下载开关: {:?}, 事件日志: {:?}",
            gate.path(),
            events.path()
        );

        let mut server = TransferServer::new(settings, gate.clone(), events);
        let (port, transfer_task) = server
            .start(
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.transfer_port)),
                cancel.clone(),
            )
            .await?;
        tracing::info!("传输服务已启动: 端口 {}", port);

        let discovery = DiscoveryService::start(settings, cancel).await?;
        let client = TransferClient::new(settings)?;

        Ok(Self {
            discovery,
            client,
            gate,
            transfer_task: Mutex::new(Some(transfer_task)),
        })
    }

    pub async fn status(&self) -> IpcResponse {
        let identity = self.discovery.identity();
        IpcResponse::Status {
            local_address: identity.address.to_string(),
            display_name: identity.display_name.clone(),
            platform_label: identity.platform_label.clone(),
            downloads_enabled: self.gate.is_enabled().await,
            peer_count: self.discovery.directory().len().await,
        }
    }

    /// 当前对端列表，每次都重新查询对端的下载开关
    pub async fn peers(&self) -> Vec<PeerRecord> {
        let peers = self.discovery.directory().snapshot().await;
        let targets: Vec<String> = peers.iter().map(|p| p.address.to_string()).collect();
        let states = join_all(targets.iter().map(|t| self.client.check_gate(t))).await;

        let updates = self.discovery.updates();
        let mut result = Vec::with_capacity(peers.len());
        for (mut peer, state) in peers.into_iter().zip(states) {
            let _ = updates
                .send(DirectoryUpdate::GateObserved {
                    address: peer.address,
                    state,
                })
                .await;
            peer.downloads_enabled = state;
            result.push(peer);
        }
        result
    }

    /// 手动扫描后返回完整列表
    pub async fn scan(&self) -> Vec<PeerRecord> {
        let found = self.discovery.rescan().await;
        tracing::info!("扫描发现 {} 个对端", found.len());

        // 扫描结果经队列异步合并，等它们出现在目录中
        let directory = self.discovery.directory();
        for _ in 0..MERGE_WAIT_ATTEMPTS {
            let mut all_merged = true;
            for peer in &found {
                if directory.get(peer.address).await.is_none() {
                    all_merged = false;
                    break;
                }
            }
            if all_merged {
                break;
            }
            tokio::time::sleep(MERGE_WAIT_STEP).await;
        }
        self.peers().await
    }

    pub async fn send(&self, file_path: &Path, targets: &[String]) -> SendReport {
        self.client
            .send_to_selected(file_path, targets, &LogSendCallback)
            .await
    }

    pub async fn send_all(&self, file_path: &Path) -> SendReport {
        self.client
            .send_to_all(file_path, self.discovery.directory(), &LogSendCallback)
            .await
    }

    pub async fn set_gate(&self, enabled: bool) -> Result<()> {
        self.gate.set_enabled(enabled).await?;
        Ok(())
    }

    /// 取消令牌触发后调用，等待后台任务退出
    pub async fn shutdown(&self) {
        self.discovery.shutdown().await;
        if let Some(task) = self.transfer_task.lock().await.take() {
            let _ = task.await;
        }
        tracing::info!("核心服务已停止");
    }
}
