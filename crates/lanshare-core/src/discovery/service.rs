//! 发现服务
//!
//! 组合信标、广播、监听、目录写入任务和首次扫描，全部挂在同一个取消令牌下。

use log::{debug, info, warn};

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::beacon::serve_beacon;
use super::directory::{DirectoryUpdate, PeerDirectory};
use super::presence::{run_broadcast_loop, run_listen_loop};
use super::scanner::{NetworkScanner, ScanCallback};
use super::{LocalIdentity, PeerRecord};
use crate::config::AppSettings;

/// 将扫描结果排入目录队列
struct QueueCallback {
    updates: mpsc::Sender<DirectoryUpdate>,
}

#[async_trait::async_trait]
impl ScanCallback for QueueCallback {
    async fn on_peer_found(&self, peer: PeerRecord) {
        let _ = self.updates.send(DirectoryUpdate::Merge(peer)).await;
    }
}

pub struct DiscoveryService {
    identity: LocalIdentity,
    directory: PeerDirectory,
    updates: mpsc::Sender<DirectoryUpdate>,
    scanner: Arc<NetworkScanner>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// 启动所有发现任务
    ///
    /// 发现端口的 TCP 信标绑定失败时返回错误；其余任务内部处理瞬时错误。
    pub async fn start(settings: &AppSettings, cancel: CancellationToken) -> anyhow::Result<Self> {
        let identity = LocalIdentity::detect(settings);
        info!(
            "Local identity: {} ({}, {})",
            identity.address, identity.display_name, identity.platform_label
        );

        let beacon_listener = TcpListener::bind(SocketAddr::from((
            Ipv4Addr::UNSPECIFIED,
            settings.discovery_port,
        )))
        .await?;

        Self::start_with(settings, identity, beacon_listener, cancel)
    }

    /// 使用给定身份和已绑定的信标监听器启动
    pub fn start_with(
        settings: &AppSettings,
        identity: LocalIdentity,
        beacon_listener: TcpListener,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let directory = PeerDirectory::new();
        let (updates, rx) = PeerDirectory::update_channel();
        let scanner = Arc::new(NetworkScanner::new(settings));

        let mut tasks = Vec::new();
        tasks.push(directory.spawn_consumer(rx, cancel.clone()));

        let beacon_identity = identity.clone();
        let beacon_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_beacon(beacon_listener, beacon_identity, beacon_cancel).await {
                warn!("Discovery beacon stopped: {}", e);
            }
        }));

        tasks.push(tokio::spawn(run_broadcast_loop(
            cancel.clone(),
            identity.clone(),
            settings.discovery_port,
            settings.broadcast_interval(),
        )));

        tasks.push(tokio::spawn(run_listen_loop(
            cancel.clone(),
            settings.discovery_port,
            identity.address,
            updates.clone(),
        )));

        tasks.push(tokio::spawn(run_eviction_loop(
            cancel.clone(),
            updates.clone(),
            settings.broadcast_interval(),
            settings.stale_after(),
        )));

        let service = Self {
            identity,
            directory,
            updates,
            scanner,
            cancel,
            tasks: Mutex::new(tasks),
        };

        // 首次扫描，不等广播周期
        let scanner = service.scanner.clone();
        let local = service.identity.address;
        let callback: Arc<dyn ScanCallback> = Arc::new(QueueCallback {
            updates: service.updates.clone(),
        });
        let scan_cancel = service.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = scan_cancel.cancelled() => {}
                _ = scanner.scan_network(local, Some(callback)) => {}
            }
        });

        Ok(service)
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// 目录队列发送端（用于记录下载开关查询结果等）
    pub fn updates(&self) -> mpsc::Sender<DirectoryUpdate> {
        self.updates.clone()
    }

    /// 手动重新扫描，结果经同一队列合并，返回本次发现的对端
    pub async fn rescan(&self) -> Vec<PeerRecord> {
        let callback: Arc<dyn ScanCallback> = Arc::new(QueueCallback {
            updates: self.updates.clone(),
        });
        self.scanner
            .scan_network(self.identity.address, Some(callback))
            .await
    }

    /// 取消所有后台任务并等待退出
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            let _ = task.await;
        }
        debug!("Discovery service stopped");
    }
}

/// 每个广播周期清理一次过期对端
async fn run_eviction_loop(
    cancel: CancellationToken,
    updates: mpsc::Sender<DirectoryUpdate>,
    interval: Duration,
    ttl: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if updates.send(DirectoryUpdate::EvictStale(ttl)).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryMessage, PresenceAnnouncement};
    use chrono::Utc;

    #[tokio::test]
    async fn test_service_merges_presence_and_shuts_down() {
        let beacon = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = beacon.local_addr().unwrap().port();
        let settings = AppSettings {
            discovery_port: port,
            transfer_port: port,
            broadcast_interval_secs: 1,
            probe_timeout_ms: 100,
            ..Default::default()
        };
        let identity = LocalIdentity {
            address: Ipv4Addr::LOCALHOST,
            display_name: "self".to_string(),
            platform_label: "Linux".to_string(),
        };

        let cancel = CancellationToken::new();
        let service = DiscoveryService::start_with(&settings, identity, beacon, cancel).unwrap();

        let peer = Ipv4Addr::new(10, 77, 0, 9);
        let payload = DiscoveryMessage::Presence(PresenceAnnouncement {
            address: peer,
            display_name: "workstation".to_string(),
            platform: "Windows".to_string(),
            timestamp: Utc::now(),
        })
        .encode()
        .unwrap();
        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut found = None;
        for _ in 0..50 {
            sender.send_to(&payload, ("127.0.0.1", port)).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            found = service.directory().get(peer).await;
            if found.is_some() {
                break;
            }
        }
        assert_eq!(found.unwrap().display_name, "workstation");

        tokio::time::timeout(Duration::from_secs(5), service.shutdown())
            .await
            .unwrap();
    }
}
