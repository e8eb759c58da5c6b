//! 对端目录
//!
//! 任何任务都可以读取快照；写入只发生在单一消费者任务中，
//! 扫描结果和广播监听结果都通过 [`DirectoryUpdate`] 队列送达。

use log::{debug, info};

use chrono::Utc;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{GateState, PeerRecord};

/// 队列容量
pub const UPDATE_QUEUE_CAPACITY: usize = 256;

/// 目录更新操作
#[derive(Debug, Clone)]
pub enum DirectoryUpdate {
    /// 插入或覆盖
    Merge(PeerRecord),
    /// 记录一次下载开关查询结果
    GateObserved { address: Ipv4Addr, state: GateState },
    /// 移除超过 TTL 未出现的对端
    EvictStale(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: Arc<RwLock<HashMap<Ipv4Addr, PeerRecord>>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建更新队列
    pub fn update_channel() -> (mpsc::Sender<DirectoryUpdate>, mpsc::Receiver<DirectoryUpdate>) {
        mpsc::channel(UPDATE_QUEUE_CAPACITY)
    }

    /// 按地址排序的快照
    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().await;
        let mut list: Vec<PeerRecord> = peers.values().cloned().collect();
        list.sort_by_key(|p| p.address);
        list
    }

    pub async fn get(&self, address: Ipv4Addr) -> Option<PeerRecord> {
        self.peers.read().await.get(&address).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// 启动唯一的写入任务
    pub fn spawn_consumer(
        &self,
        mut rx: mpsc::Receiver<DirectoryUpdate>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let directory = self.clone();
        tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = rx.recv() => match update {
                        Some(update) => update,
                        None => break,
                    },
                };
                directory.apply(update).await;
            }
            debug!("Peer directory consumer stopped");
        })
    }

    async fn apply(&self, update: DirectoryUpdate) {
        match update {
            DirectoryUpdate::Merge(record) => self.merge_into_directory(record).await,
            DirectoryUpdate::GateObserved { address, state } => {
                if let Some(peer) = self.peers.write().await.get_mut(&address) {
                    peer.downloads_enabled = state;
                }
            }
            DirectoryUpdate::EvictStale(ttl) => {
                self.evict_stale(ttl).await;
            }
        }
    }

    /// 按地址插入或覆盖，last_seen 始终取较新者
    pub(crate) async fn merge_into_directory(&self, mut record: PeerRecord) {
        let mut peers = self.peers.write().await;
        match peers.get(&record.address) {
            Some(existing) => {
                if existing.last_seen > record.last_seen {
                    record.last_seen = existing.last_seen;
                }
                debug!("Refreshed peer {} ({})", record.address, record.display_name);
            }
            None => {
                info!(
                    "New peer {} ({}, {})",
                    record.address, record.display_name, record.platform_label
                );
            }
        }
        peers.insert(record.address, record);
    }

    /// 移除超过 ttl 未出现的对端，返回被移除的地址
    pub(crate) async fn evict_stale(&self, ttl: Duration) -> Vec<Ipv4Addr> {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - ttl;

        let mut peers = self.peers.write().await;
        let stale: Vec<Ipv4Addr> = peers
            .values()
            .filter(|p| p.last_seen < cutoff)
            .map(|p| p.address)
            .collect();
        for address in &stale {
            peers.remove(address);
            info!("Evicted stale peer {}", address);
        }
        stale
    }
}
