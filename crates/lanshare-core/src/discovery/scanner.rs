//! Network Scanner - 主动发现局域网内的 lanshare 节点
//!
//! 枚举本机所在 /24 网段，并发对每个地址的发现端口做短超时 TCP 连接探测。
//!
//! # 探测流程
//!
//! 1. TCP 连接发现端口（默认 500ms 超时）
//! 2. 连接成功后识别主机名和平台（见 [`PeerIdentifier`]）
//! 3. 任何一步失败都只影响当前地址，不会中断扫描

use log::{debug, info, trace};

use futures_util::StreamExt;
use futures_util::stream;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use super::identify::PeerIdentifier;
use super::network::compute_scan_range;
use super::PeerRecord;
use crate::config::AppSettings;

/// 扫描回调接口，用于实时汇报发现的设备
#[async_trait::async_trait]
pub trait ScanCallback: Send + Sync {
    async fn on_peer_found(&self, peer: PeerRecord);
}

pub struct NetworkScanner {
    port: u16,
    timeout: Duration,
    concurrency: usize,
    identifier: PeerIdentifier,
}

impl NetworkScanner {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            port: settings.discovery_port,
            timeout: settings.probe_timeout(),
            concurrency: settings.scan_concurrency.max(1),
            identifier: PeerIdentifier::new(
                settings.discovery_port,
                settings.transfer_port,
                settings.probe_timeout() * 2,
            ),
        }
    }

    /// 探测单个地址
    ///
    /// 发现端口无人监听时在超时内返回 None，从不报错。
    pub async fn probe_peer(&self, address: Ipv4Addr) -> Option<PeerRecord> {
        match tokio::time::timeout(self.timeout, TcpStream::connect((address, self.port))).await {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => {
                trace!("Probe {}:{} refused: {}", address, self.port, e);
                return None;
            }
            Err(_) => {
                trace!("Probe {}:{} timed out", address, self.port);
                return None;
            }
        }

        debug!("Discovery port open on {}", address);
        let info = self.identifier.identify_peer(address).await;
        Some(PeerRecord::online(address, info))
    }

    /// 扫描本机所在网段
    ///
    /// 结果顺序为并发完成顺序，不保证有序。
    pub async fn scan_network(
        &self,
        local: Ipv4Addr,
        callback: Option<Arc<dyn ScanCallback>>,
    ) -> Vec<PeerRecord> {
        let range = compute_scan_range(local);
        let targets = range.scan_targets(local);

        info!(
            "Scanning {} ({} hosts, {} concurrent probes)",
            range,
            targets.len(),
            self.concurrency
        );

        let mut probes = stream::iter(targets)
            .map(|address| self.probe_peer(address))
            .buffer_unordered(self.concurrency);

        let mut peers = Vec::new();
        while let Some(result) = probes.next().await {
            if let Some(peer) = result {
                // 实时汇报
                if let Some(ref cb) = callback {
                    cb.on_peer_found(peer.clone()).await;
                }
                peers.push(peer);
            }
        }

        info!("Scan complete: found {} peer(s)", peers.len());
        peers
    }
}
