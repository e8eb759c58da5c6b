//! 设备发现模块
//!
//! 双策略发现：
//! - 主动扫描：对本机所在 /24 网段并发 TCP 探测发现端口
//! - 被动发现：周期性 UDP 广播自身信息，同时监听其他节点的广播
//!
//! 两条路径的结果都经由同一个队列合并进 [`PeerDirectory`]。

pub mod beacon;
pub mod directory;
pub mod identify;
pub mod network;
pub mod presence;
pub mod scanner;
pub mod service;

pub use beacon::{BeaconInfo, serve_beacon};
pub use directory::{DirectoryUpdate, PeerDirectory};
pub use identify::{PeerIdentifier, PeerInfo};
pub use network::{ScanRange, compute_scan_range, resolve_local_address};
pub use scanner::{NetworkScanner, ScanCallback};
pub use service::DiscoveryService;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::config::AppSettings;

/// 发现端口：TCP 探测目标 + UDP 广播端口
pub const DISCOVERY_PORT: u16 = 8501;
/// 传输端口：HTTP 上传/下载
pub const TRANSFER_PORT: u16 = 8502;

/// 平台无法确定时的标签
pub const UNKNOWN_PLATFORM: &str = "Unknown";

/// 对端在线状态
///
/// 只建模 Online，目录中不存在即表示状态未知。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Online,
}

/// 对端下载开关状态（每次按需查询，不跨检查缓存）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Enabled,
    Disabled,
    #[default]
    Unknown,
}

impl From<bool> for GateState {
    fn from(enabled: bool) -> Self {
        if enabled {
            GateState::Enabled
        } else {
            GateState::Disabled
        }
    }
}

/// 已知对端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub address: Ipv4Addr,
    pub display_name: String,
    pub platform_label: String,
    pub status: PeerStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub downloads_enabled: GateState,
}

impl PeerRecord {
    pub fn online(address: Ipv4Addr, info: PeerInfo) -> Self {
        Self {
            address,
            display_name: info.display_name,
            platform_label: info.platform_label,
            status: PeerStatus::Online,
            last_seen: Utc::now(),
            downloads_enabled: GateState::Unknown,
        }
    }
}

/// 本机身份（用于广播和信标）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub address: Ipv4Addr,
    pub display_name: String,
    pub platform_label: String,
}

impl LocalIdentity {
    pub fn detect(settings: &AppSettings) -> Self {
        Self {
            address: resolve_local_address(),
            display_name: settings.device_name.clone(),
            platform_label: local_platform_label().to_string(),
        }
    }
}

/// 本机操作系统标签
pub fn local_platform_label() -> &'static str {
    match std::env::consts::OS {
        "windows" => "Windows",
        "macos" => "macOS",
        "linux" => "Linux",
        "freebsd" | "openbsd" | "netbsd" => "BSD",
        _ => UNKNOWN_PLATFORM,
    }
}

/// 存在广播载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceAnnouncement {
    pub address: Ipv4Addr,
    pub display_name: String,
    pub platform: String,
    pub timestamp: DateTime<Utc>,
}

/// UDP 广播消息
///
/// 格式: `{"type":"presence","address":...,"display_name":...,"platform":...,"timestamp":...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryMessage {
    Presence(PresenceAnnouncement),
}

impl DiscoveryMessage {
    pub fn presence(identity: &LocalIdentity) -> Self {
        DiscoveryMessage::Presence(PresenceAnnouncement {
            address: identity.address,
            display_name: identity.display_name.clone(),
            platform: identity.platform_label.clone(),
            timestamp: Utc::now(),
        })
    }

    /// 解析数据报，格式错误返回 None
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        serde_json::from_slice(datagram).ok()
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn address(&self) -> Ipv4Addr {
        match self {
            DiscoveryMessage::Presence(p) => p.address,
        }
    }

    /// 转为目录条目，last_seen 取接收时刻
    pub fn into_peer_record(self) -> PeerRecord {
        match self {
            DiscoveryMessage::Presence(p) => {
                let display_name = if p.display_name.trim().is_empty() {
                    p.address.to_string()
                } else {
                    p.display_name
                };
                let platform_label = if p.platform.trim().is_empty() {
                    UNKNOWN_PLATFORM.to_string()
                } else {
                    p.platform
                };
                PeerRecord::online(
                    p.address,
                    PeerInfo {
                        display_name,
                        platform_label,
                    },
                )
            }
        }
    }
}
