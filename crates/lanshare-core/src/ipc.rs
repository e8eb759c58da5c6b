//! 守护进程控制协议
//!
//! Unix Domain Socket 上的换行分隔 JSON，一行一个请求 / 响应。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::discovery::PeerRecord;
use crate::transfer::SendReport;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("lanshare.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "scan")]
    Scan,
    #[serde(rename = "peers")]
    Peers,
    #[serde(rename = "send")]
    Send {
        file_path: String,
        targets: Vec<String>,
    },
    #[serde(rename = "send_all")]
    SendAll { file_path: String },
    #[serde(rename = "set_gate")]
    SetGate { enabled: bool },
    #[serde(rename = "stop")]
    Stop,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "peers")]
    Peers { peers: Vec<PeerRecord> },
    #[serde(rename = "send_report")]
    SendReport { report: SendReport },
    #[serde(rename = "status")]
    Status {
        local_address: String,
        display_name: String,
        platform_label: String,
        downloads_enabled: bool,
        peer_count: usize,
    },
}
