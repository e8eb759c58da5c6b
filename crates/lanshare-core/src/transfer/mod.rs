//! 文件传输模块
//!
//! 包含:
//! - HTTP 传输服务（上传 / 下载开关查询 / 事件拉取 / 下载）
//! - 下载开关与接收事件日志（守护进程独占写入的 JSON 状态文件）
//! - 发送端：先查询对端开关，再逐个推送

pub mod event_log;
pub mod gate;
pub mod sender;
pub mod server;
pub mod storage;

mod state_file;

pub use event_log::EventLog;
pub use gate::GateStore;
pub use sender::{
    PeerSendResult, PeerSendStatus, SendEvent, SendOutcome, SendProgressCallback, SendReport,
    SimpleSendCallback, TransferClient,
};
pub use server::TransferServer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "file_received")]
    FileReceived,
}

/// 接收事件：每个落盘文件一条（压缩包按成员计）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// 相对存储根目录的路径，使用 `/` 分隔
    #[serde(rename = "filename")]
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub extracted_from_archive: bool,
}

impl TransferEvent {
    pub fn received(file_name: impl Into<String>, extracted_from_archive: bool) -> Self {
        Self {
            kind: EventKind::FileReceived,
            file_name: file_name.into(),
            timestamp: Utc::now(),
            extracted_from_archive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = TransferEvent::received("docs/plan.pdf", false);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file_received");
        assert_eq!(json["filename"], "docs/plan.pdf");
        assert_eq!(json["extracted_from_archive"], false);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_event_without_archive_flag_parses() {
        let event: TransferEvent = serde_json::from_str(
            r#"{"type":"file_received","filename":"a.txt","timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(event.file_name, "a.txt");
        assert!(!event.extracted_from_archive);
    }
}
