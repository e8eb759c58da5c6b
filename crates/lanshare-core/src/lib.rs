//! Lanshare Core Library
//!
//! 局域网设备发现、受开关控制的文件分发以及接收文件自动处理的核心实现库。
//!
//! # 模块
//!
//! - **discovery**: 主动扫描 (/24 TCP 探测) + 被动广播/监听，维护对端目录
//! - **transfer**: HTTP 上传/下载端点、下载开关、事件日志、发送端
//! - **dispatch**: 接收文件分类与处理（打开、执行脚本、外部工具宏）
//! - **ipc**: 守护进程与命令行之间的控制协议
//!
//! # 使用示例
//!
//! ## 发送文件
//!
//! ```ignore
//! use lanshare_core::{AppSettings, TransferClient, SimpleSendCallback};
//!
//! let settings = AppSettings::load();
//! let client = TransferClient::new(&settings)?;
//! let (callback, _events) = SimpleSendCallback::new();
//! let report = client
//!     .send_to_selected(Path::new("report.pdf"), &["192.168.1.20".into()], &callback)
//!     .await;
//! println!("{}", report.outcome());
//! ```
//!
//! ## 处理接收文件
//!
//! ```ignore
//! use lanshare_core::dispatch::{DispatchEngine, HostCapabilities, HttpEventSource, StorageWatch};
//!
//! let capabilities = HostCapabilities::detect(&settings);
//! let engine = DispatchEngine::new(&settings, capabilities, notices, cancel.clone());
//! let source = HttpEventSource::local(settings.transfer_port)?;
//! let watch = StorageWatch::start(&settings.storage_root).ok();
//! engine.run(&source, watch, cancel).await;
//! ```

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod transfer;

pub use config::AppSettings;
pub use error::{ConfigError, DispatchError, TransferError};
pub use logging::{LogEntry, LogLevel, NoticeSender};

// Discovery re-exports
pub use discovery::{
    DISCOVERY_PORT, DiscoveryMessage, DiscoveryService, GateState, LocalIdentity, NetworkScanner,
    PeerDirectory, PeerInfo, PeerRecord, PeerStatus, TRANSFER_PORT,
};

// Transfer re-exports
pub use transfer::{
    EventLog, GateStore, SendOutcome, SendProgressCallback, SendReport, SimpleSendCallback,
    TransferClient, TransferEvent, TransferServer,
};

// Dispatch re-exports
pub use dispatch::{DispatchEngine, FileClassification, classify};
