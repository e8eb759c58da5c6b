//! 错误类型

use std::path::PathBuf;

/// 启动期配置错误（致命）
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Storage root {path:?} cannot be created: {source}")]
    StorageRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid max upload size: {0} bytes")]
    InvalidUploadLimit(u64),
}

/// 上传处理错误
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Downloads are currently disabled")]
    GateDisabled,

    #[error("No file part")]
    MissingFile,

    #[error("No selected file")]
    EmptyFilename,

    #[error("Invalid file name: {0}")]
    InvalidFilename(String),

    #[error("Payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Invalid multipart body: {0}")]
    Multipart(String),

    #[error("Failed to upload file: {0}")]
    Io(#[from] std::io::Error),
}

/// 接收文件分发错误
///
/// 分发失败只影响单个文件，不会中止分发引擎。
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No terminal emulator or shell found to run {0:?}")]
    NoTerminal(PathBuf),

    #[error("External macro tool is not configured")]
    ToolNotConfigured,

    #[error("External macro tool not found at {0:?}")]
    ToolMissing(PathBuf),

    #[error("{0} scripts are not supported on this platform")]
    UnsupportedPlatform(&'static str),

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),
}
