//! 接收文件分发模块
//!
//! 每个接收到的文件只处理一次：
//! 1. 按扩展名分类（[`classify`]，纯函数）
//! 2. 通过启动时构建的策略表选择执行策略
//! 3. 结果以 [`LogEntry`](crate::logging::LogEntry) 通知用户，失败不会中止引擎

pub mod capabilities;
pub mod engine;
pub mod fs_watch;
pub mod launcher;
pub mod macro_watch;
pub mod strategy;

pub use capabilities::{HostCapabilities, HostPlatform};
pub use engine::{
    DispatchEngine, EventSource, HttpEventSource, LocalEventSource, SourceMerge, plan_batch,
};
pub use fs_watch::StorageWatch;
pub use launcher::{LaunchCommand, ProcessLauncher, SystemLauncher};
pub use strategy::{ExecutionStrategy, StrategyTable};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// 接收文件分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileClassification {
    Document,
    ShellScript,
    BatchScript,
    PowerShellScript,
    VBScript,
    /// 需要外部 3D 创作工具
    MacroScript,
    /// 需要数值计算引擎，不可用时按文档打开
    NumericScript,
}

impl FileClassification {
    /// 除 Document 外都视为脚本
    pub fn is_script(&self) -> bool {
        !matches!(self, FileClassification::Document)
    }
}

impl fmt::Display for FileClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileClassification::Document => "Document",
            FileClassification::ShellScript => "Shell",
            FileClassification::BatchScript => "Batch",
            FileClassification::PowerShellScript => "PowerShell",
            FileClassification::VBScript => "VBScript",
            FileClassification::MacroScript => "Macro",
            FileClassification::NumericScript => "Numeric",
        };
        f.write_str(name)
    }
}

/// 按扩展名分类（不区分大小写）
pub fn classify(file_name: impl AsRef<Path>) -> FileClassification {
    let ext = file_name
        .as_ref()
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "sh" | "bash" => FileClassification::ShellScript,
        "bat" | "cmd" => FileClassification::BatchScript,
        "ps1" => FileClassification::PowerShellScript,
        "vbs" => FileClassification::VBScript,
        "ms" => FileClassification::MacroScript,
        "m" => FileClassification::NumericScript,
        _ => FileClassification::Document,
    }
}
