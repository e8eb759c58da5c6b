//! 主机能力探测
//!
//! 启动时探测一次，策略表据此选择各分类的执行方式。

use log::{debug, info};

use std::env;
use std::path::{Path, PathBuf};

use crate::config::AppSettings;

/// Linux 终端模拟器，按优先级排列
pub const LINUX_TERMINALS: &[&str] = &[
    "x-terminal-emulator",
    "gnome-terminal",
    "konsole",
    "xfce4-terminal",
    "xterm",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            HostPlatform::Windows
        } else if cfg!(target_os = "macos") {
            HostPlatform::MacOs
        } else if cfg!(target_os = "linux") {
            HostPlatform::Linux
        } else {
            HostPlatform::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCapabilities {
    pub platform: HostPlatform,
    /// 可用的终端模拟器（Linux）
    pub terminal: Option<String>,
    /// 可用的 POSIX shell（Windows 上运行 .sh 用）
    pub posix_shell: Option<PathBuf>,
    /// 配置的外部宏工具路径（是否存在在执行时检查）
    pub macro_tool: Option<PathBuf>,
    /// 可用的数值计算引擎
    pub numeric_engine: Option<PathBuf>,
}

impl HostCapabilities {
    pub fn detect(settings: &AppSettings) -> Self {
        let platform = HostPlatform::current();

        let terminal = match platform {
            HostPlatform::Linux | HostPlatform::Other => LINUX_TERMINALS
                .iter()
                .find(|t| find_in_path(t).is_some())
                .map(|t| t.to_string()),
            _ => None,
        };

        let posix_shell = match platform {
            HostPlatform::Windows => find_in_path("bash"),
            _ => None,
        };

        let numeric_engine = settings.numeric_engine_path.as_ref().and_then(|p| {
            let resolved = find_in_path(p);
            if resolved.is_none() {
                info!("Numeric engine {:?} not available, .m files will be opened", p);
            }
            resolved
        });

        let caps = Self {
            platform,
            terminal,
            posix_shell,
            macro_tool: settings.macro_tool_path.clone(),
            numeric_engine,
        };
        debug!("Host capabilities: {:?}", caps);
        caps
    }
}

/// 在 PATH 中查找可执行文件；带目录的路径直接检查是否存在
pub fn find_in_path(program: impl AsRef<Path>) -> Option<PathBuf> {
    let program = program.as_ref();
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    for dir in env::split_paths(&paths) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}
