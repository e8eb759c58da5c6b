//! 应用配置和持久化
//!
//! 提供存储目录、外部工具路径、端口等设置的存储和读取，
//! 以及两个服务共享的状态文件路径。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::{DISCOVERY_PORT, TRANSFER_PORT};
use crate::error::ConfigError;

/// 默认上传大小上限 (200 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

/// 结构上允许的最大上传上限
const MAX_UPLOAD_CEILING: u64 = 4 * 1024 * 1024 * 1024;

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 设备名称（在广播中显示）
    pub device_name: String,
    /// 接收文件的存储根目录
    pub storage_root: PathBuf,
    /// 外部 3D 创作工具可执行文件（用于 .ms 宏脚本）
    pub macro_tool_path: Option<PathBuf>,
    /// 数值计算引擎可执行文件（用于 .m 脚本）
    pub numeric_engine_path: Option<PathBuf>,
    /// 发现端口（TCP 探测 + UDP 广播）
    pub discovery_port: u16,
    /// 传输端口（HTTP）
    pub transfer_port: u16,
    /// 单次上传大小上限（字节）
    pub max_upload_bytes: u64,
    /// 存在广播间隔（秒）
    pub broadcast_interval_secs: u64,
    /// 连续错过多少次广播后视为离线
    pub stale_after_broadcasts: u32,
    /// 单个主机探测超时（毫秒）
    pub probe_timeout_ms: u64,
    /// 扫描并发数
    pub scan_concurrency: usize,
    /// 查询对端下载开关的超时（秒）
    pub gate_check_timeout_secs: u64,
    /// 上传超时（秒）
    pub upload_timeout_secs: u64,
    /// 宏脚本完成标志等待超时（秒）
    pub macro_watch_timeout_secs: u64,
    /// 事件日志轮询间隔（毫秒）
    pub event_poll_interval_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            storage_root: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lanshare"),
            macro_tool_path: None,
            numeric_engine_path: None,
            discovery_port: DISCOVERY_PORT,
            transfer_port: TRANSFER_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            broadcast_interval_secs: 10,
            stale_after_broadcasts: 3,
            probe_timeout_ms: 500,
            scan_concurrency: 20,
            gate_check_timeout_secs: 3,
            upload_timeout_secs: 300,
            macro_watch_timeout_secs: 600,
            event_poll_interval_ms: 1000,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lanshare")
            .join("settings.json")
    }

    /// 共享状态目录（事件日志、下载开关）
    pub fn state_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lanshare")
    }

    /// 下载开关标志文件
    pub fn gate_file() -> PathBuf {
        Self::state_dir().join("downloads_enabled.json")
    }

    /// 接收事件日志文件
    pub fn event_log_file() -> PathBuf {
        Self::state_dir().join("file_events.json")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 启动前校验
    ///
    /// 存储目录无法创建或上传上限无效时返回错误，调用方应中止启动。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_bytes == 0 || self.max_upload_bytes > MAX_UPLOAD_CEILING {
            return Err(ConfigError::InvalidUploadLimit(self.max_upload_bytes));
        }
        fs::create_dir_all(&self.storage_root).map_err(|source| ConfigError::StorageRoot {
            path: self.storage_root.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs.max(1))
    }

    /// 对端多久未出现后从目录中移除
    pub fn stale_after(&self) -> Duration {
        self.broadcast_interval() * self.stale_after_broadcasts.max(1)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn gate_check_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_check_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn macro_watch_timeout(&self) -> Duration {
        Duration::from_secs(self.macro_watch_timeout_secs)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms.max(50))
    }
}

/// 获取默认设备名称（主机名）
pub fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "lanshare".to_string())
}
