//! 下载开关
//!
//! 持久化为 `{ "downloads_enabled": bool }`。从未设置过时视为开启，
//! 文件存在却读不出来时视为关闭。

use log::{info, warn};

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::state_file::{read_json, write_json_atomic};

#[derive(Debug, Serialize, Deserialize)]
struct GateFile {
    downloads_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct GateStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl GateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 当前开关状态
    ///
    /// 文件缺失时为开启；文件损坏时记录警告并按关闭处理。
    pub async fn is_enabled(&self) -> bool {
        let _guard = self.lock.lock().await;
        match read_json::<GateFile>(&self.path).await {
            Ok(Some(file)) => file.downloads_enabled,
            Ok(None) => true,
            Err(e) => {
                warn!("Unreadable gate file {:?}, refusing uploads: {}", self.path, e);
                false
            }
        }
    }

    pub async fn set_enabled(&self, enabled: bool) -> io::Result<()> {
        let _guard = self.lock.lock().await;
        write_json_atomic(
            &self.path,
            &GateFile {
                downloads_enabled: enabled,
            },
        )
        .await?;
        info!(
            "Downloads {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_defaults_to_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let gate = GateStore::new(dir.path().join("downloads_enabled.json"));
        assert!(gate.is_enabled().await);
    }

    #[tokio::test]
    async fn test_gate_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads_enabled.json");

        GateStore::new(&path).set_enabled(false).await.unwrap();
        assert!(!GateStore::new(&path).is_enabled().await);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["downloads_enabled"], false);
    }

    #[tokio::test]
    async fn test_corrupt_gate_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads_enabled.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let gate = GateStore::new(&path);
        assert!(!gate.is_enabled().await);

        // 重新设置后恢复正常
        gate.set_enabled(true).await.unwrap();
        assert!(gate.is_enabled().await);
    }
}
