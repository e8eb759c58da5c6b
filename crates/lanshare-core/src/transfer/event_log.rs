//! 接收事件日志
//!
//! JSON 数组文件，读取即清空（排空队列，不是审计日志）。

use log::{debug, warn};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::TransferEvent;
use super::state_file::{read_json, write_json_atomic};

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加事件
    pub async fn append(&self, events: &[TransferEvent]) -> io::Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut all = self.load().await;
        all.extend_from_slice(events);
        write_json_atomic(&self.path, &all).await?;
        debug!("Queued {} event(s), {} pending", events.len(), all.len());
        Ok(())
    }

    /// 取出全部事件并清空
    pub async fn drain(&self) -> io::Result<Vec<TransferEvent>> {
        let _guard = self.lock.lock().await;
        let events = self.load().await;
        if !events.is_empty() {
            write_json_atomic(&self.path, &Vec::<TransferEvent>::new()).await?;
        }
        Ok(events)
    }

    async fn load(&self) -> Vec<TransferEvent> {
        match read_json::<Vec<TransferEvent>>(&self.path).await {
            Ok(events) => events.unwrap_or_default(),
            Err(e) => {
                warn!("Discarding unreadable event log {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_returns_events_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("file_events.json"));

        log.append(&[TransferEvent::received("a.txt", false)])
            .await
            .unwrap();
        log.append(&[
            TransferEvent::received("pack/b.txt", true),
            TransferEvent::received("pack/c.txt", true),
        ])
        .await
        .unwrap();

        let first = log.drain().await.unwrap();
        let names: Vec<_> = first.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "pack/b.txt", "pack/c.txt"]);

        assert!(log.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("file_events.json"));

        let mut handles = Vec::new();
        for i in 0..16 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(&[TransferEvent::received(format!("f{}.txt", i), false)])
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(log.drain().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_corrupt_log_drains_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file_events.json");
        std::fs::write(&path, b"[{").unwrap();
        let log = EventLog::new(&path);
        assert!(log.drain().await.unwrap().is_empty());
    }
}
