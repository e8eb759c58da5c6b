//! 宏执行完成监视
//!
//! 外部工具执行完宏后由包装脚本写入完成标记文件；监视任务轮询该文件，
//! 看到标记、超时或被取消时删除包装脚本和标记文件。

use log::{debug, info, warn};

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 监视结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    Completed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct MacroWatch {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl MacroWatch {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout,
            cancel,
        }
    }

    pub fn spawn(&self, wrapper: PathBuf, flag: PathBuf) -> JoinHandle<WatchEnd> {
        let watch = self.clone();
        tokio::spawn(async move { watch.run(&wrapper, &flag).await })
    }

    async fn run(&self, wrapper: &Path, flag: &Path) -> WatchEnd {
        let deadline = Instant::now() + self.timeout;

        let end = loop {
            if flag.exists() {
                break WatchEnd::Completed;
            }
            if Instant::now() >= deadline {
                break WatchEnd::TimedOut;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break WatchEnd::Cancelled,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        match end {
            WatchEnd::Completed => info!("Macro finished: {:?}", wrapper),
            WatchEnd::TimedOut => warn!(
                "Macro did not finish within {}s, cleaning up {:?}",
                self.timeout.as_secs(),
                wrapper
            ),
            WatchEnd::Cancelled => debug!("Macro watch cancelled: {:?}", wrapper),
        }

        remove_if_present(wrapper);
        remove_if_present(flag);
        end
    }
}

fn remove_if_present(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!("Failed to remove {:?}: {}", path, e);
    }
}
