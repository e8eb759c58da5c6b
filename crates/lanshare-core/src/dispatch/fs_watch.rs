//! 存储根目录的文件系统监视
//!
//! 不经过 `/upload` 落到根目录里的文件（手工拷贝、其他程序写入）也要分发。
//! 监视器只报告新出现的文件路径，是否分发由引擎在合并两路来源后决定。

use log::{debug, info, warn};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path};
use tokio::sync::mpsc;

use super::strategy::is_macro_artifact;

/// 传输服务内部使用的临时文件前缀（上传临时文件、解压暂存目录）
const INTERNAL_PREFIX: &str = ".lanshare-";

/// 存储根目录监视器，丢弃即停止监视
pub struct StorageWatch {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<String>,
}

impl StorageWatch {
    /// 开始递归监视存储根目录，目录不存在时先创建
    pub fn start(root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        let (tx, rx) = mpsc::unbounded_channel();
        let watch_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for name in created_files(&watch_root, &event) {
                        debug!("Watch saw new file {}", name);
                        let _ = tx.send(name);
                    }
                }
                Err(e) => warn!("Storage watch error: {}", e),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching storage root {:?}", root);

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// 下一个新文件的相对路径；监视器失效时返回 None
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// 从事件中提取新出现的文件，返回相对根目录、以 `/` 分隔的路径
fn created_files(root: &Path, event: &Event) -> Vec<String> {
    let path = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => event.paths.first(),
        // 上传和解压都以改名落到最终位置
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => {
            event.paths.first()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.last(),
        _ => None,
    };

    path.and_then(|p| relative_name(root, p)).into_iter().collect()
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        let Component::Normal(segment) = component else {
            return None;
        };
        let segment = segment.to_str()?;
        if segment.starts_with(INTERNAL_PREFIX) {
            return None;
        }
        segments.push(segment);
    }
    // 宏包装脚本和完成标记由本进程自己生成
    match segments.last() {
        None => None,
        Some(last) if is_macro_artifact(last) => None,
        Some(_) => Some(segments.join("/")),
    }
}
