//! 分发引擎
//!
//! 周期性从事件源取出一批接收事件，对批内每个文件执行一次分发。
//! 同时可以监视存储根目录：监视到的新文件先等待一小段时间，
//! 期间事件日志报告过的同名文件不再重复分发。
//!
//! # 抑制规则
//!
//! 同一批次中只要有压缩包解出的文件或任何脚本，批内的普通文档就不自动打开，
//! 避免解压后弹出大量窗口；脚本本身照常执行。

use log::{debug, info, warn};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::capabilities::HostCapabilities;
use super::fs_watch::StorageWatch;
use super::launcher::{ProcessLauncher, SystemLauncher};
use super::macro_watch::MacroWatch;
use super::strategy::StrategyTable;
use super::{FileClassification, classify};
use crate::config::AppSettings;
use crate::logging::{LogEntry, NoticeSender};
use crate::transfer::{EventLog, TransferEvent};

/// 接收事件来源
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// 取出（并清空）待处理事件
    async fn fetch(&self) -> anyhow::Result<Vec<TransferEvent>>;
}

/// 通过守护进程的 `/check_events` 拉取
pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
}

#[derive(serde::Deserialize)]
struct EventsBody {
    #[serde(default)]
    events: Vec<TransferEvent>,
}

impl HttpEventSource {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/check_events", base_url.trim_end_matches('/')),
        })
    }

    /// 本机守护进程
    pub fn local(port: u16) -> anyhow::Result<Self> {
        Self::new(&format!("http://127.0.0.1:{}", port))
    }
}

#[async_trait::async_trait]
impl EventSource for HttpEventSource {
    async fn fetch(&self) -> anyhow::Result<Vec<TransferEvent>> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("check_events returned {}", response.status());
        }
        let body: EventsBody = response.json().await?;
        Ok(body.events)
    }
}

/// 直接排空本进程持有的事件日志
pub struct LocalEventSource {
    log: EventLog,
}

impl LocalEventSource {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

#[async_trait::async_trait]
impl EventSource for LocalEventSource {
    async fn fetch(&self) -> anyhow::Result<Vec<TransferEvent>> {
        Ok(self.log.drain().await?)
    }
}

/// 批内单个文件的处理计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDispatch {
    pub file_name: String,
    pub classification: FileClassification,
    /// 被抑制的文档只通知，不打开
    pub suppressed: bool,
}

/// 为一批事件制定处理计划：去重并应用抑制规则
pub fn plan_batch(events: &[TransferEvent]) -> Vec<PlannedDispatch> {
    let suppress_documents = events
        .iter()
        .any(|e| e.extracted_from_archive || classify(&e.file_name).is_script());

    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| seen.insert(e.file_name.as_str()))
        .map(|e| {
            let classification = classify(&e.file_name);
            PlannedDispatch {
                file_name: e.file_name.clone(),
                classification,
                suppressed: suppress_documents && !classification.is_script(),
            }
        })
        .collect()
}

/// 两路来源分发过的文件名保留多久用于去重
const DEDUPE_WINDOW: Duration = Duration::from_secs(60);

/// 合并文件监视和事件日志，同一文件只分发一次
#[derive(Debug)]
pub struct SourceMerge {
    settle: Duration,
    /// 监视到、尚未分发的文件及首次看到的时间
    pending: HashMap<String, Instant>,
    /// 已按监视结果分发，等待对应的日志事件
    by_watch: HashMap<String, Instant>,
    /// 日志事件已分发，之后的监视通知忽略
    by_log: HashMap<String, Instant>,
}

impl SourceMerge {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            pending: HashMap::new(),
            by_watch: HashMap::new(),
            by_log: HashMap::new(),
        }
    }

    /// 记录监视到的新文件
    pub fn observe(&mut self, name: String, now: Instant) {
        if self.by_log.contains_key(&name) {
            return;
        }
        self.pending.entry(name).or_insert(now);
    }

    /// 过滤日志事件：已按监视结果分发过的文件丢弃
    pub fn take_logged(&mut self, events: Vec<TransferEvent>, now: Instant) -> Vec<TransferEvent> {
        events
            .into_iter()
            .filter(|e| {
                self.pending.remove(&e.file_name);
                self.by_log.insert(e.file_name.clone(), now);
                self.by_watch.remove(&e.file_name).is_none()
            })
            .collect()
    }

    /// 取出等待期已过且仍存在的监视文件
    pub fn take_settled(&mut self, root: &Path, now: Instant) -> Vec<TransferEvent> {
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) >= self.settle)
            .map(|(name, _)| name.clone())
            .collect();

        let mut events = Vec::new();
        for name in ready {
            self.pending.remove(&name);
            // 压缩包解压后会被删除，临时文件也可能一闪而过
            if !root.join(&name).is_file() {
                continue;
            }
            self.by_watch.insert(name.clone(), now);
            events.push(TransferEvent::received(name, false));
        }
        events.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        self.by_watch
            .retain(|_, at| now.duration_since(*at) < DEDUPE_WINDOW);
        self.by_log
            .retain(|_, at| now.duration_since(*at) < DEDUPE_WINDOW);
        events
    }
}

pub struct DispatchEngine {
    storage_root: PathBuf,
    table: StrategyTable,
    notices: NoticeSender,
    poll_interval: Duration,
}

impl DispatchEngine {
    pub fn new(
        settings: &AppSettings,
        capabilities: HostCapabilities,
        notices: NoticeSender,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_launcher(
            settings,
            &capabilities,
            Arc::new(SystemLauncher),
            notices,
            cancel,
        )
    }

    pub fn with_launcher(
        settings: &AppSettings,
        capabilities: &HostCapabilities,
        launcher: Arc<dyn ProcessLauncher>,
        notices: NoticeSender,
        cancel: CancellationToken,
    ) -> Self {
        let watch = MacroWatch::new(settings.macro_watch_timeout(), cancel);
        Self {
            storage_root: settings.storage_root.clone(),
            table: StrategyTable::new(capabilities, launcher, watch),
            notices,
            poll_interval: settings.event_poll_interval(),
        }
    }

    /// 轮询事件源直到取消，`watch` 存在时同时处理监视到的新文件
    pub async fn run(
        &self,
        source: &dyn EventSource,
        mut watch: Option<StorageWatch>,
        cancel: CancellationToken,
    ) {
        info!(
            "Dispatch engine watching {:?} every {}ms",
            self.storage_root,
            self.poll_interval.as_millis()
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut merge = SourceMerge::new(self.poll_interval * 2);
        let mut source_down = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                name = next_watched(&mut watch) => {
                    match name {
                        Some(name) => merge.observe(name, Instant::now()),
                        None => {
                            warn!("Storage watch stopped, relying on event log only");
                            watch = None;
                        }
                    }
                    continue;
                }
            }

            match source.fetch().await {
                Ok(events) => {
                    if source_down {
                        info!("Event source reachable again");
                        source_down = false;
                    }
                    let events = merge.take_logged(events, Instant::now());
                    if !events.is_empty() {
                        self.process_batch(&events);
                    }
                }
                Err(e) => {
                    // 只在首次失败时告警，避免刷屏
                    if !source_down {
                        warn!("Cannot fetch events: {}", e);
                        source_down = true;
                    } else {
                        debug!("Event source still unavailable: {}", e);
                    }
                }
            }

            let watched = merge.take_settled(&self.storage_root, Instant::now());
            if !watched.is_empty() {
                debug!("Dispatching {} file(s) seen by the storage watch", watched.len());
                self.process_batch(&watched);
            }
        }

        debug!("Dispatch engine stopped");
    }

    /// 处理一批事件，返回发出的通知
    pub fn process_batch(&self, events: &[TransferEvent]) -> Vec<LogEntry> {
        let mut notices = Vec::new();

        for plan in plan_batch(events) {
            notices.push(LogEntry::info(format!(
                "New file received: {}",
                plan.file_name
            )));

            let path = self.storage_root.join(&plan.file_name);
            let outcome = if plan.suppressed {
                debug!("Not opening {} (batch has scripts or archive members)", plan.file_name);
                None
            } else if !path.exists() {
                Some(LogEntry::error(format!(
                    "{}: file no longer exists",
                    plan.file_name
                )))
            } else {
                Some(match self.table.dispatch(&path) {
                    Ok(action) => {
                        info!("{} {} ({})", action, plan.file_name, plan.classification);
                        LogEntry::info(format!("{}: {}", action, plan.file_name))
                    }
                    Err(e) => {
                        warn!("Dispatch of {} failed: {}", plan.file_name, e);
                        LogEntry::error(format!("{}: {}", plan.file_name, e))
                    }
                })
            };
            notices.extend(outcome);
        }

        for notice in &notices {
            self.notices.send(notice.clone());
        }
        notices
    }
}

async fn next_watched(watch: &mut Option<StorageWatch>) -> Option<String> {
    match watch {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}
