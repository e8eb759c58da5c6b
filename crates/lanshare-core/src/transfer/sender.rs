//! 发送端
//!
//! 对每个目标按调用方给定顺序逐个处理（不并发，进度汇报顺序确定）：
//! 1. 短超时查询对端下载开关
//! 2. 开关关闭或查询失败则跳过（既不算成功也不算失败）
//! 3. 否则以 multipart 流式上传

use log::{debug, info, warn};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::AppSettings;
use crate::discovery::{GateState, PeerDirectory};

/// 发送进度回调
pub trait SendProgressCallback: Send + Sync {
    /// 状态更新
    fn on_status(&self, status: &str);
    /// 单个目标处理完毕
    fn on_peer_result(&self, result: &PeerSendResult);
    /// 全部目标处理完毕
    fn on_complete(&self, report: &SendReport);
}

/// 单个目标的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerSendStatus {
    Succeeded,
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSendResult {
    pub target: String,
    #[serde(flatten)]
    pub status: PeerSendStatus,
}

/// 汇总结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    NothingToDo,
    AllSucceeded,
    PartialSuccess,
    TotalFailure,
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SendOutcome::NothingToDo => "Nothing to do: no targets selected",
            SendOutcome::AllSucceeded => "File sent to all selected devices",
            SendOutcome::PartialSuccess => "File sent to some of the selected devices",
            SendOutcome::TotalFailure => "File could not be sent to any device",
        };
        f.write_str(text)
    }
}

/// 一次发送的聚合报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    pub file_name: String,
    pub results: Vec<PeerSendResult>,
}

impl SendReport {
    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, PeerSendStatus::Succeeded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, PeerSendStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, PeerSendStatus::Failed { .. }))
    }

    pub fn outcome(&self) -> SendOutcome {
        let succeeded = self.succeeded();
        if self.results.is_empty() {
            SendOutcome::NothingToDo
        } else if succeeded == self.results.len() {
            SendOutcome::AllSucceeded
        } else if succeeded > 0 {
            SendOutcome::PartialSuccess
        } else {
            SendOutcome::TotalFailure
        }
    }

    fn count(&self, pred: impl Fn(&PeerSendStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}

impl fmt::Display for SendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} succeeded, {} skipped, {} failed)",
            self.outcome(),
            self.succeeded(),
            self.skipped(),
            self.failed()
        )
    }
}

/// 发送客户端
pub struct TransferClient {
    client: reqwest::Client,
    transfer_port: u16,
    gate_timeout: Duration,
    upload_timeout: Duration,
}

impl TransferClient {
    pub fn new(settings: &AppSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lanshare/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            transfer_port: settings.transfer_port,
            gate_timeout: settings.gate_check_timeout(),
            upload_timeout: settings.upload_timeout(),
        })
    }

    /// 目标地址：`host:port` 原样使用，裸地址补上传输端口
    fn base_url(&self, target: &str) -> String {
        if target.parse::<SocketAddr>().is_ok() {
            format!("http://{}", target)
        } else if let Ok(ip) = target.parse::<Ipv4Addr>() {
            format!("http://{}:{}", ip, self.transfer_port)
        } else if target.contains(':') {
            format!("http://{}", target)
        } else {
            format!("http://{}:{}", target, self.transfer_port)
        }
    }

    /// 查询对端下载开关，失败时为 Unknown
    pub async fn check_gate(&self, target: &str) -> GateState {
        let url = format!("{}/downloads_enabled", self.base_url(target));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .timeout(self.gate_timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("Gate check on {} returned {}", target, r.status());
                return GateState::Unknown;
            }
            Err(e) => {
                debug!("Gate check on {} failed: {}", target, e);
                return GateState::Unknown;
            }
        };

        match response.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("downloads_enabled")
                .and_then(|v| v.as_bool())
                .map(GateState::from)
                .unwrap_or(GateState::Unknown),
            Err(e) => {
                debug!("Gate check on {} returned unreadable body: {}", target, e);
                GateState::Unknown
            }
        }
    }

    /// 上传单个文件，返回对端的确认消息
    pub async fn upload(&self, target: &str, file_path: &Path) -> anyhow::Result<String> {
        let file = tokio::fs::File::open(file_path).await?;
        let size = file.metadata().await?.len();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("{:?} has no file name", file_path))?;
        let mime_type = mime_guess::from_path(file_path)
            .first_or_octet_stream()
            .to_string();

        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));
        let part = reqwest::multipart::Part::stream_with_length(body, size)
            .file_name(file_name)
            .mime_str(&mime_type)?;
        // 文件名原样发送，接收端不做百分号解码
        let form = reqwest::multipart::Form::new()
            .percent_encode_noop()
            .part("file", part);

        let url = format!("{}/upload", self.base_url(target));
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        if status.is_success() {
            Ok(body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("uploaded")
                .to_string())
        } else {
            let reason = body
                .get("error")
                .and_then(|m| m.as_str())
                .unwrap_or("upload rejected");
            anyhow::bail!("{} ({})", reason, status)
        }
    }

    /// 发送到选定目标
    pub async fn send_to_selected(
        &self,
        file_path: &Path,
        targets: &[String],
        callback: &dyn SendProgressCallback,
    ) -> SendReport {
        let mut report = SendReport {
            file_name: file_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            results: Vec::new(),
        };

        if targets.is_empty() {
            callback.on_status("No targets selected");
            callback.on_complete(&report);
            return report;
        }

        for target in targets {
            callback.on_status(&format!("Checking {}...", target));
            let status = match self.check_gate(target).await {
                GateState::Enabled => {
                    callback.on_status(&format!("Sending {} to {}...", report.file_name, target));
                    match self.upload(target, file_path).await {
                        Ok(message) => {
                            info!("Sent {:?} to {}: {}", file_path, target, message);
                            PeerSendStatus::Succeeded
                        }
                        Err(e) => {
                            warn!("Sending {:?} to {} failed: {}", file_path, target, e);
                            PeerSendStatus::Failed {
                                reason: e.to_string(),
                            }
                        }
                    }
                }
                GateState::Disabled => PeerSendStatus::Skipped {
                    reason: "downloads disabled".to_string(),
                },
                GateState::Unknown => PeerSendStatus::Skipped {
                    reason: "gate check failed".to_string(),
                },
            };

            let result = PeerSendResult {
                target: target.clone(),
                status,
            };
            callback.on_peer_result(&result);
            report.results.push(result);
        }

        info!("{}", report);
        callback.on_complete(&report);
        report
    }

    /// 发送到目录中的全部对端
    pub async fn send_to_all(
        &self,
        file_path: &Path,
        directory: &PeerDirectory,
        callback: &dyn SendProgressCallback,
    ) -> SendReport {
        let targets: Vec<String> = directory
            .snapshot()
            .await
            .into_iter()
            .map(|p| p.address.to_string())
            .collect();
        self.send_to_selected(file_path, &targets, callback).await
    }
}

/// 基于通道的发送回调
pub struct SimpleSendCallback {
    tx: mpsc::Sender<SendEvent>,
}

#[derive(Debug, Clone)]
pub enum SendEvent {
    Status(String),
    PeerResult(PeerSendResult),
    Complete(SendReport),
}

impl SimpleSendCallback {
    pub fn new() -> (Self, mpsc::Receiver<SendEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }
}

impl SendProgressCallback for SimpleSendCallback {
    fn on_status(&self, status: &str) {
        let _ = self.tx.try_send(SendEvent::Status(status.to_string()));
    }

    fn on_peer_result(&self, result: &PeerSendResult) {
        let _ = self.tx.try_send(SendEvent::PeerResult(result.clone()));
    }

    fn on_complete(&self, report: &SendReport) {
        let _ = self.tx.try_send(SendEvent::Complete(report.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(target: &str, status: PeerSendStatus) -> PeerSendResult {
        PeerSendResult {
            target: target.to_string(),
            status,
        }
    }

    #[test]
    fn test_outcome_classification() {
        let mut report = SendReport::default();
        assert_eq!(report.outcome(), SendOutcome::NothingToDo);

        report.results.push(result("a", PeerSendStatus::Succeeded));
        assert_eq!(report.outcome(), SendOutcome::AllSucceeded);

        report.results.push(result(
            "b",
            PeerSendStatus::Skipped {
                reason: "downloads disabled".into(),
            },
        ));
        assert_eq!(report.outcome(), SendOutcome::PartialSuccess);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);

        let failed = SendReport {
            file_name: "x".into(),
            results: vec![result(
                "c",
                PeerSendStatus::Failed {
                    reason: "refused".into(),
                },
            )],
        };
        assert_eq!(failed.outcome(), SendOutcome::TotalFailure);
    }

    #[test]
    fn test_base_url_forms() {
        let settings = AppSettings {
            transfer_port: 9000,
            ..Default::default()
        };
        let client = TransferClient::new(&settings).unwrap();
        assert_eq!(client.base_url("10.0.0.5"), "http://10.0.0.5:9000");
        assert_eq!(client.base_url("127.0.0.1:4321"), "http://127.0.0.1:4321");
        assert_eq!(client.base_url("render-box"), "http://render-box:9000");
    }

    #[test]
    fn test_peer_result_serializes_flat() {
        let json = serde_json::to_value(result(
            "10.0.0.5",
            PeerSendStatus::Skipped {
                reason: "downloads disabled".into(),
            },
        ))
        .unwrap();
        assert_eq!(json["target"], "10.0.0.5");
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "downloads disabled");
    }

    #[tokio::test]
    async fn test_empty_targets_is_nothing_to_do() {
        let client = TransferClient::new(&AppSettings::default()).unwrap();
        let (callback, mut rx) = SimpleSendCallback::new();
        let report = client
            .send_to_selected(Path::new("missing.bin"), &[], &callback)
            .await;
        assert_eq!(report.outcome(), SendOutcome::NothingToDo);

        let mut saw_complete = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SendEvent::Complete(_)) {
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_skipped() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = TransferClient::new(&AppSettings::default()).unwrap();
        let (callback, _rx) = SimpleSendCallback::new();
        let report = client
            .send_to_selected(
                Path::new("missing.bin"),
                &[format!("127.0.0.1:{}", port)],
                &callback,
            )
            .await;
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.outcome(), SendOutcome::TotalFailure);
    }
}
