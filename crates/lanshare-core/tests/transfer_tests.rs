//! 集成测试 - 传输协议
//!
//! 在回环地址上启动真实的传输服务，验证下载开关、事件日志、压缩包解压和发送端行为。

use lanshare_core::transfer::PeerSendStatus;
use lanshare_core::{
    AppSettings, EventLog, GateStore, SendOutcome, SimpleSendCallback, TransferClient,
    TransferServer,
};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Node {
    port: u16,
    root: TempDir,
    _state: TempDir,
    events: EventLog,
    cancel: CancellationToken,
}

impl Node {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    fn target(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    fn root(&self) -> &Path {
        self.root.path()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve(
    settings: &AppSettings,
    state: &Path,
    downloads_enabled: bool,
) -> (u16, EventLog, CancellationToken) {
    let gate = GateStore::new(state.join("downloads_enabled.json"));
    gate.set_enabled(downloads_enabled).await.unwrap();
    let events = EventLog::new(state.join("file_events.json"));

    let cancel = CancellationToken::new();
    let mut server = TransferServer::new(settings, gate, events.clone());
    let (port, _handle) = server
        .start("127.0.0.1:0".parse().unwrap(), cancel.clone())
        .await
        .unwrap();
    (port, events, cancel)
}

async fn start_node(downloads_enabled: bool, max_upload_bytes: u64) -> Node {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let settings = AppSettings {
        storage_root: root.path().to_path_buf(),
        max_upload_bytes,
        ..Default::default()
    };

    let (port, events, cancel) = serve(&settings, state.path(), downloads_enabled).await;
    Node {
        port,
        root,
        _state: state,
        events,
        cancel,
    }
}

fn file_form(name: &str, data: Vec<u8>) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new().percent_encode_noop().part(
        "file",
        reqwest::multipart::Part::bytes(data).file_name(name.to_string()),
    )
}

async fn upload(node: &Node, name: &str, data: Vec<u8>) -> reqwest::Response {
    reqwest::Client::new()
        .post(node.url("/upload"))
        .multipart(file_form(name, data))
        .send()
        .await
        .unwrap()
}

fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buffer));
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer
}

fn files_in(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

#[tokio::test]
async fn upload_rejected_when_downloads_disabled() {
    let node = start_node(false, 1024 * 1024).await;

    let resp = upload(&node, "notes.txt", b"hello".to_vec()).await;
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    assert_eq!(files_in(node.root()), 0);
    assert!(node.events.drain().await.unwrap().is_empty());
}

#[tokio::test]
async fn caller_supplied_gate_is_ignored() {
    let node = start_node(false, 1024 * 1024).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(node.url("/upload"))
        .header("X-Downloads-Enabled", "true")
        .multipart(file_form("notes.txt", b"hello".to_vec()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    let body: serde_json::Value = client
        .post(node.url("/downloads_enabled"))
        .json(&serde_json::json!({ "downloads_enabled": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["downloads_enabled"], false);
}

#[tokio::test]
async fn single_upload_produces_one_event() {
    let node = start_node(true, 1024 * 1024).await;

    let resp = upload(&node, "reports/q3.pdf", b"%PDF-1.4".to_vec()).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("reports/q3.pdf"));

    assert_eq!(
        std::fs::read(node.root().join("reports/q3.pdf")).unwrap(),
        b"%PDF-1.4"
    );

    let events = node.events.drain().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].file_name, "reports/q3.pdf");
    assert!(!events[0].extracted_from_archive);
}

#[tokio::test]
async fn zip_upload_is_extracted_member_by_member() {
    let node = start_node(true, 1024 * 1024).await;
    let archive = zip_bytes(&[
        ("readme.txt", b"read me"),
        ("src/main.py", b"print('hi')"),
        ("src/run.sh", b"echo run"),
    ]);

    let resp = upload(&node, "bundle.zip", archive).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let events = node.events.drain().await.unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.extracted_from_archive));

    let mut names: Vec<_> = events.iter().map(|e| e.file_name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["readme.txt", "src/main.py", "src/run.sh"]);

    assert!(!node.root().join("bundle.zip").exists());
    assert_eq!(
        std::fs::read(node.root().join("src/main.py")).unwrap(),
        b"print('hi')"
    );
}

#[tokio::test]
async fn broken_zip_is_kept_as_single_event() {
    let node = start_node(true, 1024 * 1024).await;

    let resp = upload(&node, "broken.zip", b"PK definitely not a zip".to_vec()).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let events = node.events.drain().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].file_name, "broken.zip");
    assert!(!events[0].extracted_from_archive);
    assert!(node.root().join("broken.zip").exists());
}

#[tokio::test]
async fn oversize_upload_is_rejected() {
    let node = start_node(true, 1024).await;

    let resp = upload(&node, "big.bin", vec![7u8; 8 * 1024]).await;
    assert_eq!(resp.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);

    assert_eq!(files_in(node.root()), 0);
    assert!(node.events.drain().await.unwrap().is_empty());
}

/// 存储根目录位于普通文件之下，任何落盘尝试都会失败
async fn oversize_status_with_unwritable_root(
    max_upload_bytes: u64,
    size: usize,
) -> reqwest::StatusCode {
    let state = tempfile::tempdir().unwrap();
    let blocker = state.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let settings = AppSettings {
        storage_root: blocker.join("root"),
        max_upload_bytes,
        ..Default::default()
    };
    let (port, events, cancel) = serve(&settings, state.path(), true).await;

    let status = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/upload", port))
        .multipart(file_form("big.bin", vec![7u8; size]))
        .send()
        .await
        .unwrap()
        .status();

    assert!(events.drain().await.unwrap().is_empty());
    cancel.cancel();
    status
}

#[tokio::test]
async fn oversize_upload_never_reaches_disk() {
    // 远超上限：按 Content-Length 直接拒绝
    assert_eq!(
        oversize_status_with_unwritable_root(1024, 8 * 1024).await,
        reqwest::StatusCode::PAYLOAD_TOO_LARGE
    );
    // 略超上限：先在内存中收完字段再拒绝
    assert_eq!(
        oversize_status_with_unwritable_root(4096, 5000).await,
        reqwest::StatusCode::PAYLOAD_TOO_LARGE
    );
}

#[tokio::test]
async fn upload_just_under_limit_is_stored() {
    let node = start_node(true, 1024).await;

    let resp = upload(&node, "exact.bin", vec![3u8; 1024]).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(std::fs::read(node.root().join("exact.bin")).unwrap().len(), 1024);
}

#[tokio::test]
async fn archive_member_named_like_archive_is_kept() {
    let node = start_node(true, 1024 * 1024).await;
    let archive = zip_bytes(&[("bundle.zip", b"nested"), ("readme.txt", b"read me")]);

    let resp = upload(&node, "bundle.zip", archive).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let events = node.events.drain().await.unwrap();
    assert_eq!(events.len(), 2);
    for event in &events {
        assert!(event.extracted_from_archive);
        assert!(node.root().join(&event.file_name).is_file());
    }
    assert_eq!(std::fs::read(node.root().join("bundle.zip")).unwrap(), b"nested");
}

#[tokio::test]
async fn traversal_filename_is_rejected() {
    let node = start_node(true, 1024 * 1024).await;

    let resp = upload(&node, "../escape.txt", b"x".to_vec()).await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(node.events.drain().await.unwrap().is_empty());
}

#[tokio::test]
async fn check_events_is_a_drain() {
    let node = start_node(true, 1024 * 1024).await;
    upload(&node, "a.txt", b"a".to_vec()).await;
    upload(&node, "b.txt", b"b".to_vec()).await;

    let client = reqwest::Client::new();
    let first: serde_json::Value = client
        .get(node.url("/check_events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["events"].as_array().unwrap().len(), 2);
    assert_eq!(first["events"][0]["type"], "file_received");

    let second: serde_json::Value = client
        .get(node.url("/check_events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(second["events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn health_reports_healthy() {
    let node = start_node(true, 1024).await;
    let body: serde_json::Value = reqwest::get(node.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn download_serves_files_and_guards_root() {
    let node = start_node(true, 1024).await;
    std::fs::create_dir_all(node.root().join("docs")).unwrap();
    std::fs::write(node.root().join("docs/a.txt"), b"alpha").unwrap();

    let resp = reqwest::get(node.url("/download/docs/a.txt")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(
        resp.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .contains("a.txt")
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"alpha");

    let resp = reqwest::get(node.url("/download/docs")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/zip");

    let resp = reqwest::get(node.url("/download/..%2F..%2Fetc%2Fpasswd"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    let resp = reqwest::get(node.url("/download/docs/missing.txt"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sender_skips_disabled_peer_and_sends_to_enabled_one() {
    let disabled = start_node(false, 1024 * 1024).await;
    let enabled = start_node(true, 1024 * 1024).await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("drawing.dwg");
    std::fs::write(&file, b"dwg-bytes").unwrap();

    let client = TransferClient::new(&AppSettings::default()).unwrap();
    let (callback, _rx) = SimpleSendCallback::new();
    let report = client
        .send_to_selected(&file, &[disabled.target(), enabled.target()], &callback)
        .await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.outcome(), SendOutcome::PartialSuccess);

    // 结果顺序与目标顺序一致
    assert!(matches!(
        report.results[0].status,
        PeerSendStatus::Skipped { .. }
    ));
    assert_eq!(report.results[1].status, PeerSendStatus::Succeeded);

    assert_eq!(
        std::fs::read(enabled.root().join("drawing.dwg")).unwrap(),
        b"dwg-bytes"
    );
    assert_eq!(files_in(disabled.root()), 0);
}

#[tokio::test]
async fn sender_reports_total_failure_when_upload_rejected() {
    let node = start_node(true, 16).await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("large.bin");
    std::fs::write(&file, vec![1u8; 4096]).unwrap();

    let client = TransferClient::new(&AppSettings::default()).unwrap();
    let (callback, _rx) = SimpleSendCallback::new();
    let report = client
        .send_to_selected(&file, &[node.target()], &callback)
        .await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcome(), SendOutcome::TotalFailure);
}
