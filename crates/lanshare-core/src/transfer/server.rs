//! HTTP 传输服务
//!
//! # 端点
//!
//! - `POST /upload`：multipart 上传（字段名 `file`），受下载开关控制
//! - `POST /downloads_enabled`：返回本机下载开关
//! - `GET /check_events`：取出并清空接收事件
//! - `GET /health`：存活探测
//! - `GET /download/*path`：下载文件，目录会被即时打包为 ZIP
//!
//! 下载开关只信任本机状态，请求方携带的 `X-Downloads-Enabled` 头或 JSON 字段一律忽略。

use log::{debug, error, info, warn};

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path as UrlPath, State,
        multipart::{Field, MultipartRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::storage::{
    DownloadRejection, DownloadTarget, extract_archive, is_zip_archive, resolve_download_path,
    sanitize_relative_path, zip_directory,
};
use super::{EventLog, GateStore, TransferEvent};
use crate::config::AppSettings;
use crate::error::TransferError;

/// multipart 边界和字段头的额外余量
const MULTIPART_OVERHEAD: u64 = 4 * 1024;

/// 上传临时文件前缀
const UPLOAD_TEMP_PREFIX: &str = ".lanshare-upload-";

/// 服务器状态
pub struct TransferState {
    pub storage_root: PathBuf,
    pub max_upload_bytes: u64,
    pub gate: GateStore,
    pub events: EventLog,
}

/// 传输服务器
pub struct TransferServer {
    port: u16,
    state: Arc<TransferState>,
}

impl TransferServer {
    pub fn new(settings: &AppSettings, gate: GateStore, events: EventLog) -> Self {
        Self {
            port: 0,
            state: Arc::new(TransferState {
                storage_root: settings.storage_root.clone(),
                max_upload_bytes: settings.max_upload_bytes,
                gate,
                events,
            }),
        }
    }

    /// 获取绑定的端口（启动前为 0）
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn router(&self) -> Router {
        let body_limit = usize::try_from(self.state.max_upload_bytes + MULTIPART_OVERHEAD)
            .unwrap_or(usize::MAX);

        Router::new()
            .route("/upload", post(upload_handler))
            .route("/downloads_enabled", post(downloads_enabled_handler))
            .route("/check_events", get(check_events_handler))
            .route("/health", get(health_handler))
            .route("/download/*path", get(download_handler))
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(self.state.clone())
    }

    /// 在给定监听器上运行，直到取消
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> anyhow::Result<()> {
        info!(
            "Transfer server listening on {}, storing into {:?}",
            listener.local_addr()?,
            self.state.storage_root
        );

        let app = self.router();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            error!("Transfer server error: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    /// 绑定地址并在后台运行，返回实际端口
    pub async fn start(
        &mut self,
        addr: SocketAddr,
        cancel: CancellationToken,
    ) -> anyhow::Result<(u16, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let server = Self {
            port,
            state: self.state.clone(),
        };
        let handle = tokio::spawn(async move {
            if let Err(e) = server.serve(listener, cancel).await {
                error!("Transfer server stopped: {}", e);
            }
        });

        Ok((port, handle))
    }
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status = match &self {
            TransferError::GateDisabled => StatusCode::FORBIDDEN,
            TransferError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            TransferError::MissingFile
            | TransferError::EmptyFilename
            | TransferError::InvalidFilename(_)
            | TransferError::Multipart(_) => StatusCode::BAD_REQUEST,
            TransferError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn upload_handler(
    State(state): State<Arc<TransferState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, TransferError> {
    if headers.contains_key("x-downloads-enabled") {
        debug!("Ignoring caller-supplied X-Downloads-Enabled header");
    }

    if !state.gate.is_enabled().await {
        info!("Upload rejected: downloads are disabled");
        return Err(TransferError::GateDisabled);
    }

    if let Some(size) = content_length(&headers)
        && size > state.max_upload_bytes + MULTIPART_OVERHEAD
    {
        warn!("Upload rejected: Content-Length {} over limit", size);
        return Err(TransferError::PayloadTooLarge {
            size,
            limit: state.max_upload_bytes,
        });
    }

    let mut multipart = multipart.map_err(|e| TransferError::Multipart(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TransferError::Multipart(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let raw_name = field.file_name().unwrap_or_default().to_string();
        let relative = sanitize_relative_path(&raw_name)?;
        let dest = state.storage_root.join(&relative);

        // 请求体本身不超过上限时文件必然不超限，可以直接落盘
        let declared_within_limit =
            content_length(&headers).is_some_and(|size| size <= state.max_upload_bytes);
        let size = receive_field(
            field,
            &state.storage_root,
            &dest,
            state.max_upload_bytes,
            declared_within_limit,
        )
        .await?;
        info!("Received {} ({} bytes)", relative, size);

        let (events, message) = record_events(&state.storage_root, &dest, &relative).await;
        state.events.append(&events).await?;
        return Ok(Json(json!({ "message": message })));
    }

    Err(TransferError::MissingFile)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// 接收上传字段，完整接收后再移动到目标位置
///
/// 无法事先确认大小时先在内存中收满整个字段（最多 `limit` 字节），
/// 超限直接拒绝，磁盘上不留下任何东西。
async fn receive_field(
    mut field: Field<'_>,
    root: &Path,
    dest: &Path,
    limit: u64,
    declared_within_limit: bool,
) -> Result<u64, TransferError> {
    let buffered = if declared_within_limit {
        None
    } else {
        Some(buffer_field(&mut field, limit).await?)
    };

    tokio::fs::create_dir_all(root).await?;
    let tmp = root.join(format!(
        "{}{}",
        UPLOAD_TEMP_PREFIX,
        uuid::Uuid::new_v4().simple()
    ));

    let result = match &buffered {
        Some(data) => tokio::fs::write(&tmp, data)
            .await
            .map(|()| data.len() as u64)
            .map_err(TransferError::from),
        None => write_chunks(&mut field, &tmp, limit).await,
    };
    let written = match result {
        Ok(n) => n,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
    };

    let placed = async {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&tmp, dest).await
    }
    .await;
    if let Err(e) = placed {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    Ok(written)
}

/// 读取下一块数据，请求体超过 axum 限制时映射为 413
async fn next_chunk(
    field: &mut Field<'_>,
    received: u64,
    limit: u64,
) -> Result<Option<axum::body::Bytes>, TransferError> {
    match field.chunk().await {
        Ok(chunk) => Ok(chunk),
        Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(TransferError::PayloadTooLarge {
                size: received,
                limit,
            })
        }
        Err(e) => Err(TransferError::Multipart(e.body_text())),
    }
}

async fn buffer_field(field: &mut Field<'_>, limit: u64) -> Result<Vec<u8>, TransferError> {
    let mut data = Vec::new();
    while let Some(chunk) = next_chunk(field, data.len() as u64, limit).await? {
        let size = (data.len() + chunk.len()) as u64;
        if size > limit {
            return Err(TransferError::PayloadTooLarge { size, limit });
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn write_chunks(field: &mut Field<'_>, tmp: &Path, limit: u64) -> Result<u64, TransferError> {
    let mut file = File::create(tmp).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = next_chunk(field, written, limit).await? {
        written += chunk.len() as u64;
        if written > limit {
            return Err(TransferError::PayloadTooLarge {
                size: written,
                limit,
            });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(written)
}

/// 生成接收事件；压缩包解压失败时保留原文件并按普通文件记录
async fn record_events(root: &Path, dest: &Path, relative: &str) -> (Vec<TransferEvent>, String) {
    if !is_zip_archive(dest) {
        return (
            vec![TransferEvent::received(relative, false)],
            format!("File {} uploaded successfully", relative),
        );
    }

    let root_owned = root.to_path_buf();
    let archive = dest.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || extract_archive(&root_owned, &archive))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r);

    match extracted {
        Ok(members) => {
            let count = members.len();
            let events = members
                .into_iter()
                .map(|m| TransferEvent::received(m, true))
                .collect();
            (
                events,
                format!("Archive {} extracted: {} file(s)", relative, count),
            )
        }
        Err(e) => {
            warn!("Keeping archive {}: extraction failed: {}", relative, e);
            (
                vec![TransferEvent::received(relative, false)],
                format!("File {} uploaded successfully", relative),
            )
        }
    }
}

/// 返回本机下载开关，请求体中的值不参与判断
async fn downloads_enabled_handler(State(state): State<Arc<TransferState>>) -> impl IntoResponse {
    let enabled = state.gate.is_enabled().await;
    Json(json!({ "downloads_enabled": enabled }))
}

async fn check_events_handler(State(state): State<Arc<TransferState>>) -> Response {
    match state.events.drain().await {
        Ok(events) => {
            if !events.is_empty() {
                debug!("Handing out {} event(s)", events.len());
            }
            Json(json!({ "events": events })).into_response()
        }
        Err(e) => {
            error!("Failed to drain event log: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string(), "events": [] })),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn download_handler(
    State(state): State<Arc<TransferState>>,
    UrlPath(path): UrlPath<String>,
) -> Response {
    let root = state.storage_root.clone();
    let requested = path.clone();
    let target = match tokio::task::spawn_blocking(move || resolve_download_path(&root, &requested))
        .await
    {
        Ok(Ok(target)) => target,
        Ok(Err(DownloadRejection::Forbidden)) => {
            warn!("Download outside storage root refused: {}", path);
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }
        Ok(Err(DownloadRejection::NotFound)) => {
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
        Err(e) => {
            error!("Download path resolution failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!("Download request for {}", path);

    match target {
        DownloadTarget::File(file_path) => stream_file(&file_path).await,
        DownloadTarget::Directory(dir) => {
            let name = format!("{}.zip", attachment_name(&dir));
            match tokio::task::spawn_blocking(move || zip_directory(&dir)).await {
                Ok(Ok(data)) => (
                    [
                        (header::CONTENT_TYPE, "application/zip".to_string()),
                        (
                            header::CONTENT_DISPOSITION,
                            format!("attachment; filename=\"{}\"", name),
                        ),
                    ],
                    data,
                )
                    .into_response(),
                Ok(Err(e)) => {
                    error!("Failed to create ZIP: {}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create ZIP").into_response()
                }
                Err(e) => {
                    error!("ZIP task failed: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
    }
}

async fn stream_file(path: &Path) -> Response {
    match File::open(path).await {
        Ok(file) => {
            let mime = mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string();
            let stream = tokio_util::io::ReaderStream::new(file);
            (
                [
                    (header::CONTENT_TYPE, mime),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", attachment_name(path)),
                    ),
                ],
                axum::body::Body::from_stream(stream),
            )
                .into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "File not found").into_response(),
    }
}

fn attachment_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "download".to_string())
}
