//! 存储根目录操作：文件名清理、压缩包解压、下载路径校验、目录打包
//!
//! 这里的函数都是阻塞 I/O，由调用方放进 `spawn_blocking`。

use log::{debug, info, warn};

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::TransferError;

/// 解压暂存目录前缀
const STAGING_PREFIX: &str = ".lanshare-extract-";

/// 清理上传文件名，返回以 `/` 分隔的相对路径
///
/// 保留子目录层级；反斜杠视为分隔符；绝对路径、`..` 和空名一律拒绝。
pub fn sanitize_relative_path(name: &str) -> Result<String, TransferError> {
    let normalized = name.trim().replace('\\', "/");
    if normalized.is_empty() {
        return Err(TransferError::EmptyFilename);
    }
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(TransferError::InvalidFilename(name.to_string()));
    }

    let mut segments = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(TransferError::InvalidFilename(name.to_string())),
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(TransferError::InvalidFilename(name.to_string()));
    }
    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

pub fn is_zip_archive(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// 解压存储根目录下的压缩包
///
/// 压缩包先改名让出原路径（成员可能与压缩包同名），再完整解到暂存目录，
/// 全部成功后逐个移动到根目录下对应的相对路径，最后删除压缩包。
/// 任何一步失败都会清掉暂存目录并把压缩包放回原处。
/// 返回解出的成员相对路径。
pub fn extract_archive(root: &Path, archive_path: &Path) -> anyhow::Result<Vec<String>> {
    let id = uuid::Uuid::new_v4().simple();
    let staging = root.join(format!("{}{}", STAGING_PREFIX, id));
    let held = root.join(format!("{}{}.zip", STAGING_PREFIX, id));
    fs::rename(archive_path, &held)?;

    let members = match stage_members(&held, &staging) {
        Ok(members) => members,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            restore_archive(&held, archive_path);
            return Err(e);
        }
    };

    let moved = move_into_place(&staging, root, &members);
    let _ = fs::remove_dir_all(&staging);
    if let Err(e) = moved {
        restore_archive(&held, archive_path);
        return Err(e.into());
    }

    fs::remove_file(&held)?;
    info!(
        "Extracted {} file(s) from {:?}",
        members.len(),
        archive_path.file_name().unwrap_or_default()
    );
    Ok(members)
}

fn restore_archive(held: &Path, archive_path: &Path) {
    // 原路径已被同名成员占用时保留改名后的压缩包
    if archive_path.exists() {
        warn!("Archive path {:?} taken, keeping archive at {:?}", archive_path, held);
        return;
    }
    if let Err(e) = fs::rename(held, archive_path) {
        warn!("Failed to restore archive {:?}: {}", archive_path, e);
    }
}

fn stage_members(archive_path: &Path, staging: &Path) -> anyhow::Result<Vec<String>> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    fs::create_dir_all(staging)?;

    let mut members = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let Some(enclosed) = entry.enclosed_name() else {
            anyhow::bail!("Archive member escapes extraction root: {}", entry.name());
        };
        let relative = to_slash_path(&enclosed)
            .ok_or_else(|| anyhow::anyhow!("Unusable archive member name: {}", entry.name()))?;

        let target = staging.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        debug!("Staged archive member {}", relative);
        members.push(relative);
    }

    if members.is_empty() {
        anyhow::bail!("Archive contains no files");
    }
    Ok(members)
}

fn move_into_place(staging: &Path, root: &Path, members: &[String]) -> io::Result<()> {
    for member in members {
        let dest = root.join(member);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if dest.is_file() {
            fs::remove_file(&dest)?;
        }
        fs::rename(staging.join(member), &dest)?;
    }
    Ok(())
}

fn to_slash_path(path: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => segments.push(s.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// 下载目标
#[derive(Debug, PartialEq, Eq)]
pub enum DownloadTarget {
    File(PathBuf),
    Directory(PathBuf),
}

/// 下载请求被拒绝的原因
#[derive(Debug, PartialEq, Eq)]
pub enum DownloadRejection {
    /// 路径解析到存储根目录之外
    Forbidden,
    NotFound,
}

/// 将请求路径解析为存储根目录下的真实路径
///
/// 词法上含 `..` 或为绝对路径的请求直接拒绝；
/// 解析符号链接后不在根目录下的同样拒绝。
pub fn resolve_download_path(
    root: &Path,
    requested: &str,
) -> Result<DownloadTarget, DownloadRejection> {
    let relative = match sanitize_relative_path(requested) {
        Ok(r) => r,
        Err(TransferError::EmptyFilename) => String::new(),
        Err(_) => return Err(DownloadRejection::Forbidden),
    };

    let root = root
        .canonicalize()
        .map_err(|_| DownloadRejection::NotFound)?;
    let candidate = root
        .join(&relative)
        .canonicalize()
        .map_err(|_| DownloadRejection::NotFound)?;

    if !candidate.starts_with(&root) {
        return Err(DownloadRejection::Forbidden);
    }

    if candidate.is_dir() {
        Ok(DownloadTarget::Directory(candidate))
    } else {
        Ok(DownloadTarget::File(candidate))
    }
}

/// 将目录打包为内存中的 ZIP，成员名相对该目录
pub fn zip_directory(dir: &Path) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Vec::new();

    {
        let mut zip = zip::ZipWriter::new(io::Cursor::new(&mut buffer));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries: Vec<_> = fs::read_dir(&current)?.collect::<io::Result<_>>()?;
            entries.sort_by_key(|e| e.file_name());

            for entry in entries {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(name) = path.strip_prefix(dir).ok().and_then(to_slash_path) else {
                    continue;
                };

                zip.start_file(name, options)?;
                let mut contents = Vec::new();
                File::open(&path)?.read_to_end(&mut contents)?;
                zip.write_all(&contents)?;
            }
        }

        zip.finish()?;
    }

    Ok(buffer)
}
