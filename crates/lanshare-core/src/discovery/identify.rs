//! 对端身份识别
//!
//! 启发式链，每一步失败都平滑降级：
//!
//! - 主机名：反向 DNS → 信标 `X-Lanshare-Host` 头 → 地址本身
//! - 平台：响应头 (`X-Lanshare-Platform` / `Server` / `X-Powered-By`) → 主机名子串 → "Unknown"

use log::{debug, trace};

use reqwest::header::{HeaderMap, SERVER};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use super::UNKNOWN_PLATFORM;

/// 信标返回的主机名头
pub const HOST_HEADER: &str = "x-lanshare-host";
/// 信标返回的平台头
pub const PLATFORM_HEADER: &str = "x-lanshare-platform";

/// 识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub display_name: String,
    pub platform_label: String,
}

/// 对端识别器
#[derive(Debug, Clone)]
pub struct PeerIdentifier {
    client: reqwest::Client,
    discovery_port: u16,
    transfer_port: u16,
}

impl PeerIdentifier {
    pub fn new(discovery_port: u16, transfer_port: u16, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            discovery_port,
            transfer_port,
        }
    }

    /// 识别对端主机名和平台，从不失败
    pub async fn identify_peer(&self, address: Ipv4Addr) -> PeerInfo {
        let headers = self.fetch_headers(address).await;

        let display_name = match reverse_lookup(address).await {
            Some(name) => name,
            None => hostname_hint(&headers).unwrap_or_else(|| address.to_string()),
        };

        let platform_label = platform_from_headers(&headers)
            .or_else(|| platform_from_hostname(&display_name))
            .unwrap_or(UNKNOWN_PLATFORM)
            .to_string();

        debug!(
            "Identified {}: name='{}', platform='{}'",
            address, display_name, platform_label
        );

        PeerInfo {
            display_name,
            platform_label,
        }
    }

    /// 依次请求几个已知端点，收集响应头
    async fn fetch_headers(&self, address: Ipv4Addr) -> Vec<HeaderMap> {
        let endpoints = [
            format!("http://{}:{}/", address, self.discovery_port),
            format!("http://{}:{}/health", address, self.transfer_port),
        ];

        let mut collected = Vec::new();
        for url in &endpoints {
            match self.client.get(url).send().await {
                Ok(resp) => collected.push(resp.headers().clone()),
                Err(e) => trace!("Header probe {} failed: {}", url, e),
            }
        }
        collected
    }
}

/// 从信标头中取主机名提示
pub fn hostname_hint(headers: &[HeaderMap]) -> Option<String> {
    headers
        .iter()
        .filter_map(|h| h.get(HOST_HEADER))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// 根据响应头判断平台
pub fn platform_from_headers(headers: &[HeaderMap]) -> Option<&'static str> {
    for h in headers {
        if let Some(label) = h
            .get(PLATFORM_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(platform_from_text)
        {
            return Some(label);
        }
    }

    headers
        .iter()
        .flat_map(|h| [h.get(SERVER), h.get("x-powered-by")])
        .flatten()
        .filter_map(|v| v.to_str().ok())
        .find_map(platform_from_text)
}

fn platform_from_text(text: &str) -> Option<&'static str> {
    let t = text.to_lowercase();
    if t.contains("windows") || t.contains("win32") || t.contains("win64") || t.contains("iis") {
        Some("Windows")
    } else if t.contains("darwin") || t.contains("macos") || t.contains("mac os") {
        Some("macOS")
    } else if ["linux", "ubuntu", "debian", "fedora", "centos", "raspbian"]
        .iter()
        .any(|k| t.contains(k))
    {
        Some("Linux")
    } else {
        None
    }
}

/// 主机名子串启发式（最后的兜底）
pub fn platform_from_hostname(hostname: &str) -> Option<&'static str> {
    let h = hostname.to_lowercase();
    if ["macbook", "imac", "mac-mini", "macmini", "-mbp"]
        .iter()
        .any(|k| h.contains(k))
    {
        Some("macOS")
    } else if h.starts_with("desktop-") || h.starts_with("laptop-") || h.contains("win") {
        Some("Windows")
    } else if ["ubuntu", "debian", "fedora", "raspberrypi", "linux", "archlinux"]
        .iter()
        .any(|k| h.contains(k))
    {
        Some("Linux")
    } else {
        None
    }
}

/// 反向 DNS 查询
async fn reverse_lookup(address: Ipv4Addr) -> Option<String> {
    tokio::task::spawn_blocking(move || lookup_addr(address))
        .await
        .ok()
        .flatten()
}

fn lookup_addr(address: Ipv4Addr) -> Option<String> {
    let name = match dns_lookup::lookup_addr(&IpAddr::V4(address)) {
        Ok(name) => name,
        Err(e) => {
            trace!("Reverse lookup of {} failed: {}", address, e);
            return None;
        }
    };
    let name = name.trim_end_matches('.');

    // 无 PTR 记录时解析器会原样返回数字地址
    if name.is_empty() || name == address.to_string() {
        None
    } else {
        Some(name.to_string())
    }
}
