//! 存在广播 / 监听
//!
//! - 广播端：每个周期向子网广播地址发送一条 [`DiscoveryMessage`]
//! - 监听端：在发现端口上接收广播，过滤掉自己发出的消息后排入目录队列
//!
//! 两个循环都只在取消令牌触发时退出，瞬时错误只记录日志。

use log::{debug, info, trace, warn};

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::directory::DirectoryUpdate;
use super::network::compute_scan_range;
use super::{DiscoveryMessage, LocalIdentity};

/// 端口被占用时的重试间隔
const BIND_RETRY_DELAY: Duration = Duration::from_secs(5);
/// 接收出错后重建套接字前的停顿
const RECV_ERROR_PAUSE: Duration = Duration::from_millis(500);
const MAX_DATAGRAM: usize = 2048;

/// 广播循环
pub async fn run_broadcast_loop(
    cancel: CancellationToken,
    identity: LocalIdentity,
    port: u16,
    interval: Duration,
) {
    let target = SocketAddr::from((compute_scan_range(identity.address).broadcast(), port));
    info!(
        "Broadcasting presence to {} every {}s",
        target,
        interval.as_secs()
    );

    let mut ticker = tokio::time::interval(interval);
    let mut socket: Option<UdpSocket> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if socket.is_none() {
            match open_broadcast_socket().await {
                Ok(s) => socket = Some(s),
                Err(e) => {
                    warn!("Failed to open broadcast socket: {}", e);
                    continue;
                }
            }
        }

        let payload = match DiscoveryMessage::presence(&identity).encode() {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to encode presence message: {}", e);
                continue;
            }
        };

        if let Some(s) = &socket
            && let Err(e) = s.send_to(&payload, target).await
        {
            warn!("Presence broadcast failed: {}", e);
            // 下个周期重建套接字
            socket = None;
        }
    }

    debug!("Presence broadcaster stopped");
}

async fn open_broadcast_socket() -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// 监听循环
///
/// `local` 为本机地址，地址相同的广播视为自己发出的，直接丢弃。
pub async fn run_listen_loop(
    cancel: CancellationToken,
    port: u16,
    local: Ipv4Addr,
    updates: mpsc::Sender<DirectoryUpdate>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    'outer: loop {
        if cancel.is_cancelled() {
            break;
        }

        let socket = match bind_reusable(port) {
            Ok(s) => {
                info!("Listening for presence broadcasts on UDP port {}", port);
                s
            }
            Err(e) => {
                warn!(
                    "Cannot bind UDP port {}: {}, retrying in {}s",
                    port,
                    e,
                    BIND_RETRY_DELAY.as_secs()
                );
                if sleep_or_cancel(&cancel, BIND_RETRY_DELAY).await {
                    break;
                }
                continue;
            }
        };

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                r = socket.recv_from(&mut buf) => r,
            };

            match received {
                Ok((len, from)) => {
                    if !handle_datagram(&buf[..len], from, local, &updates).await {
                        // 目录队列已关闭
                        break 'outer;
                    }
                }
                Err(e) => {
                    warn!("Presence receive error: {}, recreating socket", e);
                    break;
                }
            }
        }

        drop(socket);
        if sleep_or_cancel(&cancel, RECV_ERROR_PAUSE).await {
            break;
        }
    }

    debug!("Presence listener stopped");
}

/// 处理一条数据报，返回 false 表示队列已关闭
async fn handle_datagram(
    datagram: &[u8],
    from: SocketAddr,
    local: Ipv4Addr,
    updates: &mpsc::Sender<DirectoryUpdate>,
) -> bool {
    let Some(message) = DiscoveryMessage::parse(datagram) else {
        debug!("Ignoring malformed datagram from {}", from);
        return true;
    };

    if message.address() == local {
        trace!("Ignoring own presence broadcast");
        return true;
    }

    trace!("Presence from {} (sent by {})", message.address(), from);
    updates
        .send(DirectoryUpdate::Merge(message.into_peer_record()))
        .await
        .is_ok()
}

fn bind_reusable(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    UdpSocket::from_std(socket.into())
}

/// 等待一段时间，期间被取消则返回 true
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
