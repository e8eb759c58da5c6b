//! 本机地址与扫描网段

use log::debug;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// 仅用于让内核选择出口网卡，不会真正发送数据
const ROUTE_PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// 获取本机局域网 IPv4 地址
///
/// 任何失败都回退到 127.0.0.1，从不向调用方报错。
pub fn resolve_local_address() -> Ipv4Addr {
    match route_local_address() {
        Ok(addr) if !addr.is_unspecified() => addr,
        Ok(_) => Ipv4Addr::LOCALHOST,
        Err(e) => {
            debug!("Could not determine local address: {}, using loopback", e);
            Ipv4Addr::LOCALHOST
        }
    }
}

fn route_local_address() -> std::io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_PROBE_TARGET)?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no IPv4 route",
        )),
    }
}

/// 固定 /24 网段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    network: Ipv4Addr,
}

impl ScanRange {
    pub const PREFIX_LEN: u8 = 24;

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        let [a, b, c, _] = self.network.octets();
        Ipv4Addr::new(a, b, c, 255)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        addr.octets()[..3] == self.network.octets()[..3]
    }

    /// 网段内所有主机地址 (.1 - .254)
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let [a, b, c, _] = self.network.octets();
        (1..=254u8).map(move |d| Ipv4Addr::new(a, b, c, d))
    }

    /// 扫描目标：网段内除本机以外的所有主机
    pub fn scan_targets(&self, local: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.hosts().filter(|addr| *addr != local).collect()
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, Self::PREFIX_LEN)
    }
}

/// 由地址推出所在 /24 网段（最后一个字节清零）
pub fn compute_scan_range(address: Ipv4Addr) -> ScanRange {
    let [a, b, c, _] = address.octets();
    ScanRange {
        network: Ipv4Addr::new(a, b, c, 0),
    }
}
