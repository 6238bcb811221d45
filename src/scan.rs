//! Local /24 peer discovery by concurrent TCP connect probes

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Any routable public address works; no datagram is ever sent
const ROUTE_PROBE_TARGET: &str = "8.8.8.8:80";

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub port: u16,
    pub probe_timeout: Duration,
    pub max_in_flight: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            port: crate::config::DEFAULT_PORT,
            probe_timeout: Duration::from_secs(1),
            max_in_flight: 100,
        }
    }
}

pub struct PeerScanner {
    self_addr: Ipv4Addr,
    opts: ScanOptions,
}

impl PeerScanner {
    /// Discover the local address up front; without it there is no subnet to scan
    pub fn new(opts: ScanOptions) -> Result<Self> {
        let self_addr = local_ipv4().context("Cannot find IP")?;
        Ok(Self::with_address(self_addr, opts))
    }

    pub fn with_address(self_addr: Ipv4Addr, opts: ScanOptions) -> Self {
        Self { self_addr, opts }
    }

    pub fn self_addr(&self) -> Ipv4Addr {
        self.self_addr
    }

    /// Probe .1 through .255 of our /24 and return every other responder
    pub async fn scan(&self) -> BTreeSet<Ipv4Addr> {
        let o = self.self_addr.octets();
        scan_subnet(
            self.self_addr,
            [o[0], o[1], o[2]],
            self.opts.port,
            self.opts.probe_timeout,
            self.opts.max_in_flight,
        )
        .await
    }
}

/// TCP connect probe; any failure means "not a peer"
pub async fn tcp_probe(addr: SocketAddrV4, wait: Duration) -> bool {
    matches!(timeout(wait, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

pub async fn scan_subnet(
    self_addr: Ipv4Addr,
    prefix: [u8; 3],
    port: u16,
    probe_timeout: Duration,
    max_in_flight: usize,
) -> BTreeSet<Ipv4Addr> {
    scan_subnet_with(self_addr, prefix, port, max_in_flight, move |addr| {
        tcp_probe(addr, probe_timeout)
    })
    .await
}

/// Run `probe` for every host suffix 1..=255 with at most `max_in_flight`
/// probes outstanding, waiting for all of them before returning.
pub async fn scan_subnet_with<F, Fut>(
    self_addr: Ipv4Addr,
    prefix: [u8; 3],
    port: u16,
    max_in_flight: usize,
    probe: F,
) -> BTreeSet<Ipv4Addr>
where
    F: Fn(SocketAddrV4) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let gate = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let probe = Arc::new(probe);
    let mut workers = JoinSet::new();

    for host in 1..=255u8 {
        let ip = Ipv4Addr::new(prefix[0], prefix[1], prefix[2], host);
        // Acquire before spawning so no more than max_in_flight sockets exist at once
        let permit = match gate.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let probe = probe.clone();
        workers.spawn(async move {
            let open = (probe.as_ref())(SocketAddrV4::new(ip, port)).await;
            drop(permit);
            (open && ip != self_addr).then_some(ip)
        });
    }

    let mut found = BTreeSet::new();
    while let Some(res) = workers.join_next().await {
        if let Ok(Some(ip)) = res {
            found.insert(ip);
        }
    }
    found
}

/// Local outbound IPv4, falling back to interface enumeration when offline
pub fn local_ipv4() -> Result<Ipv4Addr> {
    if let Some(ip) = outbound_ipv4() {
        return Ok(ip);
    }
    interface_ipv4().ok_or_else(|| anyhow::anyhow!("no private IPv4 address on any interface"))
}

fn outbound_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(ROUTE_PROBE_TARGET).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
        _ => None,
    }
}

fn interface_ipv4() -> Option<Ipv4Addr> {
    use sysinfo::Networks;
    let networks = Networks::new_with_refreshed_list();
    let candidates: Vec<Ipv4Addr> = networks
        .list()
        .values()
        .flat_map(|data| data.ip_networks().iter().map(|n| n.addr))
        .filter_map(|addr| match addr {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .collect();
    pick_private(&candidates)
}

fn pick_private(candidates: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    candidates
        .iter()
        .copied()
        .find(|ip| ip.is_private() && !ip.is_loopback())
}
