//! LAN discovery: UDP multicast beacon, parse beacons/responses, maintain the reachable peer table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blu_core::wire::{decode_frame, encode_frame};
use blu_core::{Message, PeerId, TransportEvent, PROTOCOL_VERSION};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex};

use crate::host::HostEvent;

const MULTICAST_GROUP: &str = "239.255.60.61";
const BEACON_INTERVAL: Duration = Duration::from_secs(4);
const PEER_TIMEOUT: Duration = Duration::from_secs(16);

/// What this host advertises. Replaced on identity rotation; `advertising` follows start/stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advert {
    pub peer_id: PeerId,
    pub handle: String,
    pub advertising: bool,
}

pub struct PeerEntry {
    pub handle: String,
    pub addr: SocketAddr,
    last_seen: Instant,
}

/// Peers heard on the LAN, keyed by transport ID. Shared with the transport for dialing.
pub type PeerTable = Arc<Mutex<HashMap<PeerId, PeerEntry>>>;

pub fn new_peer_table() -> PeerTable {
    Arc::new(Mutex::new(HashMap::new()))
}

pub async fn peer_addr(table: &PeerTable, peer_id: &PeerId) -> Option<SocketAddr> {
    table.lock().await.get(peer_id).map(|p| p.addr)
}

/// Drop a peer so its next beacon is reported as a fresh discovery.
pub async fn forget(table: &PeerTable, peer_id: &PeerId) {
    table.lock().await.remove(peer_id);
}

pub async fn run_discovery(
    advert: watch::Receiver<Advert>,
    table: PeerTable,
    discovery_port: u16,
    transport_port: u16,
    events: mpsc::UnboundedSender<HostEvent>,
) -> std::io::Result<()> {
    let socket = Arc::new(make_multicast_socket(discovery_port).await?);

    let beacon_task = tokio::spawn(beacon_loop(
        socket.clone(),
        advert.clone(),
        table.clone(),
        discovery_port,
        transport_port,
    ));
    let recv_task = tokio::spawn(recv_loop(
        socket,
        advert,
        table.clone(),
        transport_port,
        events.clone(),
    ));
    let timeout_task = tokio::spawn(peer_timeout_loop(table, events));

    let _ = tokio::try_join!(beacon_task, recv_task, timeout_task);
    Ok(())
}

async fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(("0.0.0.0", discovery_port))?;
    let multicast: std::net::Ipv4Addr =
        MULTICAST_GROUP
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
            })?;
    std_sock.join_multicast_v4(&multicast, &std::net::Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_multicast_loop_v4(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

fn announce(advert: &Advert, transport_port: u16, response: bool) -> Option<Vec<u8>> {
    let msg = if response {
        Message::DiscoveryResponse {
            protocol_version: PROTOCOL_VERSION,
            peer_id: advert.peer_id,
            handle: advert.handle.clone(),
            listen_port: transport_port,
        }
    } else {
        Message::Beacon {
            protocol_version: PROTOCOL_VERSION,
            peer_id: advert.peer_id,
            handle: advert.handle.clone(),
            listen_port: transport_port,
        }
    };
    match encode_frame(&msg) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(error = %e, "could not encode discovery frame");
            None
        }
    }
}

/// Beacon every interval while advertising. Sends `Leave` for the previous identity when
/// advertising stops or the identity is replaced.
async fn beacon_loop(
    socket: Arc<UdpSocket>,
    mut advert: watch::Receiver<Advert>,
    table: PeerTable,
    discovery_port: u16,
    transport_port: u16,
) -> std::io::Result<()> {
    let dest: SocketAddr = format!("{}:{}", MULTICAST_GROUP, discovery_port)
        .parse()
        .map_err(|e: std::net::AddrParseError| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })?;
    let mut announced: Option<PeerId> = None;
    loop {
        let current = advert.borrow_and_update().clone();
        if let Some(old) = announced.filter(|id| !current.advertising || *id != current.peer_id) {
            if let Ok(frame) = encode_frame(&Message::Leave { peer_id: old }) {
                let _ = socket.send_to(&frame, dest).await;
            }
            if old != current.peer_id {
                table.lock().await.clear();
            }
            announced = None;
        }
        if current.advertising {
            if let Some(frame) = announce(&current, transport_port, false) {
                if let Err(e) = socket.send_to(&frame, dest).await {
                    tracing::debug!(error = %e, "beacon send failed");
                }
            }
            announced = Some(current.peer_id);
        }
        tokio::select! {
            _ = tokio::time::sleep(BEACON_INTERVAL) => {}
            changed = advert.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    advert: watch::Receiver<Advert>,
    table: PeerTable,
    transport_port: u16,
    events: mpsc::UnboundedSender<HostEvent>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let Ok((msg, _)) = decode_frame(&buf[..n]) else {
            tracing::trace!(%from, "ignoring undecodable datagram");
            continue;
        };
        let current = advert.borrow().clone();
        if let Message::Leave { peer_id } = msg {
            if table.lock().await.remove(&peer_id).is_some() {
                let _ = events.send(HostEvent::Transport(TransportEvent::Lost { peer_id }));
            }
            continue;
        }
        let Some((peer_id, handle, listen_port)) = msg.announced_peer() else {
            continue;
        };
        if !current.advertising || peer_id == current.peer_id {
            continue;
        }
        let addr = SocketAddr::new(from.ip(), listen_port);
        let changed = {
            let mut t = table.lock().await;
            let changed = t.get(&peer_id).map_or(true, |p| p.handle != handle);
            t.insert(
                peer_id,
                PeerEntry {
                    handle: handle.to_string(),
                    addr,
                    last_seen: Instant::now(),
                },
            );
            changed
        };
        if changed {
            tracing::debug!(peer = %peer_id, handle, %addr, "peer discovered");
            let _ = events.send(HostEvent::Transport(TransportEvent::Discovered {
                peer_id,
                handle: handle.to_string(),
            }));
        }
        if matches!(msg, Message::Beacon { .. }) {
            if let Some(frame) = announce(&current, transport_port, true) {
                let _ = socket.send_to(&frame, from).await;
            }
        }
    }
}

async fn peer_timeout_loop(
    table: PeerTable,
    events: mpsc::UnboundedSender<HostEvent>,
) -> std::io::Result<()> {
    loop {
        tokio::time::sleep(BEACON_INTERVAL).await;
        let now = Instant::now();
        let timed_out: Vec<PeerId> = {
            let mut t = table.lock().await;
            let list: Vec<PeerId> = t
                .iter()
                .filter(|(_, p)| now.duration_since(p.last_seen) >= PEER_TIMEOUT)
                .map(|(id, _)| *id)
                .collect();
            for id in &list {
                t.remove(id);
            }
            list
        };
        for peer_id in timed_out {
            tracing::debug!(peer = %peer_id, "peer timed out");
            let _ = events.send(HostEvent::Transport(TransportEvent::Lost { peer_id }));
        }
    }
}
