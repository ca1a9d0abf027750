//! UDP emulation of the wireless medium.
//!
//! Every node binds one UDP socket. "Range" is the configured neighbor list:
//! a node only hears beacons and data from the `(mesh address, endpoint)`
//! pairs it has been told about.
//!
//! # Datagram Format
//!
//! - Magic number (4 bytes): `HOPL`
//! - Version (1 byte)
//! - Kind (1 byte): beacon, solicit, data or ack
//! - Sequence number (4 bytes): pairs a data datagram with its ack
//! - Sender address (16 bytes)
//! - Body (variable): the mesh frame for data datagrams, empty otherwise
//!
//! While a [`Presence::Receive`] advertisement is active the node beacons to
//! its neighbors every `beacon_interval`, answers solicitations right away,
//! and acknowledges data. A [`Presence::Transmit`] advertisement sends
//! solicitations so that receivers answer without waiting for their next
//! beacon.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{AdvertisementGuard, InboundFrame, MeshRadio, Peer, PeerFilter, Presence, RadioError};
use crate::address::Address;
use crate::codec::{FRAME_PREFIX_LEN, MTU};

/// Magic number identifying radio datagrams (ASCII: "HOPL")
pub const RADIO_MAGIC: u32 = 0x484F_504C;

/// Current datagram version
pub const RADIO_VERSION: u8 = 1;

/// Largest body a data datagram may carry (one encoded mesh frame)
pub const MAX_BODY_LEN: usize = FRAME_PREFIX_LEN + MTU;

/// Default interval between presence beacons
pub const DEFAULT_BEACON_INTERVAL: Duration = Duration::from_millis(500);

const INBOUND_QUEUE_LEN: usize = 64;
const BEACON_CHANNEL_LEN: usize = 64;

/// A beacon older than this many intervals no longer counts as "in range".
const DISCOVERY_TTL_INTERVALS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum DatagramKind {
    Beacon = 1,
    Solicit = 2,
    Data = 3,
    Ack = 4,
}

impl DatagramKind {
    fn from_raw(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Beacon),
            2 => Some(Self::Solicit),
            3 => Some(Self::Data),
            4 => Some(Self::Ack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DatagramHeader {
    kind: DatagramKind,
    sequence: u32,
    sender: Address,
}

impl DatagramHeader {
    const SIZE: usize = 26;

    fn encode(&self, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE + body.len());
        buf.extend_from_slice(&RADIO_MAGIC.to_be_bytes());
        buf.push(RADIO_VERSION);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.sender.octets());
        buf.extend_from_slice(body);
        buf
    }

    fn decode(buf: &[u8]) -> Result<(Self, &[u8]), RadioError> {
        if buf.len() < Self::SIZE {
            return Err(RadioError::InvalidDatagram("shorter than header"));
        }

        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != RADIO_MAGIC {
            return Err(RadioError::InvalidDatagram("bad magic"));
        }
        if buf[4] != RADIO_VERSION {
            return Err(RadioError::InvalidDatagram("unsupported version"));
        }
        let kind =
            DatagramKind::from_raw(buf[5]).ok_or(RadioError::InvalidDatagram("unknown kind"))?;
        let sequence = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);

        let mut octets = [0u8; 16];
        octets.copy_from_slice(&buf[10..26]);

        let body = &buf[Self::SIZE..];
        if body.len() > MAX_BODY_LEN {
            return Err(RadioError::InvalidDatagram("body too large"));
        }

        Ok((
            Self {
                kind,
                sequence,
                sender: Address::from_octets(octets),
            },
            body,
        ))
    }
}

struct Shared {
    local: Address,
    socket: UdpSocket,
    beacon_interval: Duration,
    neighbors: Mutex<Vec<(Address, SocketAddr)>>,
    /// Number of live receive advertisements
    receivers: AtomicUsize,
    discovered: Mutex<HashMap<Ipv6Addr, (SocketAddr, Instant)>>,
    beacons: broadcast::Sender<Address>,
    pending_acks: Mutex<HashMap<u32, oneshot::Sender<()>>>,
    next_sequence: AtomicU32,
    inbound_tx: mpsc::Sender<InboundFrame>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundFrame>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn is_receiving(&self) -> bool {
        self.receivers.load(Ordering::Acquire) > 0
    }

    fn in_range(&self, sender: &Address, from: SocketAddr) -> bool {
        lock(&self.neighbors)
            .iter()
            .any(|(addr, endpoint)| addr.same_node(sender) && *endpoint == from)
    }

    fn discovery_ttl(&self) -> Duration {
        self.beacon_interval * DISCOVERY_TTL_INTERVALS
    }

    fn fresh_endpoint(&self, address: &Address) -> Option<SocketAddr> {
        let discovered = lock(&self.discovered);
        let (endpoint, seen) = discovered.get(&address.ip())?;
        (seen.elapsed() <= self.discovery_ttl()).then_some(*endpoint)
    }

    fn known_endpoint(&self, address: &Address) -> Option<SocketAddr> {
        lock(&self.discovered)
            .get(&address.ip())
            .map(|(endpoint, _)| *endpoint)
    }

    fn observe(&self, sender: Address, from: SocketAddr) {
        lock(&self.discovered).insert(sender.ip(), (from, Instant::now()));
        // Nobody scanning is fine.
        let _ = self.beacons.send(sender);
    }

    async fn send(&self, kind: DatagramKind, sequence: u32, body: &[u8], to: SocketAddr) {
        let datagram = DatagramHeader {
            kind,
            sequence,
            sender: self.local,
        }
        .encode(body);

        if let Err(e) = self.socket.send_to(&datagram, to).await {
            tracing::debug!(?kind, %to, error = %e, "Radio send failed");
        }
    }

    async fn broadcast(&self, kind: DatagramKind) {
        let endpoints: Vec<SocketAddr> = lock(&self.neighbors)
            .iter()
            .map(|(_, endpoint)| *endpoint)
            .collect();

        for endpoint in endpoints {
            self.send(kind, 0, &[], endpoint).await;
        }
    }

    async fn handle(&self, header: DatagramHeader, body: &[u8], from: SocketAddr) {
        match header.kind {
            DatagramKind::Beacon => self.observe(header.sender, from),
            DatagramKind::Solicit => {
                if self.is_receiving() {
                    self.send(DatagramKind::Beacon, 0, &[], from).await;
                }
            }
            DatagramKind::Data => {
                if !self.is_receiving() {
                    tracing::trace!(from = %header.sender, "Not receiving, data ignored");
                    return;
                }

                let frame = InboundFrame {
                    from: header.sender,
                    frame: body.to_vec(),
                };
                match self.inbound_tx.try_send(frame) {
                    Ok(()) => self.send(DatagramKind::Ack, header.sequence, &[], from).await,
                    Err(_) => {
                        tracing::warn!(from = %header.sender, "Inbound queue full, frame dropped")
                    }
                }
            }
            DatagramKind::Ack => {
                if let Some(tx) = lock(&self.pending_acks).remove(&header.sequence) {
                    let _ = tx.send(());
                }
            }
        }
    }
}

async fn receive_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; DatagramHeader::SIZE + MAX_BODY_LEN + 1];

    loop {
        let (len, from) = match shared.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(error = %e, "Radio receive error");
                continue;
            }
        };

        let (header, body) = match DatagramHeader::decode(&buf[..len]) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(%from, error = %e, "Dropping datagram");
                continue;
            }
        };

        if header.sender.same_node(&shared.local) {
            continue;
        }
        if !shared.in_range(&header.sender, from) {
            tracing::trace!(sender = %header.sender, %from, "Out of range, ignored");
            continue;
        }

        shared.handle(header, body, from).await;
    }
}

/// Removes the pending-ack slot if the write is abandoned.
struct PendingAck<'a> {
    shared: &'a Shared,
    sequence: u32,
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending_acks).remove(&self.sequence);
    }
}

/// [`MeshRadio`] over UDP.
pub struct UdpRadio {
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
}

impl UdpRadio {
    /// Bind the radio socket and start the receive task.
    pub async fn bind(
        local: Address,
        bind_addr: SocketAddr,
        neighbors: Vec<(Address, SocketAddr)>,
        beacon_interval: Duration,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let (beacons, _) = broadcast::channel(BEACON_CHANNEL_LEN);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_LEN);

        let shared = Arc::new(Shared {
            local: local.without_scope(),
            socket,
            beacon_interval,
            neighbors: Mutex::new(neighbors),
            receivers: AtomicUsize::new(0),
            discovered: Mutex::new(HashMap::new()),
            beacons,
            pending_acks: Mutex::new(HashMap::new()),
            next_sequence: AtomicU32::new(1),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        });

        let receiver = tokio::spawn(receive_loop(Arc::clone(&shared)));

        tracing::info!(
            address = %local,
            endpoint = %shared.socket.local_addr()?,
            "UDP radio bound"
        );

        Ok(Self { shared, receiver })
    }

    /// Get the bound UDP endpoint
    pub fn local_endpoint(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// Put another node in range.
    pub fn add_neighbor(&self, address: Address, endpoint: SocketAddr) {
        lock(&self.shared.neighbors).push((address, endpoint));
    }
}

impl Drop for UdpRadio {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

impl MeshRadio for UdpRadio {
    fn local_address(&self) -> Address {
        self.shared.local
    }

    fn advertise(&self, presence: Presence) -> Result<AdvertisementGuard, RadioError> {
        let kind = match presence {
            Presence::Receive => {
                self.shared.receivers.fetch_add(1, Ordering::AcqRel);
                DatagramKind::Beacon
            }
            Presence::Transmit => DatagramKind::Solicit,
        };

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.beacon_interval);
            loop {
                ticker.tick().await;
                shared.broadcast(kind).await;
            }
        });

        let shared = Arc::clone(&self.shared);
        Ok(AdvertisementGuard::new(move || {
            task.abort();
            if presence == Presence::Receive {
                shared.receivers.fetch_sub(1, Ordering::AcqRel);
            }
        }))
    }

    async fn scan(&self, filter: PeerFilter) -> Result<Peer, RadioError> {
        // Subscribe before checking the cache so no beacon falls in between.
        let mut beacons = self.shared.beacons.subscribe();

        if self.shared.fresh_endpoint(&filter.address).is_some() {
            return Ok(Peer {
                address: filter.address.without_scope(),
            });
        }

        loop {
            match beacons.recv().await {
                Ok(address) if filter.matches(&address) => return Ok(Peer { address }),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.shared.fresh_endpoint(&filter.address).is_some() {
                        return Ok(Peer {
                            address: filter.address.without_scope(),
                        });
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(RadioError::Closed),
            }
        }
    }

    async fn write(&self, peer: &Peer, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > MAX_BODY_LEN {
            return Err(RadioError::PayloadTooLarge(payload.len()));
        }

        let endpoint = self
            .shared
            .known_endpoint(&peer.address)
            .ok_or(RadioError::UnknownPeer(peer.address))?;

        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending_acks).insert(sequence, tx);
        let _pending = PendingAck {
            shared: &self.shared,
            sequence,
        };

        let datagram = DatagramHeader {
            kind: DatagramKind::Data,
            sequence,
            sender: self.shared.local,
        }
        .encode(payload);
        self.shared.socket.send_to(&datagram, endpoint).await?;

        rx.await.map_err(|_| RadioError::Closed)
    }

    async fn receive(&self) -> Result<InboundFrame, RadioError> {
        self.shared
            .inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(RadioError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_INTERVAL: Duration = Duration::from_millis(50);

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn any_local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn radio_pair() -> (UdpRadio, UdpRadio) {
        let a_addr = addr("fe80::b826:1c8b:ccbb:32f0");
        let b_addr = addr("fe80::291:a8ff:feeb:27b8");

        let a = UdpRadio::bind(a_addr, any_local(), Vec::new(), TEST_INTERVAL).await.unwrap();
        let b = UdpRadio::bind(b_addr, any_local(), Vec::new(), TEST_INTERVAL).await.unwrap();
        a.add_neighbor(b_addr, b.local_endpoint().unwrap());
        b.add_neighbor(a_addr, a.local_endpoint().unwrap());
        (a, b)
    }

    #[test]
    fn test_header_encode_decode() {
        let header = DatagramHeader {
            kind: DatagramKind::Data,
            sequence: 42,
            sender: addr("fe80::1"),
        };
        let buf = header.encode(&[1, 2, 3]);
        assert_eq!(buf.len(), DatagramHeader::SIZE + 3);

        let (decoded, body) = DatagramHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(body, &[1, 2, 3]);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = DatagramHeader {
            kind: DatagramKind::Beacon,
            sequence: 0,
            sender: addr("fe80::1"),
        }
        .encode(&[]);
        buf[0] = b'X';

        assert!(matches!(
            DatagramHeader::decode(&buf),
            Err(RadioError::InvalidDatagram("bad magic"))
        ));
        assert!(DatagramHeader::decode(&buf[..10]).is_err());
    }

    #[tokio::test]
    async fn test_scan_write_receive() {
        let (a, b) = radio_pair().await;
        let _listening = b.advertise(Presence::Receive).unwrap();

        let _announce = a.advertise(Presence::Transmit).unwrap();
        let peer = tokio::time::timeout(
            Duration::from_secs(2),
            a.scan(PeerFilter::address(b.local_address())),
        )
        .await
        .expect("scan timed out")
        .unwrap();
        assert!(peer.address.same_node(&b.local_address()));

        tokio::time::timeout(Duration::from_secs(2), a.write(&peer, b"frame"))
            .await
            .expect("write was not acknowledged")
            .unwrap();

        let inbound = b.receive().await.unwrap();
        assert_eq!(inbound.frame, b"frame");
        assert!(inbound.from.same_node(&a.local_address()));
    }

    #[tokio::test]
    async fn test_write_without_receive_presence_is_not_acked() {
        let (a, b) = radio_pair().await;

        let listening = b.advertise(Presence::Receive).unwrap();
        let peer = tokio::time::timeout(
            Duration::from_secs(2),
            a.scan(PeerFilter::address(b.local_address())),
        )
        .await
        .unwrap()
        .unwrap();
        drop(listening);

        let write = tokio::time::timeout(Duration::from_millis(300), a.write(&peer, b"x")).await;
        assert!(write.is_err(), "write should not complete");
        assert!(lock(&a.shared.pending_acks).is_empty());
    }

    #[tokio::test]
    async fn test_scan_ignores_out_of_range_node() {
        let a = UdpRadio::bind(addr("fe80::a"), any_local(), Vec::new(), TEST_INTERVAL)
            .await
            .unwrap();
        let b = UdpRadio::bind(addr("fe80::b"), any_local(), Vec::new(), TEST_INTERVAL)
            .await
            .unwrap();
        // b beacons to a, but a does not have b as a neighbor.
        b.add_neighbor(a.local_address(), a.local_endpoint().unwrap());
        let _listening = b.advertise(Presence::Receive).unwrap();

        let scan = tokio::time::timeout(
            Duration::from_millis(300),
            a.scan(PeerFilter::address(b.local_address())),
        )
        .await;
        assert!(scan.is_err());
    }

    #[tokio::test]
    async fn test_write_to_undiscovered_peer() {
        let (a, _b) = radio_pair().await;
        let peer = Peer {
            address: addr("fe80::3ff8:d2ff:feeb:27b8"),
        };

        assert!(matches!(
            a.write(&peer, b"x").await,
            Err(RadioError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_write_rejects_oversized_payload() {
        let (a, b) = radio_pair().await;
        let peer = Peer {
            address: b.local_address(),
        };

        let payload = vec![0u8; MAX_BODY_LEN + 1];
        assert!(matches!(
            a.write(&peer, &payload).await,
            Err(RadioError::PayloadTooLarge(_))
        ));
    }
}
