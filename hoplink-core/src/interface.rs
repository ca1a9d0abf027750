//! Local IPv6 interface (the packet source/sink on the host side).
//!
//! The relay never keeps a handle open between cycles: each listen attempt
//! opens an exclusively-owned [`InterfaceHandle`], uses it, and drops it,
//! which closes it on every exit path including timeouts. Packets coming out
//! of the mesh go the other way through [`LocalInterface::deliver`], which
//! does not need a handle.
//!
//! Implementations:
//! - [`ChannelInterface`]: in-memory, backed by tokio channels. Used by
//!   relay-only nodes and tests.
//! - [`linux::TunInterface`]: Linux TUN device (`tun-rs`).

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::TunInterface;

/// Trait for local interface implementations
pub trait LocalInterface: Send + Sync + 'static {
    /// Exclusively-owned open channel to the interface; closed on drop.
    type Handle: InterfaceHandle;

    /// Get the name of the interface
    fn name(&self) -> &str;

    /// Get the MTU of the interface
    fn mtu(&self) -> usize;

    /// Open a new handle.
    fn open(&self) -> impl Future<Output = io::Result<Self::Handle>> + Send;

    /// Hand a packet to the host stack.
    fn deliver(&self, packet: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// An open handle to a [`LocalInterface`].
pub trait InterfaceHandle: Send + 'static {
    /// Wait for the next packet. Returns the number of bytes written to `buf`.
    ///
    /// Cancel-safe: dropping the future loses no packet that was not returned.
    fn read_packet(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// In-memory interface.
///
/// Packets pushed through [`ChannelRemote::inject`] come out of
/// `read_packet`; delivered packets come out of [`ChannelRemote::delivered`].
pub struct ChannelInterface {
    name: String,
    mtu: usize,
    inbound: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    delivered: mpsc::Sender<Vec<u8>>,
    available: Arc<AtomicBool>,
}

/// Test/driver side of a [`ChannelInterface`].
pub struct ChannelRemote {
    inbound: mpsc::Sender<Vec<u8>>,
    delivered: mpsc::Receiver<Vec<u8>>,
    available: Arc<AtomicBool>,
}

impl ChannelInterface {
    /// Create an interface with queues of `capacity` packets each.
    pub fn new(name: &str, mtu: usize, capacity: usize) -> (Self, ChannelRemote) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (delivered_tx, delivered_rx) = mpsc::channel(capacity);
        let available = Arc::new(AtomicBool::new(true));

        let iface = Self {
            name: name.to_string(),
            mtu,
            inbound: Arc::new(Mutex::new(inbound_rx)),
            delivered: delivered_tx,
            available: Arc::clone(&available),
        };
        let remote = ChannelRemote {
            inbound: inbound_tx,
            delivered: delivered_rx,
            available,
        };
        (iface, remote)
    }
}

impl LocalInterface for ChannelInterface {
    type Handle = ChannelHandle;

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn open(&self) -> io::Result<ChannelHandle> {
        if !self.available.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("interface '{}' is not available", self.name),
            ));
        }

        Ok(ChannelHandle {
            inbound: Arc::clone(&self.inbound).lock_owned().await,
        })
    }

    async fn deliver(&self, packet: &[u8]) -> io::Result<()> {
        if packet.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot write empty packet",
            ));
        }

        self.delivered
            .send(packet.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "delivery queue closed"))
    }
}

/// Open handle to a [`ChannelInterface`].
pub struct ChannelHandle {
    inbound: OwnedMutexGuard<mpsc::Receiver<Vec<u8>>>,
}

impl InterfaceHandle for ChannelHandle {
    async fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(packet) = self.inbound.recv().await else {
            // Nobody can inject any more: behave like a quiet interface.
            return std::future::pending().await;
        };

        if packet.len() > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Packet too large for buffer: {} bytes (buffer: {})",
                    packet.len(),
                    buf.len()
                ),
            ));
        }

        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }
}

impl ChannelRemote {
    /// Queue a packet for the relay to pick up.
    pub async fn inject(&self, packet: Vec<u8>) -> bool {
        self.inbound.send(packet).await.is_ok()
    }

    /// Next packet the relay delivered to the host.
    pub async fn delivered(&mut self) -> Option<Vec<u8>> {
        self.delivered.recv().await
    }

    /// Make subsequent `open()` calls succeed or fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }
}
