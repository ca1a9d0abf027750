//! Short-range wireless medium.
//!
//! The relay only needs four capabilities from the radio: advertise its own
//! presence, scan for a specific peer, write a payload to that peer (resolving
//! when the peer signals completion), and receive payloads written to it.
//! Everything above this trait is radio-agnostic; [`udp::UdpRadio`] emulates
//! the medium over UDP for relay-only deployments and tests.

use std::fmt;
use std::future::Future;
use std::io;

use crate::address::Address;

pub mod udp;

#[cfg(test)]
pub(crate) mod mock;

pub use udp::UdpRadio;

/// Radio errors
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("radio is shut down")]
    Closed,

    #[error("peer {0} has not been discovered")]
    UnknownPeer(Address),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("invalid datagram: {0}")]
    InvalidDatagram(&'static str),
}

/// What a node announces about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Ready to accept writes (kept alive for the whole node lifetime).
    Receive,
    /// About to transmit (kept alive for a single hop attempt).
    Transmit,
}

/// Selects the peer a scan is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerFilter {
    pub address: Address,
}

impl PeerFilter {
    /// Match the node with this address (zone ignored)
    pub fn address(address: Address) -> Self {
        Self { address }
    }

    pub fn matches(&self, candidate: &Address) -> bool {
        self.address.same_node(candidate)
    }
}

/// A peer found by [`MeshRadio::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub address: Address,
}

/// Payload written to this node by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub from: Address,
    pub frame: Vec<u8>,
}

/// Keeps an advertisement running; stops it on drop.
#[must_use = "the advertisement stops as soon as the guard is dropped"]
pub struct AdvertisementGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl AdvertisementGuard {
    /// Run `stop` when the guard is dropped.
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }
}

impl Drop for AdvertisementGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl fmt::Debug for AdvertisementGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvertisementGuard")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

/// Trait for wireless radio implementations
pub trait MeshRadio: Send + Sync + 'static {
    /// Address this radio identifies as on the mesh
    fn local_address(&self) -> Address;

    /// Start advertising. Runs until the returned guard is dropped.
    fn advertise(&self, presence: Presence) -> Result<AdvertisementGuard, RadioError>;

    /// Wait until a peer matching `filter` is seen. Unbounded; callers apply
    /// their own timeout.
    fn scan(&self, filter: PeerFilter) -> impl Future<Output = Result<Peer, RadioError>> + Send;

    /// Write `payload` to `peer`. Resolves once the peer signals completion.
    fn write(
        &self,
        peer: &Peer,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), RadioError>> + Send;

    /// Wait for the next payload written to this node.
    fn receive(&self) -> impl Future<Output = Result<InboundFrame, RadioError>> + Send;
}
