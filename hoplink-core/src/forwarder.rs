//! Mesh forwarder: frames written to this node by a peer.
//!
//! Each frame is decompressed and either handed to the local interface (this
//! node is the destination, or this is the border router and the destination
//! lies outside the mesh) or sent on to the next hop unchanged.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::activity::ActiveOperations;
use crate::address::Address;
use crate::codec::{self, CodecError, CompressedPacket, DESTINATION_OFFSET};
use crate::control::{AccessLists, ControlChannel, NodeRole};
use crate::error::RelayError;
use crate::interface::LocalInterface;
use crate::radio::{InboundFrame, MeshRadio};
use crate::relay::RelayStats;
use crate::routing::RoutingTable;
use crate::transmitter::{HopTransmitter, TransmissionOutcome};

/// Bound on handing a packet to the local interface
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to one inbound frame.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// Written to the local interface
    Delivered { destination: Address },
    /// Sent on towards its destination
    Relayed(TransmissionOutcome),
    /// Sender is not on the mesh list
    Rejected { from: Address },
    Dropped(RelayError),
}

/// Consumes [`MeshRadio::receive`] for one node.
pub struct MeshForwarder<I, R> {
    interface: Arc<I>,
    transmitter: HopTransmitter<R>,
    routes: Arc<RoutingTable>,
    access: Arc<AccessLists>,
    stats: Arc<RelayStats>,
    activity: ActiveOperations,
    local: Address,
    destination_offset: usize,
    delivery_timeout: Duration,
}

impl<I: LocalInterface, R: MeshRadio> MeshForwarder<I, R> {
    pub fn new(
        interface: Arc<I>,
        transmitter: HopTransmitter<R>,
        routes: Arc<RoutingTable>,
        local: Address,
        activity: ActiveOperations,
    ) -> Self {
        Self {
            interface,
            transmitter,
            routes,
            access: Arc::new(AccessLists::new(NodeRole::Router)),
            stats: Arc::new(RelayStats::new()),
            activity,
            local,
            destination_offset: DESTINATION_OFFSET,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_access_lists(mut self, access: Arc<AccessLists>) -> Self {
        self.access = access;
        self
    }

    pub fn with_stats(mut self, stats: Arc<RelayStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_destination_offset(mut self, offset: usize) -> Self {
        self.destination_offset = offset;
        self
    }

    /// Handle one frame.
    pub async fn forward(&self, inbound: InboundFrame) -> ForwardOutcome {
        if !self.access.admits_mesh_node(&inbound.from) {
            return ForwardOutcome::Rejected { from: inbound.from };
        }

        let decoded = CompressedPacket::decode(&inbound.frame)
            .and_then(|frame| frame.decompress().map(|packet| (frame, packet)));
        let (frame, packet) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => return ForwardOutcome::Dropped(RelayError::DecompressionFailure(e)),
        };

        let Some(destination) = codec::destination_from_packet(&packet, self.destination_offset)
        else {
            return ForwardOutcome::Dropped(RelayError::DecompressionFailure(
                CodecError::PacketTooShort {
                    actual: packet.len(),
                },
            ));
        };

        let leaves_mesh =
            self.access.is_border_router() && self.routes.lookup(&destination).is_none();

        if destination.same_node(&self.local) || leaves_mesh {
            return self.deliver(destination, &packet).await;
        }

        if self.routes.lookup(&destination).is_none() {
            return ForwardOutcome::Dropped(RelayError::RouteNotFound(destination));
        }

        let outcome = self.transmitter.send(&frame, &destination, &self.routes).await;
        ForwardOutcome::Relayed(outcome)
    }

    async fn deliver(&self, destination: Address, packet: &[u8]) -> ForwardOutcome {
        let _active = self.activity.begin();

        match tokio::time::timeout(self.delivery_timeout, self.interface.deliver(packet)).await {
            Ok(Ok(())) => ForwardOutcome::Delivered { destination },
            Ok(Err(e)) => ForwardOutcome::Dropped(RelayError::DeviceUnavailable(e)),
            Err(_) => ForwardOutcome::Dropped(RelayError::DeviceUnavailable(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "local delivery timed out"),
            )),
        }
    }

    fn record(&self, outcome: &ForwardOutcome) {
        self.stats.record_received();
        match outcome {
            ForwardOutcome::Delivered { destination } => {
                self.stats.record_delivered_locally();
                tracing::debug!(%destination, "Mesh packet delivered locally");
            }
            ForwardOutcome::Relayed(outcome) => {
                self.stats.record_transmission(outcome);
                tracing::info!(
                    delivered = outcome.delivered,
                    elapsed = ?outcome.elapsed,
                    next_hop = ?outcome.next_hop,
                    "Mesh packet relayed"
                );
            }
            ForwardOutcome::Rejected { from } => {
                self.stats.record_rejected();
                tracing::debug!(%from, "Sender not on mesh list, frame dropped");
            }
            ForwardOutcome::Dropped(error) => {
                self.stats.record_dropped(error);
                tracing::warn!(%error, "Mesh frame dropped");
            }
        }
    }

    /// Forward frames until `stop` is set.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        tracing::info!(local = %self.local, "Mesh forwarder started");

        loop {
            if *stop.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.transmitter.radio().receive() => received,
            };

            match received {
                Ok(inbound) => {
                    let outcome = self.forward(inbound).await;
                    self.record(&outcome);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Radio receive failed, mesh forwarder exiting");
                    break;
                }
            }
        }

        tracing::info!("Mesh forwarder stopped");
    }

    /// Run on a new task.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }
}
