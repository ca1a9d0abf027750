//! One wireless hop: advertise, scan for the next hop, write, wait for the ack.
//!
//! The whole attempt runs under a single deadline. When the deadline passes
//! the attempt future is dropped, which drops the advertisement guard, so no
//! presence announcement outlives the attempt that started it.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::activity::ActiveOperations;
use crate::address::Address;
use crate::codec::CompressedPacket;
use crate::error::RelayError;
use crate::radio::{MeshRadio, PeerFilter, Presence, RadioError};
use crate::routing::RoutingTable;

/// How long a hop attempt may take before it counts as undelivered
pub const DEFAULT_TRANSMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of [`HopTransmitter::send`].
#[derive(Debug)]
pub struct TransmissionOutcome {
    /// The next hop acknowledged the frame
    pub delivered: bool,
    /// Time spent on the attempt
    pub elapsed: Duration,
    /// Next hop the frame was sent to, if a route existed
    pub next_hop: Option<Address>,
    /// Why the frame was not delivered
    pub error: Option<RelayError>,
}

impl TransmissionOutcome {
    fn undelivered(elapsed: Duration, next_hop: Option<Address>, error: RelayError) -> Self {
        Self {
            delivered: false,
            elapsed,
            next_hop,
            error: Some(error),
        }
    }
}

/// Sends compressed packets one hop along their routed path.
pub struct HopTransmitter<R> {
    radio: Arc<R>,
    local: Address,
    timeout: Duration,
    activity: ActiveOperations,
}

impl<R> Clone for HopTransmitter<R> {
    fn clone(&self) -> Self {
        Self {
            radio: Arc::clone(&self.radio),
            local: self.local,
            timeout: self.timeout,
            activity: self.activity.clone(),
        }
    }
}

impl<R: MeshRadio> HopTransmitter<R> {
    /// Create a new transmitter for the node at `local`.
    pub fn new(radio: Arc<R>, local: Address, activity: ActiveOperations) -> Self {
        Self {
            radio,
            local,
            timeout: DEFAULT_TRANSMIT_TIMEOUT,
            activity,
        }
    }

    /// Override the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn radio(&self) -> &Arc<R> {
        &self.radio
    }

    /// Send `packet` towards `destination`.
    ///
    /// Never fails: a missing route, a radio error or the deadline passing
    /// all produce `delivered = false` with the cause in
    /// [`TransmissionOutcome::error`].
    pub async fn send(
        &self,
        packet: &CompressedPacket,
        destination: &Address,
        routes: &RoutingTable,
    ) -> TransmissionOutcome {
        let started = Instant::now();

        let Some(next_hop) = routes.next_hop(destination, &self.local).copied() else {
            tracing::debug!(%destination, "No route for transmission");
            return TransmissionOutcome::undelivered(
                started.elapsed(),
                None,
                RelayError::RouteNotFound(*destination),
            );
        };

        let _active = self.activity.begin();
        let frame = packet.encode();

        let result = tokio::time::timeout(self.timeout, self.attempt(next_hop, &frame)).await;
        let elapsed = started.elapsed();

        match result {
            Ok(Ok(())) => {
                tracing::debug!(%destination, %next_hop, ?elapsed, bytes = frame.len(), "Hop delivered");
                TransmissionOutcome {
                    delivered: true,
                    elapsed,
                    next_hop: Some(next_hop),
                    error: None,
                }
            }
            Ok(Err(source)) => {
                tracing::warn!(%destination, %next_hop, error = %source, "Hop transmission failed");
                TransmissionOutcome::undelivered(
                    elapsed,
                    Some(next_hop),
                    RelayError::TransmissionFailure { next_hop, source },
                )
            }
            Err(_) => {
                tracing::warn!(%destination, %next_hop, timeout = ?self.timeout, "Hop transmission timed out");
                TransmissionOutcome::undelivered(
                    elapsed,
                    Some(next_hop),
                    RelayError::TransmissionTimeout {
                        next_hop,
                        timeout: self.timeout,
                    },
                )
            }
        }
    }

    async fn attempt(&self, next_hop: Address, frame: &[u8]) -> Result<(), RadioError> {
        let _presence = self.radio.advertise(Presence::Transmit)?;
        let peer = self.radio.scan(PeerFilter::address(next_hop)).await?;
        self.radio.write(&peer, frame).await
    }
}
