//! Relay loop: local interface -> routing -> one wireless hop.
//!
//! One cycle is `Idle -> Listening -> Routing -> Transmitting -> Idle`. The
//! stop flag is only looked at when a cycle starts; a listen or transmit
//! already in flight runs to its own deadline. No failure inside a cycle ends
//! the loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::address::Address;
use crate::codec::{self, CodecError, DESTINATION_OFFSET};
use crate::control::{AccessLists, NodeRole};
use crate::error::RelayError;
use crate::interface::LocalInterface;
use crate::listener::{InboundListener, DEFAULT_LISTEN_TIMEOUT};
use crate::radio::MeshRadio;
use crate::routing::RoutingTable;
use crate::transmitter::{HopTransmitter, TransmissionOutcome};

/// Where the relay loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Listening,
    Routing,
    Transmitting,
    Stopped,
}

/// What one cycle did with its packet.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Nothing arrived within the listen window
    ListenTimedOut,
    /// The local interface could not be opened or read
    ListenFailed(RelayError),
    /// Source is not on the allow-list
    SourceRejected { source: Address },
    /// Packet was addressed to this node
    LocallyConsumed { destination: Address },
    /// Packet dropped before transmission
    Dropped(RelayError),
    /// A hop was attempted
    Transmitted(TransmissionOutcome),
}

/// Counters shared by the relay workers.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    locally_consumed: AtomicU64,
    delivered_locally: AtomicU64,
    rejected: AtomicU64,
    route_misses: AtomicU64,
    codec_failures: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    listen_timeouts: AtomicU64,
    listen_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub received: u64,
    pub locally_consumed: u64,
    pub delivered_locally: u64,
    pub rejected: u64,
    pub route_misses: u64,
    pub codec_failures: u64,
    pub delivered: u64,
    pub failed: u64,
    pub listen_timeouts: u64,
    pub listen_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RelayStatsSnapshot {
            received: get(&self.received),
            locally_consumed: get(&self.locally_consumed),
            delivered_locally: get(&self.delivered_locally),
            rejected: get(&self.rejected),
            route_misses: get(&self.route_misses),
            codec_failures: get(&self.codec_failures),
            delivered: get(&self.delivered),
            failed: get(&self.failed),
            listen_timeouts: get(&self.listen_timeouts),
            listen_failures: get(&self.listen_failures),
        }
    }

    pub(crate) fn record_received(&self) {
        bump(&self.received);
    }

    pub(crate) fn record_delivered_locally(&self) {
        bump(&self.delivered_locally);
    }

    pub(crate) fn record_rejected(&self) {
        bump(&self.rejected);
    }

    pub(crate) fn record_dropped(&self, error: &RelayError) {
        match error {
            RelayError::RouteNotFound(_) => bump(&self.route_misses),
            RelayError::CompressionFailure(_) | RelayError::DecompressionFailure(_) => {
                bump(&self.codec_failures)
            }
            _ => bump(&self.failed),
        }
    }

    pub(crate) fn record_transmission(&self, outcome: &TransmissionOutcome) {
        if outcome.delivered {
            bump(&self.delivered);
        } else if let Some(error @ RelayError::RouteNotFound(_)) = &outcome.error {
            self.record_dropped(error);
        } else {
            bump(&self.failed);
        }
    }
}

impl fmt::Display for RelayStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} consumed={} delivered_locally={} rejected={} route_misses={} \
             codec_failures={} hops_delivered={} hops_failed={} listen_timeouts={} listen_failures={}",
            self.received,
            self.locally_consumed,
            self.delivered_locally,
            self.rejected,
            self.route_misses,
            self.codec_failures,
            self.delivered,
            self.failed,
            self.listen_timeouts,
            self.listen_failures,
        )
    }
}

/// Relays packets from one local interface into the mesh.
pub struct RelayLoop<I, R> {
    listener: InboundListener<I>,
    transmitter: HopTransmitter<R>,
    routes: Arc<RoutingTable>,
    access: Arc<AccessLists>,
    stats: Arc<RelayStats>,
    local: Address,
    listen_timeout: Duration,
    destination_offset: usize,
    state: watch::Sender<RelayState>,
}

impl<I: LocalInterface, R: MeshRadio> RelayLoop<I, R> {
    /// Create a new relay loop for the node at `local`.
    pub fn new(
        listener: InboundListener<I>,
        transmitter: HopTransmitter<R>,
        routes: Arc<RoutingTable>,
        local: Address,
    ) -> Self {
        let (state, _) = watch::channel(RelayState::Idle);
        Self {
            listener,
            transmitter,
            routes,
            access: Arc::new(AccessLists::new(NodeRole::Router)),
            stats: Arc::new(RelayStats::new()),
            local,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            destination_offset: DESTINATION_OFFSET,
            state,
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

    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }

    /// Read destinations at `offset` instead of the standard 24.
    pub fn with_destination_offset(mut self, offset: usize) -> Self {
        if offset != DESTINATION_OFFSET {
            tracing::warn!(offset, "Using non-standard destination offset");
        }
        self.destination_offset = offset;
        self
    }

    /// Watch the loop's state.
    pub fn state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    fn enter(&self, state: RelayState) {
        self.state.send_replace(state);
    }

    /// Run a single cycle.
    pub async fn cycle(&self) -> CycleOutcome {
        self.enter(RelayState::Listening);
        let packet = match self.listener.listen_detailed(self.listen_timeout).await {
            Ok(packet) => packet,
            Err(RelayError::ListenTimeout(_)) => return CycleOutcome::ListenTimedOut,
            Err(e) => return CycleOutcome::ListenFailed(e),
        };

        self.enter(RelayState::Routing);

        if let Some(source) = codec::source_from_packet(&packet) {
            if !self.access.admits_source(&source) {
                return CycleOutcome::SourceRejected { source };
            }
        }

        let Some(destination) = codec::destination_from_packet(&packet, self.destination_offset)
        else {
            return CycleOutcome::Dropped(RelayError::CompressionFailure(
                CodecError::PacketTooShort {
                    actual: packet.len(),
                },
            ));
        };

        if destination.same_node(&self.local) {
            return CycleOutcome::LocallyConsumed { destination };
        }

        if self.routes.lookup(&destination).is_none() {
            return CycleOutcome::Dropped(RelayError::RouteNotFound(destination));
        }

        let compressed = match codec::compress(&packet) {
            Ok(compressed) => compressed,
            Err(e) => return CycleOutcome::Dropped(RelayError::CompressionFailure(e)),
        };

        self.enter(RelayState::Transmitting);
        let outcome = self
            .transmitter
            .send(&compressed, &destination, &self.routes)
            .await;
        CycleOutcome::Transmitted(outcome)
    }

    fn record(&self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::ListenTimedOut => {
                bump(&self.stats.listen_timeouts);
                tracing::trace!("Listen window elapsed");
            }
            CycleOutcome::ListenFailed(_) => bump(&self.stats.listen_failures),
            CycleOutcome::SourceRejected { source } => {
                self.stats.record_received();
                self.stats.record_rejected();
                tracing::debug!(%source, "Source not on allow-list, packet dropped");
            }
            CycleOutcome::LocallyConsumed { destination } => {
                self.stats.record_received();
                bump(&self.stats.locally_consumed);
                tracing::debug!(%destination, "Packet addressed to this node");
            }
            CycleOutcome::Dropped(error) => {
                self.stats.record_received();
                self.stats.record_dropped(error);
                match error {
                    RelayError::RouteNotFound(_) => tracing::info!(%error, "Packet dropped"),
                    _ => tracing::warn!(%error, "Packet dropped"),
                }
            }
            CycleOutcome::Transmitted(outcome) => {
                self.stats.record_received();
                self.stats.record_transmission(outcome);
                tracing::info!(
                    delivered = outcome.delivered,
                    elapsed = ?outcome.elapsed,
                    next_hop = ?outcome.next_hop,
                    "Hop attempt finished"
                );
            }
        }
    }

    /// Cycle until `stop` reads `true` at the start of a cycle.
    ///
    /// After a failed listen the loop waits one listen window (or until `stop`
    /// changes) before trying the interface again.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        tracing::info!(
            local = %self.local,
            interface = self.listener.interface().name(),
            routes = self.routes.len(),
            "Relay loop started"
        );

        loop {
            if *stop.borrow() {
                break;
            }
            self.enter(RelayState::Idle);
            let outcome = self.cycle().await;
            self.record(&outcome);

            if matches!(outcome, CycleOutcome::ListenFailed(_)) {
                self.back_off(&mut stop).await;
            }
        }

        self.enter(RelayState::Stopped);
        tracing::info!("Relay loop stopped");
    }

    async fn back_off(&self, stop: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.listen_timeout) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    tokio::time::sleep(self.listen_timeout).await;
                }
            }
        }
    }

    /// Run on a new task.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActiveOperations;
    use crate::codec::tests::build_packet;
    use crate::codec::{CompressedPacket, LEGACY_DESTINATION_OFFSET, MTU};
    use crate::control::ControlChannel;
    use crate::interface::{ChannelInterface, ChannelRemote};
    use crate::radio::mock::{MockMode, MockRadio};
    use tokio::time::Instant;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn border() -> Address {
        addr("fe80::b826:1c8b:ccbb:32f0%10")
    }

    fn pi1() -> Address {
        addr("fe80::291:a8ff:feeb:27b8")
    }

    fn pi2() -> Address {
        addr("fe80::3ff8:d2ff:feeb:27b8")
    }

    struct Harness {
        relay: RelayLoop<ChannelInterface, MockRadio>,
        remote: ChannelRemote,
        radio: Arc<MockRadio>,
        activity: ActiveOperations,
    }

    fn harness(local: Address, mode: MockMode) -> Harness {
        let (iface, remote) = ChannelInterface::new("test0", MTU, 8);
        let activity = ActiveOperations::new();
        let radio = Arc::new(MockRadio::new(local, mode));
        let routes = RoutingTable::from_routes([
            (pi1(), vec![border(), pi1()]),
            (pi2(), vec![border(), pi1(), pi2()]),
        ])
        .unwrap();

        let relay = RelayLoop::new(
            InboundListener::new(Arc::new(iface), activity.clone()),
            HopTransmitter::new(Arc::clone(&radio), local, activity.clone()),
            Arc::new(routes),
            local,
        )
        .with_listen_timeout(Duration::from_secs(1));

        Harness {
            relay,
            remote,
            radio,
            activity,
        }
    }

    #[tokio::test]
    async fn test_cycle_relays_packet_to_next_hop() {
        let h = harness(border(), MockMode::Accept);
        let packet = build_packet(border().ip(), pi2().ip(), 64, b"to pi two");
        h.remote.inject(packet.clone()).await;

        let outcome = h.relay.cycle().await;
        let CycleOutcome::Transmitted(tx) = outcome else {
            panic!("expected a transmission, got {outcome:?}");
        };
        assert!(tx.delivered);
        assert_eq!(tx.next_hop, Some(pi1()));

        let written = h.radio.written();
        assert_eq!(written.len(), 1);
        let frame = CompressedPacket::decode(&written[0].1).unwrap();
        assert_eq!(frame.decompress().unwrap(), packet);
        assert_eq!(h.activity.current(), 0);
    }

    #[tokio::test]
    async fn test_cycle_consumes_local_packet() {
        let h = harness(pi2(), MockMode::Accept);
        h.remote
            .inject(build_packet(border().ip(), pi2().ip(), 64, b"for me"))
            .await;

        let outcome = h.relay.cycle().await;
        assert!(matches!(outcome, CycleOutcome::LocallyConsumed { .. }));
        assert!(h.radio.written().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_drops_unrouted_packet() {
        let h = harness(border(), MockMode::Accept);
        h.remote
            .inject(build_packet(border().ip(), "2001:db8::9".parse().unwrap(), 64, b"?"))
            .await;

        let outcome = h.relay.cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Dropped(RelayError::RouteNotFound(_))
        ));
        h.relay.record(&outcome);
        assert_eq!(h.relay.stats().snapshot().route_misses, 1);
        assert!(h.radio.written().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_drops_malformed_packet() {
        let h = harness(border(), MockMode::Accept);

        // Long enough to carry a routable destination, but a bad length field.
        let mut packet = build_packet(border().ip(), pi1().ip(), 64, b"abc");
        packet.push(0xff);
        h.remote.inject(packet).await;

        let outcome = h.relay.cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Dropped(RelayError::CompressionFailure(_))
        ));

        h.remote.inject(vec![0x60; 12]).await;
        assert!(matches!(
            h.relay.cycle().await,
            CycleOutcome::Dropped(RelayError::CompressionFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_allow_list_rejects_unknown_source() {
        let mut h = harness(border(), MockMode::Accept);
        let lists = Arc::new(AccessLists::new(NodeRole::BorderRouter));
        lists.add_to_allow_list(addr("fe80::1")).unwrap();
        h.relay = h.relay.with_access_lists(Arc::clone(&lists));

        h.remote
            .inject(build_packet(border().ip(), pi1().ip(), 64, b"x"))
            .await;
        assert!(matches!(
            h.relay.cycle().await,
            CycleOutcome::SourceRejected { .. }
        ));

        lists.purge_allow_list().unwrap();
        h.remote
            .inject(build_packet(border().ip(), pi1().ip(), 64, b"x"))
            .await;
        assert!(matches!(
            h.relay.cycle().await,
            CycleOutcome::Transmitted(_)
        ));
    }

    #[tokio::test]
    async fn test_legacy_destination_offset_misreads_address() {
        let mut h = harness(border(), MockMode::Accept);
        h.relay = h.relay.with_destination_offset(LEGACY_DESTINATION_OFFSET);

        h.remote
            .inject(build_packet(border().ip(), pi1().ip(), 64, b"x"))
            .await;
        assert!(matches!(
            h.relay.cycle().await,
            CycleOutcome::Dropped(RelayError::RouteNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_cycle_times_out() {
        let h = harness(border(), MockMode::Accept);
        let relay = h.relay.with_listen_timeout(DEFAULT_LISTEN_TIMEOUT);

        let started = Instant::now();
        assert!(matches!(
            relay.cycle().await,
            CycleOutcome::ListenTimedOut
        ));
        assert!(started.elapsed() >= DEFAULT_LISTEN_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_observed_within_one_cycle() {
        let h = harness(border(), MockMode::Silent);
        let relay = h.relay.with_listen_timeout(DEFAULT_LISTEN_TIMEOUT);
        let mut state = relay.state();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = relay.spawn(stop_rx);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*state.borrow(), RelayState::Listening);

        let stop_at = Instant::now();
        stop_tx.send(true).unwrap();
        state
            .wait_for(|s| *s == RelayState::Stopped)
            .await
            .unwrap();
        assert!(stop_at.elapsed() <= DEFAULT_LISTEN_TIMEOUT);

        handle.await.unwrap();
        h.activity.wait_drained().await;
        assert_eq!(h.activity.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_interface_is_retried_once_per_window() {
        let h = harness(border(), MockMode::Accept);
        let stats = Arc::clone(h.relay.stats());
        let mut state = h.relay.state();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = h.relay.spawn(stop_rx);
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.remote.set_available(false);

        // The listen in flight times out at 1s, then every retry fails at once.
        tokio::time::sleep(Duration::from_millis(5000)).await;
        let failures = stats.snapshot().listen_failures;
        assert!(
            (3..=6).contains(&failures),
            "expected one retry per second, got {failures}"
        );

        let stop_at = Instant::now();
        stop_tx.send(true).unwrap();
        state
            .wait_for(|s| *s == RelayState::Stopped)
            .await
            .unwrap();
        assert!(stop_at.elapsed() < Duration::from_secs(1));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let h = harness(border(), MockMode::Accept);
        let state = h.relay.state();
        let (_stop_tx, stop_rx) = watch::channel(true);

        h.relay.run(stop_rx).await;
        assert_eq!(*state.borrow(), RelayState::Stopped);
        assert_eq!(h.activity.current(), 0);
    }

    #[test]
    fn test_stats_snapshot_display() {
        let stats = RelayStats::new();
        stats.record_received();
        stats.record_dropped(&RelayError::RouteNotFound(pi1()));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.route_misses, 1);
        assert!(snapshot.to_string().contains("route_misses=1"));
    }
}
