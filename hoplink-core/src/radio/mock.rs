//! Scriptable radio for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{AdvertisementGuard, InboundFrame, MeshRadio, Peer, PeerFilter, Presence, RadioError};
use crate::address::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockMode {
    /// Scans never find anybody.
    Silent,
    /// Every scan finds its peer and every write is acknowledged.
    Accept,
    /// Scans succeed, writes fail.
    FailWrites,
}

pub(crate) struct MockRadio {
    local: Address,
    mode: Mutex<MockMode>,
    advertising: Arc<AtomicUsize>,
    written: Mutex<Vec<(Address, Vec<u8>)>>,
    inbound_tx: mpsc::Sender<InboundFrame>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundFrame>>,
}

impl MockRadio {
    pub(crate) fn new(local: Address, mode: MockMode) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        Self {
            local,
            mode: Mutex::new(mode),
            advertising: Arc::new(AtomicUsize::new(0)),
            written: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    pub(crate) fn set_mode(&self, mode: MockMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Advertisements currently running
    pub(crate) fn advertising(&self) -> usize {
        self.advertising.load(Ordering::SeqCst)
    }

    pub(crate) fn written(&self) -> Vec<(Address, Vec<u8>)> {
        self.written.lock().unwrap().clone()
    }

    pub(crate) async fn inject(&self, from: Address, frame: Vec<u8>) {
        self.inbound_tx
            .send(InboundFrame { from, frame })
            .await
            .unwrap();
    }

    fn mode(&self) -> MockMode {
        *self.mode.lock().unwrap()
    }
}

impl MeshRadio for MockRadio {
    fn local_address(&self) -> Address {
        self.local
    }

    fn advertise(&self, _presence: Presence) -> Result<AdvertisementGuard, RadioError> {
        self.advertising.fetch_add(1, Ordering::SeqCst);
        let advertising = Arc::clone(&self.advertising);
        Ok(AdvertisementGuard::new(move || {
            advertising.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    async fn scan(&self, filter: PeerFilter) -> Result<Peer, RadioError> {
        match self.mode() {
            MockMode::Silent => std::future::pending().await,
            MockMode::Accept | MockMode::FailWrites => Ok(Peer {
                address: filter.address,
            }),
        }
    }

    async fn write(&self, peer: &Peer, payload: &[u8]) -> Result<(), RadioError> {
        match self.mode() {
            MockMode::FailWrites => Err(RadioError::Closed),
            _ => {
                self.written
                    .lock()
                    .unwrap()
                    .push((peer.address, payload.to_vec()));
                Ok(())
            }
        }
    }

    async fn receive(&self) -> Result<InboundFrame, RadioError> {
        self.inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(RadioError::Closed)
    }
}
