//! Bounded wait for the next packet from the local interface.

use std::sync::Arc;
use std::time::Duration;

use crate::activity::ActiveOperations;
use crate::codec::MTU;
use crate::error::RelayError;
use crate::interface::{InterfaceHandle, LocalInterface};

/// How long a single listen waits for a packet
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads single packets from a [`LocalInterface`].
///
/// Every call opens its own handle and drops it before returning, whether
/// the read completed, failed or ran out of time.
pub struct InboundListener<I> {
    interface: Arc<I>,
    activity: ActiveOperations,
}

impl<I: LocalInterface> InboundListener<I> {
    pub fn new(interface: Arc<I>, activity: ActiveOperations) -> Self {
        Self {
            interface,
            activity,
        }
    }

    pub fn interface(&self) -> &Arc<I> {
        &self.interface
    }

    /// Wait up to `timeout` for one packet of at most one MTU.
    ///
    /// Timeouts and I/O failures both come back as `None`; use
    /// [`InboundListener::listen_detailed`] to tell them apart.
    pub async fn listen(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.listen_detailed(timeout).await.ok()
    }

    /// Like [`InboundListener::listen`], but says why no packet came back:
    /// [`RelayError::ListenTimeout`] when the window elapsed,
    /// [`RelayError::DeviceUnavailable`] when the interface failed.
    pub async fn listen_detailed(&self, timeout: Duration) -> Result<Vec<u8>, RelayError> {
        let _active = self.activity.begin();

        let read = async {
            let mut handle = self
                .interface
                .open()
                .await
                .map_err(RelayError::DeviceUnavailable)?;

            let mut buf = vec![0u8; MTU];
            let n = handle
                .read_packet(&mut buf)
                .await
                .map_err(RelayError::DeviceUnavailable)?;
            buf.truncate(n);
            Ok::<_, RelayError>(buf)
        };

        match tokio::time::timeout(timeout, read).await {
            Ok(Ok(packet)) => {
                tracing::trace!(interface = self.interface.name(), bytes = packet.len(), "Packet received");
                Ok(packet)
            }
            Ok(Err(e)) => {
                tracing::warn!(interface = self.interface.name(), error = %e, "Listen failed");
                Err(e)
            }
            Err(_) => Err(RelayError::ListenTimeout(timeout)),
        }
    }
}
