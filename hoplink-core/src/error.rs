//! Failure categories shared by the relay workers.
//!
//! Only [`RelayError::FatalStartupFailure`] (and a [`RelayError::DeviceUnavailable`]
//! raised by the startup probe) ever stops a node. Everything else is logged
//! by the worker that hit it and the worker moves on to its next cycle.

use std::io;
use std::time::Duration;

use crate::address::Address;
use crate::codec::CodecError;
use crate::radio::RadioError;

/// Relay failure taxonomy
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("local interface unavailable: {0}")]
    DeviceUnavailable(#[source] io::Error),

    #[error("no packet within {0:?}")]
    ListenTimeout(Duration),

    #[error("compression failed: {0}")]
    CompressionFailure(#[source] CodecError),

    #[error("decompression failed: {0}")]
    DecompressionFailure(#[source] CodecError),

    #[error("no route to {0}")]
    RouteNotFound(Address),

    #[error("transmission to {next_hop} timed out after {timeout:?}")]
    TransmissionTimeout { next_hop: Address, timeout: Duration },

    #[error("transmission to {next_hop} failed: {source}")]
    TransmissionFailure {
        next_hop: Address,
        #[source]
        source: RadioError,
    },

    #[error("fatal startup failure: {0}")]
    FatalStartupFailure(String),
}

impl RelayError {
    /// Whether this failure must stop the node.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalStartupFailure(_))
    }
}
