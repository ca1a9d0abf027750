//! Linux TUN backend for [`LocalInterface`].
//!
//! # Requirements
//!
//! - Root privileges (or `CAP_NET_ADMIN`) for device creation
//! - TUN/TAP kernel module loaded (`modprobe tun`)
//! - `/dev/net/tun` accessible

use super::{InterfaceHandle, LocalInterface};
use crate::codec::MTU;
use std::io;
use std::sync::Arc;

/// Default TUN device name
pub const DEFAULT_DEVICE_NAME: &str = "hoplink0";

/// IPv6 TUN device.
///
/// The device itself lives for the lifetime of the node; each
/// [`LocalInterface::open`] hands out a lightweight lease on it.
pub struct TunInterface {
    name: String,
    mtu: usize,
    device: Arc<tun_rs::AsyncDevice>,
}

impl TunInterface {
    /// Create a new TUN device.
    ///
    /// `mtu` is clamped to the mesh MTU of 1280 bytes, which is also the IPv6
    /// minimum link MTU.
    pub fn new(device_name: &str, mtu: usize) -> io::Result<Self> {
        use tun_rs::DeviceBuilder;

        let mtu = mtu.min(MTU);
        let device = DeviceBuilder::new()
            .name(device_name)
            .mtu(mtu as u16)
            .build_async()
            .map_err(|e| {
                io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!(
                        "Failed to create TUN device (root privileges required): {}",
                        e
                    ),
                )
            })?;

        let actual_name = device
            .name()
            .map_err(|e| io::Error::other(format!("Failed to get device name: {}", e)))?;

        tracing::info!(device = %actual_name, mtu, "Created TUN device");

        Ok(Self {
            name: actual_name,
            mtu,
            device: Arc::new(device),
        })
    }

    /// Create a TUN device with the default name and MTU
    pub fn new_default() -> io::Result<Self> {
        Self::new(DEFAULT_DEVICE_NAME, MTU)
    }
}

impl LocalInterface for TunInterface {
    type Handle = TunHandle;

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn open(&self) -> io::Result<TunHandle> {
        Ok(TunHandle {
            device: Arc::clone(&self.device),
        })
    }

    async fn deliver(&self, packet: &[u8]) -> io::Result<()> {
        if packet.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot write empty packet",
            ));
        }

        if packet.len() > self.mtu {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Packet too large for MTU: {} bytes (MTU: {})",
                    packet.len(),
                    self.mtu
                ),
            ));
        }

        self.device.send(packet).await.map(|_| ())
    }
}

/// Lease on a [`TunInterface`].
pub struct TunHandle {
    device: Arc<tun_rs::AsyncDevice>,
}

impl InterfaceHandle for TunHandle {
    async fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.recv(buf).await
    }
}
