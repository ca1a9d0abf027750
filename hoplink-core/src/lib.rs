//! Core library for the Hoplink mesh relay.
//!
//! Hoplink bridges a host's IPv6 interface with a multi-hop, short-range
//! wireless mesh. Packets read from the local interface have their IPv6
//! header compressed and are sent one hop at a time along a statically
//! configured path; frames arriving from the mesh are decompressed and either
//! delivered locally or passed on to the next hop.
//!
//! # Architecture
//!
//! - `address`: Mesh node addresses (IPv6 plus optional zone)
//! - `codec`: IPHC-style header compression and the mesh frame format
//! - `routing`: Static destination -> hop path table
//! - `interface`: Local IPv6 interface (in-memory channels, Linux TUN)
//! - `radio`: Wireless medium abstraction and its UDP emulation
//! - `transmitter`: One bounded hop attempt (advertise, scan, write)
//! - `listener`: One bounded read from the local interface
//! - `relay`: Relay loop state machine and counters
//! - `forwarder`: Handling of frames received from the mesh
//! - `activity`: In-flight operation counter
//! - `control`: Configuration, access lists and address discovery
//! - `error`: Relay failure taxonomy
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hoplink_core::activity::ActiveOperations;
//! use hoplink_core::interface::ChannelInterface;
//! use hoplink_core::listener::InboundListener;
//! use hoplink_core::radio::UdpRadio;
//! use hoplink_core::relay::RelayLoop;
//! use hoplink_core::routing::RoutingTable;
//! use hoplink_core::transmitter::HopTransmitter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let local: hoplink_core::Address = "fe80::b826:1c8b:ccbb:32f0".parse()?;
//! let pi1: hoplink_core::Address = "fe80::291:a8ff:feeb:27b8".parse()?;
//! let routes = Arc::new(RoutingTable::from_routes([(pi1, vec![local, pi1])])?);
//!
//! let activity = ActiveOperations::new();
//! let (iface, _remote) = ChannelInterface::new("mesh0", 1280, 64);
//! let radio = UdpRadio::bind(
//!     local,
//!     "127.0.0.1:47300".parse()?,
//!     vec![(pi1, "127.0.0.1:47301".parse()?)],
//!     std::time::Duration::from_millis(500),
//! )
//! .await?;
//!
//! let relay = RelayLoop::new(
//!     InboundListener::new(Arc::new(iface), activity.clone()),
//!     HopTransmitter::new(Arc::new(radio), local, activity.clone()),
//!     routes,
//!     local,
//! );
//!
//! let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! let task = relay.spawn(stop_rx);
//!
//! // ... later
//! stop_tx.send_replace(true);
//! task.await?;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod address;
pub mod codec;
pub mod control;
pub mod error;
pub mod forwarder;
pub mod interface;
pub mod listener;
pub mod radio;
pub mod relay;
pub mod routing;
pub mod transmitter;

pub use address::Address;
pub use codec::{compress, decompress, CompressedPacket};
pub use error::RelayError;
pub use routing::RoutingTable;
