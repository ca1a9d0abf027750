//! Control plane: node configuration, access lists and local address discovery.
//!
//! This module manages:
//! - The node configuration file model
//! - The allow-list and mesh list held by a border router
//! - Discovery of the node's own link-local address

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::address::Address;
use crate::codec::{DESTINATION_OFFSET, IPV6_HEADER_LEN, MTU};
use crate::listener::DEFAULT_LISTEN_TIMEOUT;
use crate::radio::udp::DEFAULT_BEACON_INTERVAL;
use crate::routing::{RoutingError, RoutingTable};
use crate::transmitter::DEFAULT_TRANSMIT_TIMEOUT;

fn default_tun_ipv6_prefix() -> u8 {
    64
}

fn default_destination_offset() -> usize {
    DESTINATION_OFFSET
}

fn default_tun_device_name() -> String {
    "hoplink0".to_string()
}

fn default_tun_mtu() -> usize {
    MTU
}

fn default_listen_timeout() -> Duration {
    DEFAULT_LISTEN_TIMEOUT
}

fn default_transmit_timeout() -> Duration {
    DEFAULT_TRANSMIT_TIMEOUT
}

/// Role of a node in the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Gateway between the IPv6 network and the mesh; holds the access lists
    BorderRouter,
    /// Mesh node that relays and consumes packets
    #[default]
    Router,
}

/// A directly reachable mesh node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborConfig {
    /// Mesh address of the neighbor
    pub address: Address,
    /// UDP endpoint its radio is bound to
    pub endpoint: SocketAddr,
}

/// Radio settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// UDP address the emulated radio binds to
    pub bind: SocketAddr,

    /// Interval between presence beacons while receiving
    #[serde(with = "humantime_serde")]
    pub beacon_interval: Duration,

    /// Nodes within range
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv6Addr::UNSPECIFIED, 47300)),
            beacon_interval: DEFAULT_BEACON_INTERVAL,
            neighbors: Vec::new(),
        }
    }
}

/// Static route entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub destination: Address,
    /// Ordered hop path, ending at `destination`
    pub path: Vec<Address>,
}

/// Configuration for a mesh node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's mesh address.
    ///
    /// If not set, the first link-local address of the host is used.
    #[serde(default)]
    pub local_address: Option<Address>,

    #[serde(default)]
    pub role: NodeRole,

    /// Read packets from a TUN device instead of running relay-only.
    ///
    /// Linux only. Requires root privileges.
    #[serde(default)]
    pub enable_tun: bool,

    /// TUN device name (used when `enable_tun` is enabled).
    #[serde(default = "default_tun_device_name")]
    pub tun_device_name: String,

    /// TUN MTU (clamped to 1280).
    #[serde(default = "default_tun_mtu")]
    pub tun_mtu: usize,

    /// Automatically configure the TUN device with an IPv6 address and routes.
    ///
    /// Safe default: false. When enabled, `ip -6` commands are executed.
    #[serde(default)]
    pub auto_config_tun: bool,

    /// IPv6 address to assign to the TUN device.
    #[serde(default)]
    pub tun_ipv6_addr: Option<Ipv6Addr>,

    /// Prefix length to use with `tun_ipv6_addr`.
    #[serde(default = "default_tun_ipv6_prefix")]
    pub tun_ipv6_prefix: u8,

    /// How long one listen waits for a packet
    #[serde(default = "default_listen_timeout", with = "humantime_serde")]
    pub listen_timeout: Duration,

    /// How long one hop attempt may take
    #[serde(default = "default_transmit_timeout", with = "humantime_serde")]
    pub transmit_timeout: Duration,

    /// Byte offset of the destination address in the IPv6 header.
    ///
    /// 24 per RFC 8200. Deployments that interoperate with the legacy relay,
    /// which read the field at 23, can set it here.
    #[serde(default = "default_destination_offset")]
    pub destination_offset: usize,

    /// Sources allowed to send into the mesh (border router only).
    ///
    /// Empty means every source is admitted.
    #[serde(default)]
    pub allow_list: Vec<Address>,

    /// Nodes allowed to send out of the mesh (border router only).
    ///
    /// Empty means every mesh node is admitted.
    #[serde(default)]
    pub mesh_list: Vec<Address>,

    /// Health/logging interval
    #[serde(with = "humantime_serde")]
    pub health_interval: Duration,

    #[serde(default)]
    pub radio: RadioConfig,

    /// Static routes
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            local_address: None,
            role: NodeRole::default(),
            enable_tun: false,
            tun_device_name: default_tun_device_name(),
            tun_mtu: default_tun_mtu(),
            auto_config_tun: false,
            tun_ipv6_addr: None,
            tun_ipv6_prefix: default_tun_ipv6_prefix(),
            listen_timeout: default_listen_timeout(),
            transmit_timeout: default_transmit_timeout(),
            destination_offset: DESTINATION_OFFSET,
            allow_list: Vec::new(),
            mesh_list: Vec::new(),
            health_interval: Duration::from_secs(5),
            radio: RadioConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Build the validated routing table from `routes`.
    pub fn routing_table(&self) -> Result<RoutingTable, RoutingError> {
        RoutingTable::from_routes(
            self.routes
                .iter()
                .map(|route| (route.destination, route.path.clone())),
        )
    }

    /// Whether `destination_offset` leaves room for a 16-byte address inside
    /// the fixed header.
    pub fn destination_offset_is_valid(&self) -> bool {
        self.destination_offset + 16 <= IPV6_HEADER_LEN
    }
}

/// Linux errno values reported by [`ControlError::code`].
const EEXIST: i32 = 17;
const ENOENT: i32 = 2;
const EOPNOTSUPP: i32 = 95;

/// Control request failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("{0} is already on the list")]
    AlreadyPresent(Address),

    #[error("{0} is not on the list")]
    NotPresent(Address),

    #[error("access lists are only kept by a border router")]
    NotBorderRouter,
}

impl ControlError {
    /// Platform error code for callers that only look at numbers.
    pub fn code(&self) -> i32 {
        match self {
            Self::AlreadyPresent(_) => EEXIST,
            Self::NotPresent(_) => ENOENT,
            Self::NotBorderRouter => EOPNOTSUPP,
        }
    }
}

/// Administrative requests to the local interface.
pub trait ControlChannel: Send + Sync {
    fn add_to_allow_list(&self, address: Address) -> Result<(), ControlError>;
    fn remove_from_allow_list(&self, address: Address) -> Result<(), ControlError>;
    fn purge_allow_list(&self) -> Result<(), ControlError>;

    fn add_to_mesh_list(&self, address: Address) -> Result<(), ControlError>;
    fn remove_from_mesh_list(&self, address: Address) -> Result<(), ControlError>;
    fn purge_mesh_list(&self) -> Result<(), ControlError>;

    fn is_border_router(&self) -> bool;
}

/// In-memory access lists.
///
/// Entries are compared by 128-bit address; zone qualifiers are dropped on
/// insert.
#[derive(Debug, Default)]
pub struct AccessLists {
    role: NodeRole,
    allow: Mutex<HashSet<Ipv6Addr>>,
    mesh: Mutex<HashSet<Ipv6Addr>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AccessLists {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            allow: Mutex::new(HashSet::new()),
            mesh: Mutex::new(HashSet::new()),
        }
    }

    /// Seed from the `role`, `allow_list` and `mesh_list` config fields.
    pub fn from_config(config: &NodeConfig) -> Self {
        let lists = Self::new(config.role);
        lock(&lists.allow).extend(config.allow_list.iter().map(Address::ip));
        lock(&lists.mesh).extend(config.mesh_list.iter().map(Address::ip));
        lists
    }

    /// Whether a packet from the local interface with this source may enter
    /// the mesh.
    pub fn admits_source(&self, source: &Address) -> bool {
        if self.role != NodeRole::BorderRouter {
            return true;
        }
        let allow = lock(&self.allow);
        allow.is_empty() || allow.contains(&source.ip())
    }

    /// Whether a frame from this mesh node may leave the mesh here.
    pub fn admits_mesh_node(&self, node: &Address) -> bool {
        if self.role != NodeRole::BorderRouter {
            return true;
        }
        let mesh = lock(&self.mesh);
        mesh.is_empty() || mesh.contains(&node.ip())
    }

    pub fn allow_list_len(&self) -> usize {
        lock(&self.allow).len()
    }

    pub fn mesh_list_len(&self) -> usize {
        lock(&self.mesh).len()
    }

    fn require_border_router(&self) -> Result<(), ControlError> {
        if self.role == NodeRole::BorderRouter {
            Ok(())
        } else {
            Err(ControlError::NotBorderRouter)
        }
    }

    fn insert(&self, list: &Mutex<HashSet<Ipv6Addr>>, address: Address) -> Result<(), ControlError> {
        self.require_border_router()?;
        if lock(list).insert(address.ip()) {
            Ok(())
        } else {
            Err(ControlError::AlreadyPresent(address))
        }
    }

    fn remove(&self, list: &Mutex<HashSet<Ipv6Addr>>, address: Address) -> Result<(), ControlError> {
        self.require_border_router()?;
        if lock(list).remove(&address.ip()) {
            Ok(())
        } else {
            Err(ControlError::NotPresent(address))
        }
    }

    fn purge(&self, list: &Mutex<HashSet<Ipv6Addr>>) -> Result<(), ControlError> {
        self.require_border_router()?;
        lock(list).clear();
        Ok(())
    }
}

impl ControlChannel for AccessLists {
    fn add_to_allow_list(&self, address: Address) -> Result<(), ControlError> {
        self.insert(&self.allow, address)
    }

    fn remove_from_allow_list(&self, address: Address) -> Result<(), ControlError> {
        self.remove(&self.allow, address)
    }

    fn purge_allow_list(&self) -> Result<(), ControlError> {
        self.purge(&self.allow)
    }

    fn add_to_mesh_list(&self, address: Address) -> Result<(), ControlError> {
        self.insert(&self.mesh, address)
    }

    fn remove_from_mesh_list(&self, address: Address) -> Result<(), ControlError> {
        self.remove(&self.mesh, address)
    }

    fn purge_mesh_list(&self) -> Result<(), ControlError> {
        self.purge(&self.mesh)
    }

    fn is_border_router(&self) -> bool {
        self.role == NodeRole::BorderRouter
    }
}

/// Lookup of the host's own IPv6 addresses
pub struct InterfaceDiscovery;

impl InterfaceDiscovery {
    /// First link-local address on a non-loopback interface, with the
    /// interface index as its zone.
    ///
    /// Linux only; returns `None` elsewhere or when nothing qualifies.
    pub fn first_link_local() -> Option<Address> {
        #[cfg(target_os = "linux")]
        {
            let table = std::fs::read_to_string("/proc/net/if_inet6").ok()?;
            Self::parse_if_inet6(&table)
                .into_iter()
                .find(|(addr, name)| addr.is_link_local() && name != "lo")
                .map(|(addr, _)| addr)
        }

        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    /// Parse the `/proc/net/if_inet6` format: 32 hex digits of address,
    /// interface index, prefix length, scope, flags, interface name.
    pub fn parse_if_inet6(table: &str) -> Vec<(Address, String)> {
        table
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let hex = fields.next()?;
                let index = u32::from_str_radix(fields.next()?, 16).ok()?;
                let name = fields.nth(3)?;

                if hex.len() != 32 {
                    return None;
                }
                let mut octets = [0u8; 16];
                for (i, octet) in octets.iter_mut().enumerate() {
                    *octet = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
                }

                Some((
                    Address::with_scope(Ipv6Addr::from(octets), index),
                    name.to_string(),
                ))
            })
            .collect()
    }
}
