//! Static hop-path routing.
//!
//! The routing table maps a destination address to the ordered path of mesh
//! nodes leading to it, ending at the destination itself. It is built once at
//! startup, validated, and then shared read-only (typically behind an `Arc`)
//! by every worker. There is no prefix matching and no default route.

use std::collections::HashMap;
use std::net::Ipv6Addr;

use crate::address::Address;

/// Routing table construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("route to {0} has an empty path")]
    EmptyPath(Address),

    #[error("route to {destination} ends at {last}, not at the destination")]
    PathDoesNotEndAtDestination { destination: Address, last: Address },

    #[error("duplicate route for destination {0}")]
    DuplicateDestination(Address),
}

/// Immutable destination -> hop path mapping.
///
/// Keys ignore the zone qualifier so that addresses read out of packet
/// headers match configured link-local addresses such as `fe80::1%10`.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<Ipv6Addr, Vec<Address>>,
}

impl RoutingTable {
    /// Build and validate a table from `(destination, path)` pairs.
    pub fn from_routes<I>(routes: I) -> Result<Self, RoutingError>
    where
        I: IntoIterator<Item = (Address, Vec<Address>)>,
    {
        let mut table = HashMap::new();

        for (destination, path) in routes {
            let Some(last) = path.last() else {
                return Err(RoutingError::EmptyPath(destination));
            };
            if !last.same_node(&destination) {
                return Err(RoutingError::PathDoesNotEndAtDestination {
                    destination,
                    last: *last,
                });
            }
            if table.insert(destination.ip(), path).is_some() {
                return Err(RoutingError::DuplicateDestination(destination));
            }
        }

        Ok(Self { routes: table })
    }

    /// Exact-match lookup of the path to `destination`.
    pub fn lookup(&self, destination: &Address) -> Option<&[Address]> {
        self.routes.get(&destination.ip()).map(Vec::as_slice)
    }

    /// Node after `local` on the path to `destination`.
    ///
    /// When `local` is not on the path at all the packet enters it at the
    /// first node. `None` if there is no route or `local` is the destination.
    pub fn next_hop(&self, destination: &Address, local: &Address) -> Option<&Address> {
        let path = self.lookup(destination)?;
        match path.iter().position(|hop| hop.same_node(local)) {
            Some(index) => path.get(index + 1),
            None => path.first(),
        }
    }

    /// Number of destinations in the table
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate over `(destination, path)` in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (Address, &[Address])> {
        self.routes
            .iter()
            .map(|(dest, path)| (Address::new(*dest), path.as_slice()))
    }
}
