//! Mesh node addressing.
//!
//! An [`Address`] is a 128-bit IPv6 address with an optional numeric zone
//! qualifier (`fe80::1%10`). Link-local forms are the common case on the mesh,
//! where every node derives its address from its radio identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

/// Errors produced when parsing an [`Address`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid IPv6 address: '{0}'")]
    InvalidAddress(String),

    #[error("invalid zone qualifier '{zone}' in '{input}' (expected a numeric scope id)")]
    InvalidZone { input: String, zone: String },
}

/// IPv6 address plus optional scope/zone id.
///
/// Equality is bitwise over both parts. Use [`Address::same_node`] when the
/// zone should be ignored, e.g. when comparing against an address pulled out
/// of a packet header, which never carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    ip: Ipv6Addr,
    scope_id: Option<u32>,
}

impl Address {
    /// Address without a zone qualifier.
    pub const fn new(ip: Ipv6Addr) -> Self {
        Self { ip, scope_id: None }
    }

    /// Address with an explicit zone qualifier.
    pub const fn with_scope(ip: Ipv6Addr, scope_id: u32) -> Self {
        Self {
            ip,
            scope_id: Some(scope_id),
        }
    }

    /// Build from the 16 raw bytes of an address field.
    pub fn from_octets(octets: [u8; 16]) -> Self {
        Self::new(Ipv6Addr::from(octets))
    }

    pub fn ip(&self) -> Ipv6Addr {
        self.ip
    }

    pub fn scope_id(&self) -> Option<u32> {
        self.scope_id
    }

    pub fn octets(&self) -> [u8; 16] {
        self.ip.octets()
    }

    /// Same address with the zone qualifier dropped.
    pub fn without_scope(&self) -> Self {
        Self::new(self.ip)
    }

    /// `fe80::/10`
    pub fn is_link_local(&self) -> bool {
        (self.ip.segments()[0] & 0xffc0) == 0xfe80
    }

    pub fn is_multicast(&self) -> bool {
        self.ip.is_multicast()
    }

    /// Compare only the 128-bit address, ignoring any zone qualifier.
    pub fn same_node(&self, other: &Address) -> bool {
        self.ip == other.ip
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Self::new(ip)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (ip_s, zone) = match s.split_once('%') {
            Some((ip, zone)) => (ip, Some(zone)),
            None => (s, None),
        };

        let ip: Ipv6Addr = ip_s
            .parse()
            .map_err(|_| AddressError::InvalidAddress(s.to_string()))?;

        let scope_id = match zone {
            Some(z) => Some(z.parse::<u32>().map_err(|_| AddressError::InvalidZone {
                input: s.to_string(),
                zone: z.to_string(),
            })?),
            None => None,
        };

        Ok(Self { ip, scope_id })
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope_id {
            Some(zone) => write!(f, "{}%{}", self.ip, zone),
            None => write!(f, "{}", self.ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let addr: Address = "fe80::291:a8ff:feeb:27b8".parse().unwrap();
        assert_eq!(addr.scope_id(), None);
        assert!(addr.is_link_local());
        assert_eq!(addr.to_string(), "fe80::291:a8ff:feeb:27b8");
    }

    #[test]
    fn test_parse_with_zone() {
        let addr: Address = "fe80::b826:1c8b:ccbb:32f0%10".parse().unwrap();
        assert_eq!(addr.scope_id(), Some(10));
        assert_eq!(addr.to_string(), "fe80::b826:1c8b:ccbb:32f0%10");
    }

    #[test]
    fn test_parse_rejects_named_zone() {
        let err = "fe80::1%eth0".parse::<Address>().unwrap_err();
        assert!(matches!(err, AddressError::InvalidZone { .. }));
    }

    #[test]
    fn test_parse_rejects_ipv4() {
        assert!("192.168.1.1".parse::<Address>().is_err());
    }

    #[test]
    fn test_equality_includes_zone() {
        let a: Address = "fe80::1%2".parse().unwrap();
        let b: Address = "fe80::1".parse().unwrap();
        assert_ne!(a, b);
        assert!(a.same_node(&b));
        assert_eq!(a.without_scope(), b);
    }

    #[test]
    fn test_octets_roundtrip() {
        let addr: Address = "2001:db8::42".parse().unwrap();
        assert_eq!(Address::from_octets(addr.octets()), addr);
    }

    #[test]
    fn test_serde_as_string() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            addr: Address,
        }

        let w: Wrapper = toml::from_str(r#"addr = "fe80::3ff8:d2ff:feeb:27b8%2""#).unwrap();
        assert_eq!(w.addr.scope_id(), Some(2));

        let raw = toml::to_string(&w).unwrap();
        assert!(raw.contains("fe80::3ff8:d2ff:feeb:27b8%2"));
    }
}
