//! Core types shared across vrouter components.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::VrouterError;

/// An IPv4 address block, always held in normalized (network address) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubnetBlock(Ipv4Net);

impl SubnetBlock {
    /// Create a block, truncating host bits (`10.0.0.7/16` becomes `10.0.0.0/16`)
    pub fn new(net: Ipv4Net) -> Self {
        Self(net.trunc())
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.0.broadcast()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// Number of addresses covered by the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.0.prefix_len()))
    }

    pub fn as_net(&self) -> Ipv4Net {
        self.0
    }

    /// True if `other` lies entirely within this block
    pub fn contains(&self, other: &SubnetBlock) -> bool {
        self.0.contains(&other.0)
    }

    /// True if `other` lies within this block and is smaller
    pub fn strictly_contains(&self, other: &SubnetBlock) -> bool {
        self.contains(other) && other.prefix_len() > self.prefix_len()
    }

    pub fn overlaps(&self, other: &SubnetBlock) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl From<Ipv4Net> for SubnetBlock {
    fn from(net: Ipv4Net) -> Self {
        Self::new(net)
    }
}

impl FromStr for SubnetBlock {
    type Err = VrouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Ipv4Net>()
            .map(Self::new)
            .map_err(|e| VrouterError::InvalidInput(format!("invalid CIDR '{s}': {e}")))
    }
}

impl fmt::Display for SubnetBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A versioned entry as returned by the coordination store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub key: String,
    pub value: String,
    /// Store-wide revision of the last write to this key
    pub revision: u64,
}

/// Lease lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    /// Not yet claimed (or the claim was refused)
    Unclaimed,
    /// Claimed and being renewed
    Claimed,
    /// Ownership can no longer be proven; terminal and fatal
    Lost,
    /// Deleted on graceful shutdown; terminal
    Released,
}

impl Default for LeaseState {
    fn default() -> Self {
        Self::Unclaimed
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unclaimed => "unclaimed",
            Self::Claimed => "claimed",
            Self::Lost => "lost",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a lease, published on every transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSnapshot {
    pub key: String,
    pub state: LeaseState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    /// Unix timestamp of the last successful claim or renewal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_renewed: Option<i64>,
}

/// A host and the block assigned to it at bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAssignment {
    pub host: String,
    pub block: SubnetBlock,
}

/// A named service registered in the overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,

    /// Free-form attributes (port, protocol, owner, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Registration time (Unix epoch seconds)
    pub registered_at: i64,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            registered_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Serialized form stored under the service key
    pub fn to_value(&self) -> Result<String, VrouterError> {
        serde_json::to_string(self)
            .map_err(|e| VrouterError::InvalidInput(format!("unserializable service {}: {e}", self.name)))
    }

    pub fn from_value(value: &str) -> Result<Self, VrouterError> {
        serde_json::from_str(value)
            .map_err(|e| VrouterError::Store(format!("malformed service descriptor: {e}")))
    }
}
