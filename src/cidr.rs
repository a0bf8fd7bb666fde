//! IPv4 CIDR arithmetic.
//!
//! Parsing, containment checks and sequential carving of subnets out of a
//! parent range. Subnet groups are laid out the same way every time, so a
//! re-synthesized network produces identical subnet ranges.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `10.0.0.0/16`, the range networks get when none is configured.
pub const DEFAULT_NETWORK_RANGE: Ipv4Cidr = Ipv4Cidr {
    network: Ipv4Addr::new(10, 0, 0, 0),
    prefix: 16,
};

/// An IPv4 network in CIDR notation, e.g. `10.0.0.0/16`.
///
/// The host bits of the address must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Create a CIDR from an address and prefix length.
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(Error::invalid_cidr(
                format!("{}/{}", network, prefix),
                "prefix length must be between 0 and 32",
            ));
        }

        let cidr = Self { network, prefix };
        if u32::from(network) & !cidr.mask() != 0 {
            return Err(Error::invalid_cidr(
                cidr.to_string(),
                format!(
                    "host bits are set; did you mean {}/{}?",
                    Ipv4Addr::from(u32::from(network) & cidr.mask()),
                    prefix
                ),
            ));
        }

        Ok(cidr)
    }

    /// The network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// The prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix
    }

    /// The last address in the range.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !self.mask())
    }

    /// Number of addresses in the range.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// Whether `other` lies entirely within this range.
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix >= self.prefix
            && u32::from(other.network) & self.mask() == u32::from(self.network)
    }

    /// Whether the two ranges share any address.
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    fn start(&self) -> u64 {
        u64::from(u32::from(self.network))
    }

    fn end(&self) -> u64 {
        self.start() + self.size()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::invalid_cidr(s, "expected <address>/<prefix>"))?;

        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::invalid_cidr(s, format!("'{}' is not an IPv4 address", addr)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| Error::invalid_cidr(s, format!("'{}' is not a prefix length", prefix)))?;

        Self::new(network, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

/// Allocates consecutive, aligned subnets from a parent range.
#[derive(Debug, Clone)]
pub struct SubnetCarver {
    parent: Ipv4Cidr,
    cursor: u64,
}

impl SubnetCarver {
    /// Start carving at the beginning of `parent`.
    pub fn new(parent: Ipv4Cidr) -> Self {
        Self {
            cursor: parent.start(),
            parent,
        }
    }

    /// Carve the next free subnet with the given prefix length.
    pub fn next_subnet(&mut self, prefix: u8) -> Result<Ipv4Cidr> {
        if prefix < self.parent.prefix || prefix > 32 {
            return Err(Error::invalid_cidr(
                format!("{}/{}", self.parent.network, prefix),
                format!("a /{} subnet cannot be carved from {}", prefix, self.parent),
            ));
        }

        let size = 1u64 << (32 - u32::from(prefix));
        let start = self.cursor.div_ceil(size) * size;
        if start + size > self.parent.end() {
            return Err(Error::invalid_cidr(
                self.parent.to_string(),
                format!("no room left for another /{} subnet", prefix),
            ));
        }

        self.cursor = start + size;
        // start < 2^32 because it lies inside the parent range
        Ipv4Cidr::new(Ipv4Addr::from(start as u32), prefix)
    }

    /// Addresses not yet handed out.
    pub fn remaining(&self) -> u64 {
        self.parent.end().saturating_sub(self.cursor)
    }
}
