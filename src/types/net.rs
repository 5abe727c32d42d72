//! Address prefixes and address ranges.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PolicyError;

/// An address prefix, e.g. `10.0.0.0/8` or `2001:db8::/32`.
///
/// Host bits are cleared on construction, so two prefixes naming the same
/// network compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, PolicyError> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if len > max {
            return Err(PolicyError::ValueError(format!(
                "prefix length {len} too long for {addr}"
            )));
        }
        Ok(Prefix {
            addr: mask(addr, len),
            len,
        })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// Whether `addr` falls inside this prefix.
    pub fn contains_addr(&self, addr: &IpAddr) -> bool {
        addr.is_ipv4() == self.is_ipv4() && mask(*addr, self.len) == self.addr
    }

    /// Whether `other` is equal to or more specific than this prefix.
    pub fn contains(&self, other: &Prefix) -> bool {
        other.len >= self.len && self.contains_addr(&other.addr)
    }
}

fn mask(addr: IpAddr, len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(a) => {
            let bits = u32::from(a);
            let m = if len == 0 { 0 } else { u32::MAX << (32 - len as u32) };
            IpAddr::V4(Ipv4Addr::from(bits & m))
        }
        IpAddr::V6(a) => {
            let bits = u128::from(a);
            let m = if len == 0 {
                0
            } else {
                u128::MAX << (128 - len as u32)
            };
            IpAddr::V6(Ipv6Addr::from(bits & m))
        }
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Prefix {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| PolicyError::ValueError(format!("prefix without length: {s}")))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| PolicyError::ValueError(format!("bad prefix address: {s}")))?;
        let len: u8 = len
            .parse()
            .map_err(|_| PolicyError::ValueError(format!("bad prefix length: {s}")))?;
        Prefix::new(addr, len)
    }
}

impl Serialize for Prefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Prefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An inclusive address range written `low..high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpRange {
    low: IpAddr,
    high: IpAddr,
}

impl IpRange {
    pub fn new(low: IpAddr, high: IpAddr) -> Result<Self, PolicyError> {
        if low.is_ipv4() != high.is_ipv4() {
            return Err(PolicyError::ValueError(format!(
                "mixed address families in range {low}..{high}"
            )));
        }
        if low > high {
            return Err(PolicyError::ValueError(format!(
                "empty address range {low}..{high}"
            )));
        }
        Ok(IpRange { low, high })
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        addr.is_ipv4() == self.low.is_ipv4() && *addr >= self.low && *addr <= self.high
    }
}

impl Default for IpRange {
    fn default() -> Self {
        let zero = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        IpRange {
            low: zero,
            high: zero,
        }
    }
}

impl Display for IpRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}..{}", self.low, self.high)
    }
}

impl FromStr for IpRange {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (low, high) = s
            .trim()
            .split_once("..")
            .ok_or_else(|| PolicyError::ValueError(format!("bad address range: {s}")))?;
        let parse = |a: &str| {
            a.parse::<IpAddr>()
                .map_err(|_| PolicyError::ValueError(format!("bad address in range: {s}")))
        };
        IpRange::new(parse(low)?, parse(high)?)
    }
}

impl Serialize for IpRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
