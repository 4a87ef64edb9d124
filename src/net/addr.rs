//! Address families, family hints and candidate address lists.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

//------------ Family --------------------------------------------------------

/// The address family of a candidate address.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Family {
    /// IPv4, also known as `PF_INET`.
    Inet,

    /// IPv6, also known as `PF_INET6`.
    Inet6,
}

impl Family {
    /// Returns the family of an address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::Inet,
            IpAddr::V6(_) => Family::Inet6,
        }
    }

    /// Returns the record type that resolves addresses of this family.
    pub fn record_type(self) -> RecordType {
        match self {
            Family::Inet => RecordType::A,
            Family::Inet6 => RecordType::Aaaa,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Inet => f.write_str("PF_INET"),
            Family::Inet6 => f.write_str("PF_INET6"),
        }
    }
}

//------------ RecordType ----------------------------------------------------

/// The type of an address query.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RecordType {
    /// An IPv4 address query.
    A,

    /// An IPv6 address query.
    Aaaa,
}

impl RecordType {
    /// Returns the family of the addresses this query resolves.
    pub fn family(self) -> Family {
        match self {
            RecordType::A => Family::Inet,
            RecordType::Aaaa => Family::Inet6,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => f.write_str("A"),
            RecordType::Aaaa => f.write_str("AAAA"),
        }
    }
}

//------------ FamilyHint ----------------------------------------------------

/// The caller's preference for resolving a host name.
///
/// The hint decides which query is issued first and whether a query for
/// the other family follows as a fallback:
///
/// | hint         | first query | fallback |
/// |--------------|-------------|----------|
/// | `Ipv4Only`   | A           | none     |
/// | `Ipv6Only`   | AAAA        | none     |
/// | `PreferIpv4` | A           | AAAA     |
/// | `PreferIpv6` | AAAA        | A        |
///
/// In text form, the hints are spelled `PF_INET`, `PF_INET6`, `PF_UNSPEC`
/// and `PF_UNSPEC6`, respectively.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FamilyHint {
    /// Only resolve and use IPv4 addresses.
    Ipv4Only,

    /// Only resolve and use IPv6 addresses.
    Ipv6Only,

    /// Try IPv4 addresses first, then IPv6 addresses.
    #[default]
    PreferIpv4,

    /// Try IPv6 addresses first, then IPv4 addresses.
    PreferIpv6,
}

impl FamilyHint {
    /// Returns the query to issue first.
    pub fn first_query(self) -> RecordType {
        match self {
            FamilyHint::Ipv4Only | FamilyHint::PreferIpv4 => RecordType::A,
            FamilyHint::Ipv6Only | FamilyHint::PreferIpv6 => RecordType::Aaaa,
        }
    }

    /// Returns the query to issue after the first one, if any.
    pub fn fallback_query(self) -> Option<RecordType> {
        match self {
            FamilyHint::Ipv4Only | FamilyHint::Ipv6Only => None,
            FamilyHint::PreferIpv4 => Some(RecordType::Aaaa),
            FamilyHint::PreferIpv6 => Some(RecordType::A),
        }
    }

    /// Returns the textual form of the hint.
    pub fn as_str(self) -> &'static str {
        match self {
            FamilyHint::Ipv4Only => "PF_INET",
            FamilyHint::Ipv6Only => "PF_INET6",
            FamilyHint::PreferIpv4 => "PF_UNSPEC",
            FamilyHint::PreferIpv6 => "PF_UNSPEC6",
        }
    }
}

impl FromStr for FamilyHint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PF_INET" => Ok(FamilyHint::Ipv4Only),
            "PF_INET6" => Ok(FamilyHint::Ipv6Only),
            "PF_UNSPEC" => Ok(FamilyHint::PreferIpv4),
            "PF_UNSPEC6" => Ok(FamilyHint::PreferIpv6),
            _ => Err(Error::InvalidAddressFamily(s.into())),
        }
    }
}

impl fmt::Display for FamilyHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FamilyHint {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FamilyHint {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

//------------ CandidateList -------------------------------------------------

/// The ordered list of addresses a dialer will try to connect to.
///
/// Addresses and their families are kept in two sequences that must
/// always have the same length. A list where that is not the case is
/// corrupt and unusable.
#[derive(Clone, Debug, Default)]
pub struct CandidateList {
    /// The candidate addresses in order.
    addresses: Vec<IpAddr>,

    /// The family of each address.
    families: Vec<Family>,

    /// Index of the next candidate to hand out.
    cursor: usize,
}

impl CandidateList {
    /// Creates a new, empty list.
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends an address of the given family.
    pub fn push(&mut self, addr: IpAddr, family: Family) -> Result<(), Error> {
        if self.addresses.len() != self.families.len() {
            return Err(Error::AddressListDesync);
        }
        self.addresses.push(addr);
        self.families.push(family);
        Ok(())
    }

    /// Returns the next untried candidate.
    ///
    /// Returns `Ok(None)` once all candidates have been handed out.
    pub fn next_candidate(
        &mut self,
    ) -> Result<Option<(IpAddr, Family)>, Error> {
        match (
            self.addresses.get(self.cursor),
            self.families.get(self.cursor),
        ) {
            (Some(addr), Some(family)) => {
                self.cursor += 1;
                Ok(Some((*addr, *family)))
            }
            (None, None) => Ok(None),
            _ => Err(Error::AddressListDesync),
        }
    }

    /// Returns the number of candidates in the list.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Returns whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Returns the number of candidates not yet handed out.
    pub fn remaining(&self) -> usize {
        self.addresses.len().saturating_sub(self.cursor)
    }

    /// Returns an iterator over all candidates.
    pub fn iter(&self) -> impl Iterator<Item = (IpAddr, Family)> + '_ {
        self.addresses
            .iter()
            .copied()
            .zip(self.families.iter().copied())
    }

    /// Corrupts the list by appending an address without a family.
    #[cfg(test)]
    pub(crate) fn push_address_only(&mut self, addr: IpAddr) {
        self.addresses.push(addr);
    }
}

//============ Tests =========================================================
