//! The set of scales this process is allowed to connect to.

use crate::mac_address::MacAddress;
use std::collections::BTreeSet;

/// Normalized set of target device addresses, fixed for the lifetime of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetAllowlist {
    addresses: BTreeSet<MacAddress>,
}

impl TargetAllowlist {
    pub fn new(addresses: impl IntoIterator<Item = MacAddress>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }

    pub fn contains(&self, address: &MacAddress) -> bool {
        self.addresses.contains(address)
    }

    /// A copy of this allowlist with the given addresses removed.
    pub fn without(&self, excluded: &BTreeSet<MacAddress>) -> Self {
        Self {
            addresses: self.addresses.difference(excluded).copied().collect(),
        }
    }

    /// True when every address of this allowlist is in `set`.
    pub fn is_covered_by(&self, set: &BTreeSet<MacAddress>) -> bool {
        self.addresses.is_subset(set)
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacAddress> {
        self.addresses.iter()
    }
}
