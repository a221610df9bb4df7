//! Address set differencing.
//!
//! Compares the addresses currently stored for an instance with the set a
//! caller is requesting. Matching is ASCII case-insensitive (IP literals are
//! ASCII) and formatting is never normalised.

use crate::models::InstanceIpAddressRow;
use std::collections::HashSet;

/// Something carrying a lookup address.
pub trait Addressed {
    fn address(&self) -> &str;
}

impl Addressed for InstanceIpAddressRow {
    fn address(&self) -> &str {
        &self.address
    }
}

impl Addressed for String {
    fn address(&self) -> &str {
        self
    }
}

impl Addressed for &str {
    fn address(&self) -> &str {
        self
    }
}

/// Result of comparing `current` against `requested`.
#[derive(Debug)]
pub struct AddressDiff<'a, C> {
    /// Current entries not present in the request.
    pub stale: Vec<&'a C>,
    /// Current entries also present in the request; left untouched.
    pub unchanged: Vec<&'a C>,
    /// Requested addresses not present in `current`, first spelling wins
    /// when the request repeats an address in a different case.
    pub new: Vec<&'a str>,
}

impl<'a, C: Addressed> AddressDiff<'a, C> {
    /// Compute the stale/new split between `current` and `requested`.
    pub fn compute<R: Addressed>(current: &'a [C], requested: &'a [R]) -> Self {
        let requested_keys: HashSet<String> = requested
            .iter()
            .map(|r| r.address().to_ascii_lowercase())
            .collect();
        let current_keys: HashSet<String> = current
            .iter()
            .map(|c| c.address().to_ascii_lowercase())
            .collect();

        let (unchanged, stale): (Vec<&C>, Vec<&C>) = current
            .iter()
            .partition(|c| requested_keys.contains(&c.address().to_ascii_lowercase()));

        let mut seen = HashSet::new();
        let new = requested
            .iter()
            .map(Addressed::address)
            .filter(|a| {
                let key = a.to_ascii_lowercase();
                !current_keys.contains(&key) && seen.insert(key)
            })
            .collect();

        Self {
            stale,
            unchanged,
            new,
        }
    }

    /// True when applying the diff would not change any association.
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.new.is_empty()
    }
}
