//! Instance identifiers and the addresses an instance can be looked up by.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Identifier of a compute instance.
///
/// Instance IDs are opaque to the service; the only rule is that they are
/// non-empty once surrounding whitespace is removed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Parse and validate an instance ID.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInstanceId(
                "instance id must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Validate an IP address literal and return it as supplied (trimmed).
///
/// The text is NOT canonicalised: `fe80:0::1` stays `fe80:0::1`. Address
/// comparison in the store is case-insensitive string equality, so callers
/// are expected to send consistently formatted addresses.
pub fn parse_address(s: &str) -> Result<String> {
    let trimmed = s.trim();
    trimmed
        .parse::<IpAddr>()
        .map_err(|_| Error::InvalidAddress(s.to_string()))?;
    Ok(trimmed.to_string())
}

/// The full set of addresses requested for one instance in a single write.
///
/// An empty set is valid and means the instance claims no addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressSet(Vec<String>);

impl AddressSet {
    /// Validate every address in `addresses`.
    pub fn parse<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = addresses
            .into_iter()
            .map(|a| parse_address(a.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(parsed))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
