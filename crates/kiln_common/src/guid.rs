//! Stable 128-bit asset identifiers.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A stable 128-bit identifier for a logical artifact.
///
/// A `Guid` identifies the same asset across builds and across machines; it
/// keys the dependency set, the persisted hash records, and the build cache.
/// Serialized as a 32-character lowercase hex string so it can also key JSON
/// maps.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid([u8; 16]);

impl Guid {
    /// The all-zero identifier, used as "no asset".
    pub const NIL: Guid = Guid([0; 16]);

    /// Creates a `Guid` from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a `Guid` from a `u128` (big-endian byte order).
    ///
    /// Primarily intended for tests and synthesized identifiers.
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_be_bytes())
    }

    /// Returns the raw bytes of this identifier.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns `true` if this is the all-zero identifier.
    pub fn is_nil(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Error returned when parsing a `Guid` from a hex string fails.
#[derive(Debug, thiserror::Error)]
#[error("invalid guid: expected 32 hex characters, got {input:?}")]
pub struct ParseGuidError {
    /// The offending input.
    pub input: String,
}

impl FromStr for Guid {
    type Err = ParseGuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseGuidError {
            input: s.to_string(),
        };
        if s.len() != 32 || !s.is_ascii() {
            return Err(err());
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| err())?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| err())?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct GuidVisitor;

impl Visitor<'_> for GuidVisitor {
    type Value = Guid;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 32-character hex string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Guid, E> {
        v.parse().map_err(|_| E::custom("invalid guid"))
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(GuidVisitor)
    }
}
