//! Linkable and partition identifiers

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LinkError;

/// Globally unique 128-bit object identifier.
///
/// The textual form is four 8-digit uppercase hex words joined by `.`,
/// most significant word first. Numeric ordering matches the ordering of
/// that text, which the link ownership rule relies on.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkableId(u128);

impl LinkableId {
    /// The "no reference" identifier
    pub const NIL: Self = Self(0);

    /// Create from the raw 128-bit value
    #[inline]
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    /// Create from four 32-bit words, most significant first
    pub const fn from_words(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self((a as u128) << 96 | (b as u128) << 64 | (c as u128) << 32 | d as u128)
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        loop {
            let id = Self(uuid::Uuid::new_v4().as_u128());
            if !id.is_nil() {
                return id;
            }
        }
    }

    /// Get the raw value
    #[inline]
    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// Get the four words, most significant first
    pub const fn words(&self) -> [u32; 4] {
        [
            (self.0 >> 96) as u32,
            (self.0 >> 64) as u32,
            (self.0 >> 32) as u32,
            self.0 as u32,
        ]
    }

    /// Check if this is the nil identifier
    #[inline]
    pub const fn is_nil(&self) -> bool {
        self.0 == 0
    }

    /// Parse the textual form; the empty string is the nil identifier
    pub fn parse(text: &str) -> Result<Self, LinkError> {
        if text.is_empty() {
            return Ok(Self::NIL);
        }

        let mut words = [0u32; 4];
        let mut parts = text.split('.');
        for word in &mut words {
            let part = parts
                .next()
                .filter(|p| !p.is_empty() && p.len() <= 8)
                .ok_or_else(|| LinkError::InvalidIdentifier(text.to_string()))?;
            *word = u32::from_str_radix(part, 16)
                .map_err(|_| LinkError::InvalidIdentifier(text.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(LinkError::InvalidIdentifier(text.to_string()));
        }

        Ok(Self::from_words(words[0], words[1], words[2], words[3]))
    }
}

impl fmt::Display for LinkableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.words();
        write!(f, "{:08X}.{:08X}.{:08X}.{:08X}", a, b, c, d)
    }
}

impl fmt::Debug for LinkableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkableId({})", self)
    }
}

impl FromStr for LinkableId {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for LinkableId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LinkableId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Identifier of an outer spatial partition.
///
/// Never empty: an object that is not placed has no partition at all.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(Arc<str>);

impl PartitionId {
    /// Create a partition ID, `None` for the empty string
    pub fn new(name: impl AsRef<str>) -> Option<Self> {
        let name = name.as_ref();
        if name.is_empty() {
            None
        } else {
            Some(Self(Arc::from(name)))
        }
    }

    /// Get the partition name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionId({})", &self.0)
    }
}

impl Serialize for PartitionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PartitionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::new(&text).ok_or_else(|| serde::de::Error::custom("empty partition id"))
    }
}

/// A stored reference: target identifier plus the partition it lives in
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkRef {
    pub id: LinkableId,
    pub partition: PartitionId,
}

impl LinkRef {
    pub fn new(id: LinkableId, partition: PartitionId) -> Self {
        Self { id, partition }
    }
}

impl fmt::Display for LinkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.partition)
    }
}
