//! Strong type definitions for Graft.
//!
//! Identifiers are newtypes to prevent mixing them with arbitrary strings,
//! and property values are restricted to a portable set so that any two
//! instances can exchange them without schema knowledge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known property keys.
pub mod keys {
    /// Human-readable entity name, used by list-syncables and name lookups.
    pub const NAME: &str = "name";
    /// Path of a file's content relative to the configured storage base.
    pub const RELATIVE_FILE_PATH: &str = "relativeFilePath";
    /// Size in bytes of a file's content.
    pub const SIZE: &str = "size";
    /// Hex-encoded BLAKE3 checksum of a file's content.
    pub const CHECKSUM: &str = "checksum";
}

/// Identifier of a node or relationship within one instance.
///
/// Identifiers are opaque strings. A source-instance id and a
/// destination-instance id for the same logical entity usually differ;
/// the [`IdentityMap`](crate::IdentityMap) translates between them.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh random identifier (32 lowercase hex characters).
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Scalar member of a list property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Unix milliseconds.
    Timestamp(i64),
}

/// A portable property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Unix milliseconds.
    Timestamp(i64),
    List(Vec<Primitive>),
    /// Id of another entity in the source instance.
    Reference(EntityId),
}

impl PropertyValue {
    /// The string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Boolean(v)
    }
}

/// Ordered map of property names to portable values.
///
/// Keys iterate in lexicographic order so that two instances holding the
/// same properties encode them identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<String, PropertyValue>);

impl PropertyMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    /// Overwrite every key present in `other`; keys only in `self` survive.
    pub fn merge(&mut self, other: &PropertyMap) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// The `name` property, if it is a string.
    pub fn name(&self) -> Option<&str> {
        self.get(keys::NAME).and_then(PropertyValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct_hex() {
        let a = EntityId::generate();
        let b = EntityId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_entity_id_display() {
        let id = EntityId::new("abc123");
        assert_eq!(format!("{}", id), "abc123");
        assert_eq!(format!("{:?}", id), "EntityId(abc123)");
    }

    #[test]
    fn test_merge_overwrites_and_keeps() {
        let mut dest = PropertyMap::new().with("name", "old").with("keep", 1i64);
        let incoming = PropertyMap::new().with("name", "new").with("extra", true);

        dest.merge(&incoming);

        assert_eq!(dest.name(), Some("new"));
        assert_eq!(dest.get("keep"), Some(&PropertyValue::Integer(1)));
        assert_eq!(dest.get("extra"), Some(&PropertyValue::Boolean(true)));
        assert_eq!(dest.len(), 3);
    }

    #[test]
    fn test_property_map_iterates_sorted() {
        let map = PropertyMap::new().with("b", 2i64).with("a", 1i64).with("c", 3i64);
        let keys: Vec<&str> = map.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
