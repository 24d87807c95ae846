//! Core data types for Whanau

use crate::transport::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A totally ordered identifier, used both as a record key and as a
/// per-layer node id so fingers and successor keys compare directly.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Create a new key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to the owned string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The value routed for a key: a pointer to the replication cluster that
/// holds the authoritative record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Value {
    /// Addresses of the cluster members hosting this key
    pub servers: Vec<String>,
    /// Signed record envelope, carried untouched
    #[serde(default)]
    pub envelope: Vec<u8>,
}

impl Value {
    /// Create a value pointing at the given servers, with no envelope
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            envelope: Vec::new(),
        }
    }
}

/// A key/value pair as cached or routed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: Key,
    pub value: Value,
}

impl Record {
    pub fn new(key: impl Into<Key>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A routing pointer discovered at one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finger {
    /// The layer id reported by `server`
    pub id: Key,
    /// Where to send queries for this finger
    pub server: Address,
}

impl Finger {
    pub fn new(id: Key, server: Address) -> Self {
        Self { id, server }
    }
}

/// Sort a finger table ascending by id
pub fn sort_fingers(fingers: &mut [Finger]) {
    fingers.sort_by(|a, b| a.id.cmp(&b.id));
}

/// Sort a successor table ascending by key, keeping the order of duplicates
pub fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| a.key.cmp(&b.key));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_is_lexicographic() {
        let mut keys: Vec<Key> = ["10", "2", "1"].into_iter().map(Key::from).collect();
        keys.sort();
        assert_eq!(keys, vec![Key::from("1"), Key::from("10"), Key::from("2")]);
    }

    #[test]
    fn test_sort_records_is_stable() {
        let mut records = vec![
            Record::new("b", Value::new(vec!["first".into()])),
            Record::new("a", Value::default()),
            Record::new("b", Value::new(vec!["second".into()])),
        ];
        sort_records(&mut records);

        assert_eq!(records[0].key, Key::from("a"));
        assert_eq!(records[1].value.servers, vec!["first".to_string()]);
        assert_eq!(records[2].value.servers, vec!["second".to_string()]);
    }

    #[test]
    fn test_sort_fingers() {
        let mut fingers = vec![
            Finger::new(Key::from("z"), Address::new("n1")),
            Finger::new(Key::from("c"), Address::new("n2")),
        ];
        sort_fingers(&mut fingers);
        assert_eq!(fingers[0].id, Key::from("c"));
    }
}
