//! Control-tree (`dctl`) contract: a hierarchical introspection namespace
//! the core registers leaves into (`search.status`, `cache.hit_rate`,
//! `pipeline.pend_count`, per-filter counters), keyed by slash-separated
//! path.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{ContractError, ContractResult};

/// A leaf or node entry as returned by `list_nodes`/`list_leafs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DctlEntry {
    pub path: String,
    pub dtype: DctlType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DctlType {
    U64,
    Bytes,
    Text,
}

impl DctlType {
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::U64 => 0,
            Self::Bytes => 1,
            Self::Text => 2,
        }
    }

    #[must_use]
    pub const fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::U64),
            1 => Some(Self::Bytes),
            2 => Some(Self::Text),
            _ => None,
        }
    }
}

/// Hierarchical name/value introspection surface, out of scope for the
/// wire binding (a unix-socket listener) but consumed by the core through
/// this trait for leaf registration and reads.
pub trait ControlTree: Send + Sync {
    /// # Errors
    /// Returns [`ContractError::PathNotFound`] if `path` has no leaf.
    fn read_leaf(&self, path: &str) -> ContractResult<DctlEntry>;

    /// Register or overwrite a leaf's value.
    fn write_leaf(&self, path: &str, dtype: DctlType, data: Vec<u8>);

    /// Immediate child *node* names (non-leaf) under `path`.
    fn list_nodes(&self, path: &str) -> Vec<String>;

    /// Immediate child *leaf* entries under `path`.
    fn list_leafs(&self, path: &str) -> Vec<DctlEntry>;
}

/// In-process [`ControlTree`], keyed by `/`-joined path segments in a
/// `BTreeMap` so prefix scans (`list_nodes`/`list_leafs`) are cheap range
/// queries.
#[derive(Default)]
pub struct InMemoryControlTree {
    leaves: Mutex<BTreeMap<String, (DctlType, Vec<u8>)>>,
}

impl InMemoryControlTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> String {
        path.trim_matches('/').to_string()
    }
}

impl ControlTree for InMemoryControlTree {
    fn read_leaf(&self, path: &str) -> ContractResult<DctlEntry> {
        let key = Self::normalize(path);
        self.leaves
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
            .map(|(dtype, data)| DctlEntry {
                path: key.clone(),
                dtype: *dtype,
                data: data.clone(),
            })
            .ok_or_else(|| ContractError::PathNotFound(key))
    }

    fn write_leaf(&self, path: &str, dtype: DctlType, data: Vec<u8>) {
        let key = Self::normalize(path);
        self.leaves
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, (dtype, data));
    }

    fn list_nodes(&self, path: &str) -> Vec<String> {
        let prefix = Self::normalize(path);
        let scan_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        let leaves = self
            .leaves
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut nodes: Vec<String> = leaves
            .keys()
            .filter_map(|key| key.strip_prefix(&scan_prefix))
            .filter_map(|rest| rest.split_once('/'))
            .map(|(node, _)| node.to_string())
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    fn list_leafs(&self, path: &str) -> Vec<DctlEntry> {
        let prefix = Self::normalize(path);
        let scan_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        self.leaves
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|(key, _)| {
                key.strip_prefix(&scan_prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(key, (dtype, data))| DctlEntry {
                path: key.clone(),
                dtype: *dtype,
                data: data.clone(),
            })
            .collect()
    }
}

/// Wire framing for a single dctl exchange: `{op, err, dtype, plen, dlen,
/// path, data}`, little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DctlMessage {
    pub op: u8,
    pub err: u8,
    pub dtype: u8,
    pub path: String,
    pub data: Vec<u8>,
}

impl DctlMessage {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let path_bytes = self.path.as_bytes();
        let mut buf = Vec::with_capacity(11 + path_bytes.len() + self.data.len());
        buf.push(self.op);
        buf.push(self.err);
        buf.push(self.dtype);
        buf.extend_from_slice(&(u16::try_from(path_bytes.len()).unwrap_or(u16::MAX)).to_le_bytes());
        buf.extend_from_slice(&(u32::try_from(self.data.len()).unwrap_or(u32::MAX)).to_le_bytes());
        buf.extend_from_slice(path_bytes);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// # Errors
    /// Returns [`ContractError::MalformedMessage`] if `buf` is truncated
    /// or the declared lengths don't match the remaining bytes.
    pub fn decode(buf: &[u8]) -> ContractResult<Self> {
        if buf.len() < 9 {
            return Err(ContractError::MalformedMessage("header truncated".into()));
        }
        let op = buf[0];
        let err = buf[1];
        let dtype = buf[2];
        let plen = u16::from_le_bytes([buf[3], buf[4]]) as usize;
        let dlen = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
        let body = &buf[9..];
        if body.len() < plen + dlen {
            return Err(ContractError::MalformedMessage("body truncated".into()));
        }
        let path = String::from_utf8(body[..plen].to_vec())
            .map_err(|e| ContractError::MalformedMessage(e.to_string()))?;
        let data = body[plen..plen + dlen].to_vec();
        Ok(Self {
            op,
            err,
            dtype,
            path,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_leaf_round_trips() {
        let tree = InMemoryControlTree::new();
        tree.write_leaf("search.status", DctlType::Text, b"ACTIVE".to_vec());
        let entry = tree.read_leaf("search.status").unwrap();
        assert_eq!(entry.data, b"ACTIVE");
        assert_eq!(entry.dtype, DctlType::Text);
    }

    #[test]
    fn read_missing_leaf_errors() {
        let tree = InMemoryControlTree::new();
        assert!(tree.read_leaf("nope").is_err());
    }

    #[test]
    fn list_nodes_and_leafs_partition_by_depth() {
        let tree = InMemoryControlTree::new();
        tree.write_leaf("pipeline.pend_count", DctlType::U64, 3u64.to_le_bytes().to_vec());
        tree.write_leaf("filter/f1/hit_count", DctlType::U64, 1u64.to_le_bytes().to_vec());
        tree.write_leaf("filter/f2/hit_count", DctlType::U64, 2u64.to_le_bytes().to_vec());

        assert_eq!(tree.list_leafs("").len(), 1);
        let nodes = tree.list_nodes("");
        assert!(nodes.contains(&"filter".to_string()));
        let filter_nodes = tree.list_nodes("filter");
        assert_eq!(filter_nodes, vec!["f1".to_string(), "f2".to_string()]);
    }

    #[test]
    fn message_encode_decode_round_trip() {
        let msg = DctlMessage {
            op: 1,
            err: 0,
            dtype: DctlType::U64.wire_code(),
            path: "cache.hit_rate".to_string(),
            data: 42u64.to_le_bytes().to_vec(),
        };
        let encoded = msg.encode();
        let decoded = DctlMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        assert!(DctlMessage::decode(&[1, 2, 3]).is_err());
    }
}
