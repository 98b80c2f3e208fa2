//! Persistence for world runs
//!
//! Two layers:
//! - [`DocumentStore`]: the document collaborator the world reads its
//!   configuration from and writes per-step metrics and the latest state to.
//!   Documents are free-form JSON keyed by collection and id.
//! - [`WorldSnapshot`]: a versioned binary snapshot of a world, encoded with
//!   bincode, used to stop a run and pick it up later.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use thiserror::Error;

use crate::sectors::SectorKind;

/// Collection holding configuration documents
pub const CONFIG_COLLECTION: &str = "config";
/// Collection receiving one metrics document per step
pub const METRICS_COLLECTION: &str = "metrics";
/// Collection holding the latest state per world id
pub const STATE_COLLECTION: &str = "world_state";

/// Snapshot format version. Bump when `WorldSnapshot` changes shape.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Get-by-id and insert/upsert-by-id over JSON documents
pub trait DocumentStore {
    fn get(&self, collection: &str, id: &str) -> Option<serde_json::Value>;

    /// Insert or replace the document `id`
    fn upsert(&mut self, collection: &str, id: &str, document: serde_json::Value);

    /// Insert under a generated id, which is returned
    fn insert(&mut self, collection: &str, document: serde_json::Value) -> String;

    fn count(&self, collection: &str) -> usize;
}

/// In-process store, mostly for tests and the harness
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    collections: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All documents of `collection` in id order
    pub fn documents(&self, collection: &str) -> Vec<&serde_json::Value> {
        self.collections
            .get(collection)
            .map(|docs| docs.values().collect())
            .unwrap_or_default()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: &str, id: &str) -> Option<serde_json::Value> {
        self.collections.get(collection)?.get(id).cloned()
    }

    fn upsert(&mut self, collection: &str, id: &str, document: serde_json::Value) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    fn insert(&mut self, collection: &str, document: serde_json::Value) -> String {
        self.next_id += 1;
        // Zero-padded so id order matches insertion order
        let id = format!("{:012}", self.next_id);
        self.upsert(collection, &id, document);
        id
    }

    fn count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }
}

/// Everything needed to resume a world at the step it was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub version: u32,
    pub world_id: String,
    /// Last completed step
    pub step: u64,
    pub metrics: BTreeMap<String, f64>,
    pub energy_stored_kwh: f64,
    /// `Sector::stock_levels` per registered sector
    pub sectors: BTreeMap<SectorKind, BTreeMap<String, f64>>,
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
    #[error("Save version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Write `snapshot` to `writer`.
pub fn save_snapshot<W: Write>(writer: W, snapshot: &WorldSnapshot) -> Result<(), SaveError> {
    bincode::serialize_into(writer, snapshot)?;
    Ok(())
}

/// Read a snapshot back, rejecting other format versions.
pub fn load_snapshot<R: Read>(reader: R) -> Result<WorldSnapshot, SaveError> {
    let snapshot: WorldSnapshot = bincode::deserialize_from(reader)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SNAPSHOT_VERSION,
            found: snapshot.version,
        });
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(version: u32) -> WorldSnapshot {
        WorldSnapshot {
            version,
            world_id: "test".into(),
            step: 12,
            metrics: BTreeMap::from([("IND-DUST-COV".to_string(), 0.25)]),
            energy_stored_kwh: 1500.0,
            sectors: BTreeMap::from([(
                SectorKind::Manufacturing,
                BTreeMap::from([("water".to_string(), 40.0)]),
            )]),
        }
    }

    #[test]
    fn test_snapshot_survives_save_and_load() {
        let original = snapshot(SNAPSHOT_VERSION);
        let mut buf = Vec::new();
        save_snapshot(&mut buf, &original).unwrap();
        let loaded = load_snapshot(buf.as_slice()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut buf = Vec::new();
        save_snapshot(&mut buf, &snapshot(SNAPSHOT_VERSION + 1)).unwrap();
        match load_snapshot(buf.as_slice()) {
            Err(SaveError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, SNAPSHOT_VERSION);
                assert_eq!(found, SNAPSHOT_VERSION + 1);
            }
            other => panic!("expected version mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_snapshot_is_an_error() {
        let mut buf = Vec::new();
        save_snapshot(&mut buf, &snapshot(SNAPSHOT_VERSION)).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(matches!(load_snapshot(buf.as_slice()), Err(SaveError::Bincode(_))));
    }

    #[test]
    fn test_memory_store_upsert_replaces() {
        let mut store = MemoryStore::new();
        store.upsert(STATE_COLLECTION, "w", json!({"step": 1}));
        store.upsert(STATE_COLLECTION, "w", json!({"step": 2}));
        assert_eq!(store.count(STATE_COLLECTION), 1);
        assert_eq!(store.get(STATE_COLLECTION, "w"), Some(json!({"step": 2})));
        assert_eq!(store.get(STATE_COLLECTION, "other"), None);
    }

    #[test]
    fn test_memory_store_insert_keeps_order() {
        let mut store = MemoryStore::new();
        let first = store.insert(METRICS_COLLECTION, json!({"step": 1}));
        let second = store.insert(METRICS_COLLECTION, json!({"step": 2}));
        assert_ne!(first, second);
        let steps: Vec<_> = store
            .documents(METRICS_COLLECTION)
            .iter()
            .map(|doc| doc["step"].as_u64().unwrap())
            .collect();
        assert_eq!(steps, vec![1, 2]);
    }
}
