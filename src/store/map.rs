//! Concurrency-safe configuration map and its persistence operations

use crate::store::codec::{self, Document, Format};
use crate::store::persistence::{FilePersistence, PersistenceOptions, StoreError, StoreLocation};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// The full capability set of a persistent configuration store.
///
/// Everything a store can do lives on this one trait: in-memory access
/// (`get`, `set`, `keys`), persistence (`load`, `save`, `force_save`), and
/// the raw codec operations (`serialize`, `parse`). Directory and file
/// naming are injected at construction through [`StoreLocation`].
pub trait ConfigStore {
    /// Returns the value for the key, or the empty string when absent.
    fn get(&self, key: &str) -> String;

    /// Inserts or overwrites the value and stamps the update time. Does not
    /// persist; call [`ConfigStore::save`] explicitly when required.
    fn set(&self, key: &str, value: &str);

    /// Snapshot of the current keys, in no guaranteed order.
    fn keys(&self) -> Vec<String>;

    /// Replaces the in-memory state wholesale with the on-disk document,
    /// materializing an empty persisted document first if the path does not
    /// exist. Unsaved local mutations are discarded; save first to keep them.
    fn load(&self) -> Result<(), StoreError>;

    /// Persists the store, refusing to overwrite a document saved by another
    /// writer since this instance last synchronized. The refusal surfaces as
    /// [`StoreError::StaleWrite`]; reload and retry to recover.
    fn save(&self) -> Result<(), StoreError>;

    /// Persists the store unconditionally (last writer wins).
    fn force_save(&self) -> Result<(), StoreError>;

    /// Encodes the current state in the store's configured format.
    fn serialize(&self) -> Result<String, StoreError>;

    /// Merges pairs parsed from the input into the store. Existing keys are
    /// overwritten, never deleted.
    fn parse(&self, input: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MapState {
    data: BTreeMap<String, String>,
    /// Stamped on every mutation.
    updated: Option<DateTime<Utc>>,
    /// Last synchronization with the backing file: set by a successful save
    /// and by load. This is the reference point for conflict detection.
    saved: Option<DateTime<Utc>>,
}

/// Concurrency-safe persistent key=value map.
///
/// A single reader-writer lock guards the map within one process: `get`
/// takes the shared side, every mutating or persisting operation takes the
/// exclusive side and holds it across its file I/O. Across processes the
/// only coordination is the save protocol's timestamp comparison.
pub struct ConfigMap {
    state: RwLock<MapState>,
    persistence: FilePersistence,
}

impl ConfigMap {
    /// Store at the default location: the resolved configuration directory
    /// for the current executable, file `config.json`, document format.
    pub fn new() -> Self {
        Self::with_location(StoreLocation::default())
    }

    pub fn with_location(location: StoreLocation) -> Self {
        Self::with_options(location, Format::default(), PersistenceOptions::default())
    }

    pub fn with_options(
        location: StoreLocation,
        format: Format,
        options: PersistenceOptions,
    ) -> Self {
        Self {
            state: RwLock::new(MapState::default()),
            persistence: FilePersistence::new(location, format, options),
        }
    }

    /// Builds a store from an already-serialized JSON document held in
    /// memory, without touching the filesystem.
    pub fn from_document_str(input: &str, location: StoreLocation) -> Result<Self, StoreError> {
        let doc = codec::decode_document(input)?;
        let map = Self::with_location(location);
        {
            let mut state = map.write_state();
            state.data = doc.data;
            state.saved = doc.saved;
            state.updated = doc.updated;
        }
        Ok(map)
    }

    /// Builds a store from a JSON document at an arbitrary path. The path
    /// does not become the store's location; pass that separately when the
    /// defaults are not wanted.
    pub fn from_file(path: impl AsRef<Path>, location: StoreLocation) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path)?;
        Self::from_document_str(&content, location)
    }

    /// Removes the key if present. Like `set`, this only mutates memory.
    pub fn delete(&self, key: &str) {
        let mut state = self.write_state();
        if state.data.remove(key).is_some() {
            state.updated = Some(Utc::now());
        }
    }

    /// `set` followed by `save`.
    pub fn set_save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set(key, value);
        self.save()
    }

    /// `set` followed by `force_save`.
    pub fn set_force_save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set(key, value);
        self.force_save()
    }

    /// Replaces the data with an empty map and persists it immediately,
    /// purging whatever the backing file held.
    pub fn init(&self) -> Result<(), StoreError> {
        let mut state = self.write_state();
        state.data.clear();
        state.updated = Some(Utc::now());
        self.write_locked(&mut state)
    }

    /// Path of the backing file. Does not check for existence.
    pub fn path(&self) -> PathBuf {
        self.persistence.path()
    }

    pub fn location(&self) -> &StoreLocation {
        self.persistence.location()
    }

    pub fn format(&self) -> Format {
        self.persistence.format()
    }

    /// Time of the last mutation, if any.
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.read_state().updated
    }

    /// Time of the last synchronization with the backing file, if any.
    pub fn saved(&self) -> Option<DateTime<Utc>> {
        self.read_state().saved
    }

    pub fn len(&self) -> usize {
        self.read_state().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().data.is_empty()
    }

    // A poisoned lock only means another thread panicked while holding it;
    // the map itself is never left half-written, so recover the guard.
    fn read_state(&self) -> RwLockReadGuard<'_, MapState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MapState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Encodes and writes the current state with a fresh `saved` stamp. The
    /// stamp is committed to memory only after the write succeeds, so a
    /// failed write leaves the in-memory timestamps untouched.
    fn write_locked(&self, state: &mut MapState) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut doc = self.document_for(state);
        doc.saved = Some(now);
        self.persistence.write(&doc)?;
        state.saved = Some(now);
        Ok(())
    }

    fn document_for(&self, state: &MapState) -> Document {
        let location = self.persistence.location();
        Document {
            dir: location.dir.clone(),
            file: location.file.clone(),
            data: state.data.clone(),
            saved: state.saved,
            updated: state.updated,
        }
    }
}

impl Default for ConfigMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for ConfigMap {
    fn get(&self, key: &str) -> String {
        self.read_state().data.get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        let mut state = self.write_state();
        state.data.insert(key.to_string(), value.to_string());
        state.updated = Some(Utc::now());
    }

    fn keys(&self) -> Vec<String> {
        self.read_state().data.keys().cloned().collect()
    }

    fn load(&self) -> Result<(), StoreError> {
        let mut state = self.write_state();

        if !self.persistence.path().exists() {
            // Materialize an empty persisted document so the path exists
            // after a successful load regardless of prior state.
            let mut empty = Document {
                dir: self.persistence.location().dir.clone(),
                file: self.persistence.location().file.clone(),
                ..Document::default()
            };
            empty.saved = Some(Utc::now());
            self.persistence.write(&empty)?;
        }

        let doc = self.persistence.read()?.unwrap_or_default();
        state.data = doc.data;
        state.saved = doc.saved;
        state.updated = doc.updated;

        debug!(
            path = %self.persistence.path().display(),
            keys = state.data.len(),
            "configuration loaded"
        );
        Ok(())
    }

    fn save(&self) -> Result<(), StoreError> {
        let mut state = self.write_state();
        self.persistence.check_conflict(state.saved)?;
        self.write_locked(&mut state)
    }

    fn force_save(&self) -> Result<(), StoreError> {
        let mut state = self.write_state();
        self.write_locked(&mut state)
    }

    fn serialize(&self) -> Result<String, StoreError> {
        let state = self.read_state();
        let doc = self.document_for(&state);
        Ok(self.persistence.format().encode(&doc)?)
    }

    fn parse(&self, input: &str) -> Result<(), StoreError> {
        let mut state = self.write_state();
        let merged = match self.persistence.format() {
            Format::Line => codec::parse_lines(input, &mut state.data)?,
            Format::Document => {
                let doc = codec::decode_document(input)?;
                let merged = doc.data.len();
                state.data.extend(doc.data);
                merged
            }
        };
        if merged > 0 {
            state.updated = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn map_in(dir: &TempDir) -> ConfigMap {
        ConfigMap::with_location(StoreLocation::new(dir.path().join("confmap"), "config.json"))
    }

    #[test]
    fn test_set_then_get() {
        let temp_dir = TempDir::new().unwrap();
        let map = map_in(&temp_dir);

        map.set("name", "Mr. Rob");
        assert_eq!(map.get("name"), "Mr. Rob");
    }

    #[test]
    fn test_get_absent_key_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let map = map_in(&temp_dir);

        assert_eq!(map.get("name"), "");
    }

    #[test]
    fn test_set_stamps_updated() {
        let temp_dir = TempDir::new().unwrap();
        let map = map_in(&temp_dir);

        assert!(map.updated().is_none());
        map.set("a", "1");
        let first = map.updated().unwrap();
        map.set("a", "2");
        assert!(map.updated().unwrap() >= first);
    }

    #[test]
    fn test_keys_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let map = map_in(&temp_dir);

        map.set("b", "2");
        map.set("a", "1");

        let mut keys = map.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_delete_removes_and_stamps() {
        let temp_dir = TempDir::new().unwrap();
        let map = map_in(&temp_dir);

        map.set("a", "1");
        let after_set = map.updated().unwrap();

        map.delete("missing");
        assert_eq!(map.updated().unwrap(), after_set);

        map.delete("a");
        assert_eq!(map.get("a"), "");
        assert!(map.updated().unwrap() >= after_set);
    }

    #[test]
    fn test_from_document_str() {
        let temp_dir = TempDir::new().unwrap();
        let location = StoreLocation::new(temp_dir.path().join("confmap"), "config.json");

        let map =
            ConfigMap::from_document_str(r#"{"data":{"name":"Mr. Rob"}}"#, location).unwrap();

        assert_eq!(map.get("name"), "Mr. Rob");
        assert!(map.saved().is_none());
    }

    #[test]
    fn test_from_document_str_rejects_malformed_input() {
        let temp_dir = TempDir::new().unwrap();
        let location = StoreLocation::new(temp_dir.path().join("confmap"), "config.json");

        assert!(ConfigMap::from_document_str("{not json", location).is_err());
    }

    #[test]
    fn test_serialize_document_form() {
        let temp_dir = TempDir::new().unwrap();
        let map = map_in(&temp_dir);

        map.set("name", "Mr. Rob");
        let out = map.serialize().unwrap();

        let doc = codec::decode_document(&out).unwrap();
        assert_eq!(doc.data.get("name").map(String::as_str), Some("Mr. Rob"));
        assert!(doc.updated.is_some());
        assert!(doc.saved.is_none());
    }

    #[test]
    fn test_parse_merges_additively() {
        let temp_dir = TempDir::new().unwrap();
        let map = ConfigMap::with_options(
            StoreLocation::new(temp_dir.path().join("confmap"), "values"),
            Format::Line,
            PersistenceOptions::default(),
        );

        map.set("keep", "old");
        map.parse("new=1\nkeep=replaced\n").unwrap();

        assert_eq!(map.get("keep"), "replaced");
        assert_eq!(map.get("new"), "1");
    }

    #[test]
    fn test_parse_error_leaves_state_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let map = ConfigMap::with_options(
            StoreLocation::new(temp_dir.path().join("confmap"), "values"),
            Format::Line,
            PersistenceOptions::default(),
        );

        map.set("keep", "old");
        let before = map.updated().unwrap();

        assert!(map.parse("good=1\nbad line\n").is_err());

        assert_eq!(map.get("keep"), "old");
        assert_eq!(map.get("good"), "");
        assert_eq!(map.updated().unwrap(), before);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        use std::sync::Arc;
        use std::thread;

        let temp_dir = TempDir::new().unwrap();
        let map = Arc::new(map_in(&temp_dir));
        map.set("counter", "0");

        let mut handles = Vec::new();
        for i in 0..4 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for n in 0..50 {
                    if i == 0 {
                        map.set("counter", &n.to_string());
                    } else {
                        // Readers must always observe a complete value.
                        let value = map.get("counter");
                        assert!(!value.is_empty());
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
