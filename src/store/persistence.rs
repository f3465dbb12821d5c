//! File persistence and the optimistic-concurrency save protocol
//!
//! Independent process instances may point at the same path without any
//! shared lock. The only cross-process coordination is the advisory
//! timestamp comparison performed before each save: a document saved by
//! another writer after this instance last synchronized turns the save into
//! a recoverable stale-write error instead of silent data loss. The window
//! between the check and the write is not closed; that race is an accepted
//! limitation of the protocol.

use crate::resolve;
use crate::store::codec::{CodecError, Document, Format};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("newer configuration detected at {}", .path.display())]
    StaleWrite {
        path: PathBuf,
        disk_saved: DateTime<Utc>,
    },
}

impl StoreError {
    /// True for the recoverable stale-write condition. Callers are expected
    /// to answer it by reloading, reapplying their change, and saving again.
    pub fn is_stale_write(&self) -> bool {
        matches!(self, StoreError::StaleWrite { .. })
    }
}

/// Directory and file name composing the absolute path of the backing file.
/// Injected at construction; the store never consults ambient state for its
/// location after that.
#[derive(Debug, Clone)]
pub struct StoreLocation {
    pub dir: PathBuf,
    pub file: String,
}

impl Default for StoreLocation {
    fn default() -> Self {
        Self {
            dir: resolve::resolve_config_dir(&resolve::executable_name()),
            file: "config.json".to_string(),
        }
    }
}

impl StoreLocation {
    pub fn new(dir: impl Into<PathBuf>, file: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file: file.into(),
        }
    }

    /// Path to the backing file. Does not check for existence.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}

/// Permission bits applied to created directories and written files,
/// passed at construction instead of read from mutable package state.
#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    pub dir_permissions: u32,
    pub file_permissions: u32,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            dir_permissions: 0o700,
            file_permissions: 0o600,
        }
    }
}

/// Reads and writes the store's document at a fixed location through one of
/// the two codecs.
#[derive(Debug)]
pub struct FilePersistence {
    location: StoreLocation,
    format: Format,
    options: PersistenceOptions,
}

impl FilePersistence {
    pub fn new(location: StoreLocation, format: Format, options: PersistenceOptions) -> Self {
        Self {
            location,
            format,
            options,
        }
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn path(&self) -> PathBuf {
        self.location.path()
    }

    /// Reads and decodes the document at the path, or `None` if no file
    /// exists there yet.
    pub fn read(&self) -> Result<Option<Document>, StoreError> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(self.format.decode(&content)?))
    }

    /// Encodes and writes the document, creating the directory first when
    /// needed. The content goes to a temporary file in the same directory
    /// and is renamed into place, so a concurrent reader never observes a
    /// partially written document.
    pub fn write(&self, doc: &Document) -> Result<(), StoreError> {
        let content = self.format.encode(doc)?;
        self.ensure_directory_exists()?;

        let path = self.path();
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(self.options.file_permissions);
            fs::set_permissions(&temp_path, permissions)?;
        }

        fs::rename(&temp_path, &path)?;
        debug!(path = %path.display(), "configuration written");
        Ok(())
    }

    /// Inspects the on-disk document before a save. Returns the stale-write
    /// condition when the document carries a `saved` timestamp strictly
    /// later than this instance's last synchronization point. An instance
    /// that has never synchronized, or a document without a timestamp (the
    /// line format stores none), never conflicts.
    pub fn check_conflict(
        &self,
        last_synced: Option<DateTime<Utc>>,
    ) -> Result<Option<Document>, StoreError> {
        let on_disk = self.read()?;
        if let (Some(doc), Some(synced)) = (&on_disk, last_synced) {
            if let Some(disk_saved) = doc.saved {
                if disk_saved > synced {
                    debug!(
                        path = %self.path().display(),
                        %disk_saved,
                        last_synced = %synced,
                        "stale write refused"
                    );
                    return Err(StoreError::StaleWrite {
                        path: self.path(),
                        disk_saved,
                    });
                }
            }
        }
        Ok(on_disk)
    }

    fn ensure_directory_exists(&self) -> Result<(), StoreError> {
        let dir = &self.location.dir;
        if !dir.exists() {
            fs::create_dir_all(dir)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let permissions = fs::Permissions::from_mode(self.options.dir_permissions);
                fs::set_permissions(dir, permissions)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn persistence_at(dir: &TempDir, format: Format) -> FilePersistence {
        FilePersistence::new(
            StoreLocation::new(dir.path().join("confmap"), "config.json"),
            format,
            PersistenceOptions::default(),
        )
    }

    fn document_with(key: &str, value: &str) -> Document {
        let mut data = BTreeMap::new();
        data.insert(key.to_string(), value.to_string());
        Document {
            data,
            ..Document::default()
        }
    }

    #[test]
    fn test_read_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = persistence_at(&temp_dir, Format::Document);

        assert!(persistence.read().unwrap().is_none());
    }

    #[test]
    fn test_write_creates_directory_and_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = persistence_at(&temp_dir, Format::Document);

        let mut doc = document_with("name", "Mr. Rob");
        doc.saved = Some(Utc::now());
        persistence.write(&doc).unwrap();

        assert!(persistence.path().exists());
        let read_back = persistence.read().unwrap().unwrap();
        assert_eq!(read_back.data, doc.data);
        assert_eq!(read_back.saved, doc.saved);
    }

    #[test]
    fn test_write_leaves_no_temporary_file() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = persistence_at(&temp_dir, Format::Document);

        persistence.write(&document_with("a", "1")).unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path().join("confmap"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("config.json")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_applies_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let persistence = persistence_at(&temp_dir, Format::Document);
        persistence.write(&document_with("a", "1")).unwrap();

        let dir_mode = fs::metadata(temp_dir.path().join("confmap"))
            .unwrap()
            .permissions()
            .mode();
        let file_mode = fs::metadata(persistence.path())
            .unwrap()
            .permissions()
            .mode();

        assert_eq!(dir_mode & 0o777, 0o700);
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn test_conflict_requires_both_timestamps() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = persistence_at(&temp_dir, Format::Document);

        // No file at all: nothing to conflict with.
        assert!(persistence.check_conflict(Some(Utc::now())).unwrap().is_none());

        let mut doc = document_with("a", "1");
        doc.saved = Some(Utc::now());
        persistence.write(&doc).unwrap();

        // A never-synchronized instance may always write.
        assert!(persistence.check_conflict(None).unwrap().is_some());
    }

    #[test]
    fn test_conflict_on_newer_disk_document() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = persistence_at(&temp_dir, Format::Document);

        let synced = Utc::now();
        let mut doc = document_with("a", "1");
        doc.saved = Some(synced + chrono::Duration::seconds(5));
        persistence.write(&doc).unwrap();

        let err = persistence.check_conflict(Some(synced)).unwrap_err();
        assert!(err.is_stale_write());

        // Synchronized at or after the disk save: no conflict.
        assert!(persistence
            .check_conflict(Some(synced + chrono::Duration::seconds(5)))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_line_format_documents_never_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = persistence_at(&temp_dir, Format::Line);

        persistence.write(&document_with("a", "1")).unwrap();

        let content = fs::read_to_string(persistence.path()).unwrap();
        assert_eq!(content, "a=1\n");

        // The line form carries no saved timestamp, so any sync point passes.
        assert!(persistence
            .check_conflict(Some(Utc::now()))
            .unwrap()
            .is_some());
    }
}
