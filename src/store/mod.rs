//! Persistent key=value store: in-memory map, codecs, and save protocol

pub mod codec;
pub mod map;
pub mod persistence;

pub use codec::{CodecError, Document, Format};
pub use map::{ConfigMap, ConfigStore};
pub use persistence::{FilePersistence, PersistenceOptions, StoreError, StoreLocation};
