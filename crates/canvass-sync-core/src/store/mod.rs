//! On-device persistence for the offline subsystem.
//!
//! Every collection is a [`Store<T>`] over a [`Record`] type. Each call is
//! its own atomic unit; nothing spans collections. Two backends exist:
//! [`MemoryStore`] for tests and ephemeral sessions, and [`JsonFileStore`]
//! which keeps one JSON file per collection.

mod collection;
pub mod database;
pub mod file;
pub mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use database::LocalDatabase;
pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// A type that can live in a collection.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name, also the on-disk file stem.
    const COLLECTION: &'static str;
    /// Secondary indexes maintained for this collection.
    const INDEXES: &'static [&'static str];

    fn key(&self) -> String;

    /// Value of `index` for this record, or `None` if the record is not
    /// present in that index.
    fn index_value(&self, index: &str) -> Option<String>;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize collection {collection}: {source}")]
    Serialization {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Collection {collection} has no index named {index}")]
    UnknownIndex {
        collection: &'static str,
        index: String,
    },
}

/// Typed CRUD over one collection.
#[async_trait]
pub trait Store<T: Record>: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<T>, StoreError>;

    /// All records, ordered by primary key.
    async fn all(&self) -> Result<Vec<T>, StoreError>;

    /// Insert or replace by primary key.
    async fn put(&self, record: T) -> Result<(), StoreError>;

    async fn put_many(&self, records: Vec<T>) -> Result<(), StoreError>;

    /// Returns whether a record was removed. Deleting a missing key is not
    /// an error.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically replace (or with `None`, delete) the record at `key`, but
    /// only if it exists and `expected` holds for it. Returns whether the
    /// swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
        replacement: Option<T>,
    ) -> Result<bool, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Records whose `index` value equals `value`, ordered by primary key.
    async fn find_by(&self, index: &str, value: &str) -> Result<Vec<T>, StoreError>;
}
