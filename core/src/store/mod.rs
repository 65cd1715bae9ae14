//! Entity repositories
//!
//! One [`Repository`] per entity kind. Callers serialize read-modify-write
//! sequences per key with [`crate::locks::KeyedLocks`]; a repository only
//! guarantees that each `put` is applied whole or not at all.

pub mod dir;
pub mod file;
pub mod memory;

pub use dir::JsonDirRepository;
pub use file::JsonFileRepository;
pub use memory::MemoryRepository;

use crate::auction::{BidBook, Intent};
use crate::bond::PerformanceBond;
use crate::pricing::Experiment;
use crate::scheduler::ClearingJob;
use crate::sla::SlaContract;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A persistable entity
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Clone + Ord + Display + Send + Sync;

    /// Entity name used in errors and logs
    const KIND: &'static str;
    /// Collection name used for file naming
    const COLLECTION: &'static str;

    fn key(&self) -> &Self::Key;
}

pub trait Repository<T: Record>: Send + Sync {
    fn get(&self, key: &T::Key) -> Result<Option<T>, StoreError>;

    /// Insert or replace the record under its key
    fn put(&self, record: T) -> Result<(), StoreError>;

    /// Every record, ordered by key
    fn list(&self) -> Result<Vec<T>, StoreError>;
}

pub type Repo<T> = Arc<dyn Repository<T>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize {kind} records: {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} key {key:?} is not a plain file name")]
    InvalidKey { kind: &'static str, key: String },

    #[error("unsupported schema version {found} in {path:?}")]
    SchemaVersion { path: PathBuf, found: u32 },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Check if error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Read { .. } | Self::Write { .. } | Self::Unavailable(_)
        )
    }
}

/// The repositories the marketplace runs on
#[derive(Clone)]
pub struct Stores {
    pub intents: Repo<Intent>,
    pub bids: Repo<BidBook>,
    pub contracts: Repo<SlaContract>,
    pub bonds: Repo<PerformanceBond>,
    pub experiments: Repo<Experiment>,
    pub clearing_jobs: Repo<ClearingJob>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            intents: Arc::new(MemoryRepository::new()),
            bids: Arc::new(MemoryRepository::new()),
            contracts: Arc::new(MemoryRepository::new()),
            bonds: Arc::new(MemoryRepository::new()),
            experiments: Arc::new(MemoryRepository::new()),
            clearing_jobs: Arc::new(MemoryRepository::new()),
        }
    }

    /// Open (or create) the stores under `dir`: one JSON document per
    /// collection, except bids, which get one document per intent
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            intents: Arc::new(JsonFileRepository::open(dir)?),
            bids: Arc::new(JsonDirRepository::open(dir)?),
            contracts: Arc::new(JsonFileRepository::open(dir)?),
            bonds: Arc::new(JsonFileRepository::open(dir)?),
            experiments: Arc::new(JsonFileRepository::open(dir)?),
            clearing_jobs: Arc::new(JsonFileRepository::open(dir)?),
        })
    }
}
