use super::{Record, Repository, StoreError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsFile<T> {
    pub schema_version: u32,
    pub records: Vec<T>,
}

impl<T> Default for RecordsFile<T> {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            records: Vec::new(),
        }
    }
}

/// Write-through repository backed by one JSON document per collection
///
/// The whole collection is held in memory and rewritten atomically on every
/// `put`. A failed write leaves both the file and the cached view untouched.
pub struct JsonFileRepository<T: Record> {
    root_dir: PathBuf,
    path: PathBuf,
    records: RwLock<BTreeMap<T::Key, T>>,
}

impl<T: Record> JsonFileRepository<T> {
    pub fn open(root_dir: &Path) -> Result<Self, StoreError> {
        let path = root_dir.join(format!("{}.json", T::COLLECTION));
        let loaded = load_records::<T>(&path)?;
        let records = loaded
            .records
            .into_iter()
            .map(|record| (record.key().clone(), record))
            .collect();

        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            path,
            records: RwLock::new(records),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, records: &BTreeMap<T::Key, T>) -> Result<(), StoreError> {
        let file = RecordsFile {
            schema_version: SCHEMA_VERSION,
            records: records.values().collect::<Vec<_>>(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|source| StoreError::Serialize {
            kind: T::KIND,
            source,
        })?;
        atomic_write(&self.path, content.as_bytes())
    }
}

impl<T: Record> Repository<T> for JsonFileRepository<T> {
    fn get(&self, key: &T::Key) -> Result<Option<T>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&self, record: T) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let key = record.key().clone();
        let previous = records.insert(key.clone(), record);

        if let Err(err) = self.save(&records) {
            match previous {
                Some(previous) => records.insert(key, previous),
                None => records.remove(&key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }
}

fn load_records<T: Record>(path: &Path) -> Result<RecordsFile<T>, StoreError> {
    if !path.exists() {
        return Ok(RecordsFile::default());
    }

    let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if content.trim().is_empty() {
        return Ok(RecordsFile::default());
    }

    let parsed: RecordsFile<T> = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if parsed.schema_version != SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            path: path.to_path_buf(),
            found: parsed.schema_version,
        });
    }

    Ok(parsed)
}

pub(super) fn atomic_write(dest: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp = dest.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, bytes).map_err(write_err)?;

    // Best-effort cleanup on failure.
    if let Err(rename_err) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(rename_err));
    }

    Ok(())
}
