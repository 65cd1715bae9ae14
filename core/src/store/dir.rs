use super::file::{atomic_write, SCHEMA_VERSION};
use super::{Record, Repository, StoreError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFile<T> {
    pub schema_version: u32,
    pub record: T,
}

/// Write-through repository with one JSON document per record
///
/// Records live under `<root>/<collection>/<key>.json`, so a `put` rewrites
/// only the record it touches. Keys must be plain file names.
pub struct JsonDirRepository<T: Record> {
    dir: PathBuf,
    records: RwLock<BTreeMap<T::Key, T>>,
}

impl<T: Record> JsonDirRepository<T> {
    pub fn open(root_dir: &Path) -> Result<Self, StoreError> {
        let dir = root_dir.join(T::COLLECTION);
        let mut records = BTreeMap::new();

        if dir.exists() {
            let read_err = |source| StoreError::Read {
                path: dir.clone(),
                source,
            };
            for entry in fs::read_dir(&dir).map_err(read_err)? {
                let path = entry.map_err(read_err)?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                if let Some(record) = load_record::<T>(&path)? {
                    records.insert(record.key().clone(), record);
                }
            }
        }

        Ok(Self {
            dir,
            records: RwLock::new(records),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &T::Key) -> Result<PathBuf, StoreError> {
        let name = key.to_string();
        let plain = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !plain {
            return Err(StoreError::InvalidKey { kind: T::KIND, key: name });
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

impl<T: Record> Repository<T> for JsonDirRepository<T> {
    fn get(&self, key: &T::Key) -> Result<Option<T>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&self, record: T) -> Result<(), StoreError> {
        let path = self.record_path(record.key())?;
        let file = RecordFile {
            schema_version: SCHEMA_VERSION,
            record: &record,
        };
        let content = serde_json::to_string_pretty(&file).map_err(|source| StoreError::Serialize {
            kind: T::KIND,
            source,
        })?;

        let mut records = self.records.write();
        atomic_write(&path, content.as_bytes())?;
        records.insert(record.key().clone(), record);
        Ok(())
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }
}

fn load_record<T: Record>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(None);
    }

    let parsed: RecordFile<T> = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if parsed.schema_version != SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            path: path.to_path_buf(),
            found: parsed.schema_version,
        });
    }
    Ok(Some(parsed.record))
}
