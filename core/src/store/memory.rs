use super::{Record, Repository, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-process repository; contents are lost on restart
pub struct MemoryRepository<T: Record> {
    records: RwLock<BTreeMap<T::Key, T>>,
}

impl<T: Record> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: Record> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Repository<T> for MemoryRepository<T> {
    fn get(&self, key: &T::Key) -> Result<Option<T>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&self, record: T) -> Result<(), StoreError> {
        self.records.write().insert(record.key().clone(), record);
        Ok(())
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }
}
