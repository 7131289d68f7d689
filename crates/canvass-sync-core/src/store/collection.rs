use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{Record, StoreError};

/// Records keyed by primary key plus their secondary indexes.
#[derive(Debug, Clone)]
pub(crate) struct Collection<T> {
    records: BTreeMap<String, T>,
    // index name -> index value -> primary keys
    indexes: HashMap<&'static str, BTreeMap<String, BTreeSet<String>>>,
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn from_records(records: impl IntoIterator<Item = T>) -> Self {
        let mut collection = Self::new();
        for record in records {
            collection.insert(record);
        }
        collection
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.records.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn insert(&mut self, record: T) {
        let key = record.key();
        if let Some(old) = self.records.remove(&key) {
            self.unindex(&key, &old);
        }
        self.index(&key, &record);
        self.records.insert(key, record);
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let old = self.records.remove(key)?;
        self.unindex(key, &old);
        Some(old)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.indexes.clear();
    }

    pub fn find_by(&self, index: &str, value: &str) -> Result<Vec<T>, StoreError> {
        if !T::INDEXES.contains(&index) {
            return Err(StoreError::UnknownIndex {
                collection: T::COLLECTION,
                index: index.to_string(),
            });
        }
        let Some(keys) = self.indexes.get(index).and_then(|values| values.get(value)) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| self.records.get(key))
            .cloned()
            .collect())
    }

    fn index(&mut self, key: &str, record: &T) {
        for &name in T::INDEXES {
            if let Some(value) = record.index_value(name) {
                self.indexes
                    .entry(name)
                    .or_default()
                    .entry(value)
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    fn unindex(&mut self, key: &str, record: &T) {
        for &name in T::INDEXES {
            let Some(value) = record.index_value(name) else {
                continue;
            };
            if let Some(values) = self.indexes.get_mut(name) {
                if let Some(keys) = values.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        values.remove(&value);
                    }
                }
            }
        }
    }
}
