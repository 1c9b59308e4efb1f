//! Coverage store persisted as one JSON file per project.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use suitability_core::{CacheRecord, CoverageStore, DatasetId, StoreError};

pub struct JsonCoverageStore {
    path: PathBuf,
}

impl JsonCoverageStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_all(&self) -> Result<BTreeMap<DatasetId, CacheRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        let records: Vec<CacheRecord> = serde_json::from_str(&text)?;
        Ok(records.into_iter().map(|r| (r.dataset.clone(), r)).collect())
    }
}

impl CoverageStore for JsonCoverageStore {
    fn load(&self, dataset: &DatasetId) -> Result<Option<CacheRecord>, StoreError> {
        Ok(self.read_all()?.remove(dataset))
    }

    fn save(&mut self, record: &CacheRecord) -> Result<(), StoreError> {
        let mut all = self.read_all()?;
        all.insert(record.dataset.clone(), record.clone());
        let records: Vec<&CacheRecord> = all.values().collect();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&records)?)?;
        Ok(())
    }
}
