//! Decides whether previously fetched data already cover a requested AOI.
//!
//! Coverage is a geometric test on the stored extent, not a bounding-box
//! overlap: a record covers a request only when the request minus the extent
//! leaves (numerically) nothing behind. Partial coverage is a miss for the
//! whole request.

use std::collections::HashMap;

use geo::{Area, BooleanOps, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::acquire::DatasetId;
use crate::error::StoreError;
use crate::geometry::{union_all, BBox};

/// Uncovered area tolerated as floating-point noise, relative to the request.
const COVERAGE_TOLERANCE: f64 = 1e-9;

/// Last-fetched extent of one dataset, in WGS84 degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub dataset: DatasetId,
    pub extent: MultiPolygon<f64>,
}

impl CacheRecord {
    pub fn new(dataset: DatasetId, extent: MultiPolygon<f64>) -> Self {
        Self { dataset, extent }
    }

    /// True when `requested` lies entirely inside the recorded extent.
    pub fn covers(&self, requested: &MultiPolygon<f64>) -> bool {
        let (Some(req_bbox), Some(ext_bbox)) =
            (BBox::from_multipolygon(requested), BBox::from_multipolygon(&self.extent))
        else {
            return false;
        };
        if !ext_bbox.contains_bbox(&req_bbox) {
            return false;
        }
        let requested_area = requested.unsigned_area();
        let uncovered = requested.difference(&self.extent).unsigned_area();
        uncovered <= COVERAGE_TOLERANCE * requested_area.max(f64::MIN_POSITIVE)
    }

    /// Record grown by `fetched`. Coverage never shrinks.
    pub fn extended(&self, fetched: &MultiPolygon<f64>) -> CacheRecord {
        let mut all = self.extent.clone();
        all.0.extend(fetched.0.iter().cloned());
        CacheRecord { dataset: self.dataset.clone(), extent: union_all(&all) }
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_multipolygon(&self.extent)
    }
}

/// False only when a record exists and fully covers `requested`.
pub fn needs_fetch(requested: &MultiPolygon<f64>, record: Option<&CacheRecord>) -> bool {
    match record {
        Some(record) => !record.covers(requested),
        None => true,
    }
}

/// Persisted mapping from dataset to its last-fetched extent.
pub trait CoverageStore {
    fn load(&self, dataset: &DatasetId) -> Result<Option<CacheRecord>, StoreError>;

    fn save(&mut self, record: &CacheRecord) -> Result<(), StoreError>;
}

/// In-process coverage store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoverageStore {
    records: HashMap<DatasetId, CacheRecord>,
}

impl MemoryCoverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CoverageStore for MemoryCoverageStore {
    fn load(&self, dataset: &DatasetId) -> Result<Option<CacheRecord>, StoreError> {
        Ok(self.records.get(dataset).cloned())
    }

    fn save(&mut self, record: &CacheRecord) -> Result<(), StoreError> {
        self.records.insert(record.dataset.clone(), record.clone());
        Ok(())
    }
}

impl<S: CoverageStore + ?Sized> CoverageStore for &mut S {
    fn load(&self, dataset: &DatasetId) -> Result<Option<CacheRecord>, StoreError> {
        (**self).load(dataset)
    }

    fn save(&mut self, record: &CacheRecord) -> Result<(), StoreError> {
        (**self).save(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::rect;

    fn record(extent: MultiPolygon<f64>) -> CacheRecord {
        CacheRecord::new(DatasetId::Dem, extent)
    }

    #[test]
    fn missing_record_needs_fetch() {
        assert!(needs_fetch(&rect(0.0, 0.0, 1.0, 1.0), None));
    }

    #[test]
    fn strict_sub_region_is_covered() {
        let cached = record(rect(-58.0, -28.0, -56.0, -26.0));
        assert!(!needs_fetch(&rect(-57.5, -27.5, -56.5, -26.5), Some(&cached)));
    }

    #[test]
    fn identical_extent_is_covered() {
        let cached = record(rect(-58.0, -28.0, -56.0, -26.0));
        assert!(!needs_fetch(&rect(-58.0, -28.0, -56.0, -26.0), Some(&cached)));
    }

    #[test]
    fn partial_extension_needs_fetch() {
        let cached = record(rect(-58.0, -28.0, -56.0, -26.0));
        assert!(needs_fetch(&rect(-56.5, -27.0, -55.9, -26.5), Some(&cached)));
    }

    #[test]
    fn bbox_containment_alone_is_not_coverage() {
        // L-shaped extent: its bbox contains the request, the extent does not.
        let mut l_shape = rect(0.0, 0.0, 2.0, 1.0);
        l_shape.0.extend(rect(0.0, 1.0, 1.0, 2.0).0);
        let cached = record(union_all(&l_shape));
        assert!(needs_fetch(&rect(1.2, 1.2, 1.8, 1.8), Some(&cached)));
        assert!(!needs_fetch(&rect(0.2, 1.2, 0.8, 1.8), Some(&cached)));
    }

    #[test]
    fn extension_is_monotonic() {
        let cached = record(rect(0.0, 0.0, 1.0, 1.0));
        let grown = cached.extended(&rect(1.0, 0.0, 2.0, 1.0));
        assert!(grown.covers(&rect(0.0, 0.0, 1.0, 1.0)));
        assert!(grown.covers(&rect(0.5, 0.2, 1.5, 0.8)));
        assert!((grown.extent.unsigned_area() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryCoverageStore::new();
        assert!(store.load(&DatasetId::Hand).unwrap().is_none());
        store.save(&CacheRecord::new(DatasetId::Hand, rect(0.0, 0.0, 1.0, 1.0))).unwrap();
        assert!(store.load(&DatasetId::Hand).unwrap().is_some());
        assert!(store.load(&DatasetId::Dem).unwrap().is_none());
    }
}
