//! Dataset acquisition behind the cache gate.
//!
//! The fetch collaborator and the coverage store are traits; the core never
//! talks to a network or a filesystem itself. Every request is expressed in
//! WGS84 because that is what catalogue searches expect.

use std::fmt;
use std::str::FromStr;

use geo::{BooleanOps, MultiPolygon};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{needs_fetch, CacheRecord, CoverageStore};
use crate::crs::{Crs, Reprojector};
use crate::error::{FetchError, GeometryError, PipelineError};
use crate::geometry::{BBox, ReferenceLayer};
use crate::raster::RasterLayer;

// ── Dataset identity ──────────────────────────────────────────────────────────

/// Source datasets the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DatasetId {
    AdministrativeBorders,
    ProtectedAreas,
    Dem,
    Hand,
    LandCover { year: i32 },
}

impl DatasetId {
    /// Stable key used in file names and the coverage store.
    pub fn key(&self) -> String {
        match self {
            DatasetId::AdministrativeBorders => "admin_borders".to_string(),
            DatasetId::ProtectedAreas => "protected_areas".to_string(),
            DatasetId::Dem => "dem".to_string(),
            DatasetId::Hand => "hand".to_string(),
            DatasetId::LandCover { year } => format!("lc_{year}"),
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, DatasetId::AdministrativeBorders | DatasetId::ProtectedAreas)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for DatasetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin_borders" => Ok(DatasetId::AdministrativeBorders),
            "protected_areas" => Ok(DatasetId::ProtectedAreas),
            "dem" => Ok(DatasetId::Dem),
            "hand" => Ok(DatasetId::Hand),
            other => other
                .strip_prefix("lc_")
                .and_then(|year| year.parse().ok())
                .map(|year| DatasetId::LandCover { year })
                .ok_or_else(|| format!("unknown dataset key '{other}'")),
        }
    }
}

impl From<DatasetId> for String {
    fn from(id: DatasetId) -> Self {
        id.key()
    }
}

impl TryFrom<String> for DatasetId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ── Datasets ──────────────────────────────────────────────────────────────────

/// A fetched dataset: one raster band or a polygon collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    Raster(RasterLayer),
    Vector(ReferenceLayer),
}

impl Dataset {
    pub fn crs(&self) -> Crs {
        match self {
            Dataset::Raster(r) => r.crs,
            Dataset::Vector(v) => v.crs,
        }
    }

    /// Footprint of this dataset within a request, in WGS84.
    ///
    /// A raster covers only where it has cells. A vector fetch returns every
    /// feature touching the request, so it covers the whole request even when
    /// no feature reaches its edges.
    pub fn coverage_wgs84(&self, requested: &BBox) -> Result<MultiPolygon<f64>, GeometryError> {
        let request = MultiPolygon(vec![requested.to_polygon()]);
        match self {
            Dataset::Raster(r) => {
                let to_wgs84 = Reprojector::new(r.crs, Crs::WGS84)?;
                let footprint = MultiPolygon(vec![r.bbox().reprojected(&to_wgs84).to_polygon()]);
                Ok(footprint.intersection(&request))
            }
            Dataset::Vector(_) => Ok(request),
        }
    }

    pub fn into_raster(self, id: &DatasetId) -> Result<RasterLayer, FetchError> {
        match self {
            Dataset::Raster(r) => Ok(r),
            Dataset::Vector(_) => Err(FetchError::WrongKind { dataset: id.clone(), expected: "raster" }),
        }
    }

    pub fn into_vector(self, id: &DatasetId) -> Result<ReferenceLayer, FetchError> {
        match self {
            Dataset::Vector(v) => Ok(v),
            Dataset::Raster(_) => Err(FetchError::WrongKind { dataset: id.clone(), expected: "vector" }),
        }
    }
}

/// The upstream data source.
///
/// Retries and timeouts belong to implementations; a returned error is
/// terminal for the run.
pub trait DatasetFetcher {
    /// Fetch `dataset` over `bbox` (WGS84 degrees) and keep a local copy.
    fn fetch(&self, bbox: &BBox, dataset: &DatasetId) -> Result<Dataset, FetchError>;

    /// The local copy of a previous fetch, if one exists.
    fn load_cached(&self, dataset: &DatasetId) -> Result<Option<Dataset>, FetchError>;
}

impl<F: DatasetFetcher + ?Sized> DatasetFetcher for &F {
    fn fetch(&self, bbox: &BBox, dataset: &DatasetId) -> Result<Dataset, FetchError> {
        (**self).fetch(bbox, dataset)
    }

    fn load_cached(&self, dataset: &DatasetId) -> Result<Option<Dataset>, FetchError> {
        (**self).load_cached(dataset)
    }
}

// ── Acquirer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredFrom {
    Cache,
    Fetched,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Acquired {
    pub dataset: Dataset,
    pub source: AcquiredFrom,
}

/// Fetcher plus coverage store, with the cache check in between.
pub struct Acquirer<F, C> {
    fetcher: F,
    store: C,
}

impl<F: DatasetFetcher, C: CoverageStore> Acquirer<F, C> {
    pub fn new(fetcher: F, store: C) -> Self {
        Self { fetcher, store }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Get `dataset` covering `area` (in `crs`), fetching only on a miss.
    pub fn acquire(
        &mut self,
        dataset: &DatasetId,
        area: &MultiPolygon<f64>,
        crs: Crs,
    ) -> Result<Acquired, PipelineError> {
        let requested = Reprojector::new(crs, Crs::WGS84)?.convert_multipolygon(area);
        let record = self.store.load(dataset)?;

        if !needs_fetch(&requested, record.as_ref()) {
            if let Some(local) = self.fetcher.load_cached(dataset)? {
                info!(dataset = %dataset, "dataset already available; skipping download");
                return Ok(Acquired { dataset: local, source: AcquiredFrom::Cache });
            }
            debug!(dataset = %dataset, "coverage recorded but no local copy; fetching");
        }

        // Fetch the envelope of the request and everything already recorded,
        // so the refreshed local copy keeps covering earlier extents.
        let Some(mut bbox) = BBox::from_multipolygon(&requested) else {
            return Err(GeometryError::Empty(format!("request for {dataset}")).into());
        };
        if let Some(previous) = record.as_ref().and_then(CacheRecord::bbox) {
            bbox = bbox.union(&previous);
        }
        info!(dataset = %dataset, bbox = %bbox, "fetching dataset");
        let fetched = self.fetcher.fetch(&bbox, dataset)?;

        let coverage = fetched.coverage_wgs84(&bbox)?;
        let updated = match record {
            Some(previous) => previous.extended(&coverage),
            None => CacheRecord::new(dataset.clone(), coverage),
        };
        self.store.save(&updated)?;

        Ok(Acquired { dataset: fetched, source: AcquiredFrom::Fetched })
    }

    pub fn acquire_raster(
        &mut self,
        dataset: &DatasetId,
        area: &MultiPolygon<f64>,
        crs: Crs,
    ) -> Result<RasterLayer, PipelineError> {
        Ok(self.acquire(dataset, area, crs)?.dataset.into_raster(dataset)?)
    }

    pub fn acquire_vector(
        &mut self,
        dataset: &DatasetId,
        area: &MultiPolygon<f64>,
        crs: Crs,
    ) -> Result<ReferenceLayer, PipelineError> {
        Ok(self.acquire(dataset, area, crs)?.dataset.into_vector(dataset)?)
    }
}
