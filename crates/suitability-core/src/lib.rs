//! Land suitability analysis core.
//!
//! Reduces an area of interest by administrative borders and protected
//! areas, classifies land cover, slope and HAND into Low/Medium/High bands,
//! and merges them into one suitability raster with a statistics report.
//! Data sources, coverage persistence and result sinks are traits so the
//! pipeline never depends on a file format or a network client.

pub mod acquire;
pub mod aggregate;
pub mod cache;
pub mod classify;
pub mod config;
pub mod crs;
pub mod error;
pub mod gate;
pub mod geometry;
pub mod pipeline;
pub mod raster;
pub mod sink;
pub mod stats;
pub mod terrain;

pub use acquire::{Acquired, AcquiredFrom, Acquirer, Dataset, DatasetFetcher, DatasetId};
pub use aggregate::{aggregate, aggregate_criteria, Rounding, RoundingStrategy};
pub use cache::{needs_fetch, CacheRecord, CoverageStore, MemoryCoverageStore};
pub use classify::{
    classify, CategoryTable, ClassifiedRaster, Criterion, IntervalThresholds, LandCoverClass,
    SuitabilityBand, SuitabilityRaster, Thresholds,
};
pub use config::{CriteriaSelection, PipelineConfig};
pub use crs::{area_hectares, Crs, Reprojector};
pub use error::{AlignmentError, FetchError, GeometryError, PipelineError, Result, StoreError};
pub use gate::{GateOutcome, GeometryGate, ReducedAoi, Shortfall, ShortfallStage};
pub use geometry::{AreaOfInterest, BBox, ReferenceLayer};
pub use pipeline::{Pipeline, ProjectRequest, RunOutcome, RunStatus};
pub use raster::{GeoTransform, Grid, RasterLayer, Resampling, NODATA};
pub use sink::{MemorySink, ResultSink};
pub use stats::{MetricValue, StatisticsCollector, StatisticsReport};
