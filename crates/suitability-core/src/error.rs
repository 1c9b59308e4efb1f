//! Error types for the suitability pipeline.
//!
//! Insufficient remaining area is not an error; it ends a run as
//! `RunOutcome::InsufficientArea`.

use thiserror::Error;

use crate::acquire::DatasetId;
use crate::crs::Crs;
use crate::geometry::BBox;

/// Invalid or unusable input geometry.
#[derive(Error, Debug)]
pub enum GeometryError {
    /// Geometry has no polygons or zero area.
    #[error("empty geometry: {0}")]
    Empty(String),

    /// Self-intersecting, unclosed or non-finite polygon.
    #[error("invalid geometry ({context}): {reason}")]
    Invalid { context: String, reason: String },

    /// No conversion is implemented between the two CRSs.
    #[error("unsupported CRS conversion {from} -> {to}")]
    UnsupportedCrs { from: Crs, to: Crs },
}

/// Failure of the external fetch collaborator.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The source cannot supply data for the requested extent.
    #[error("data unavailable for {dataset} over {bbox}: {reason}")]
    DataUnavailable { dataset: DatasetId, bbox: BBox, reason: String },

    /// The dataset exists but is not of the kind the stage needs.
    #[error("dataset {dataset} is not a {expected} layer")]
    WrongKind { dataset: DatasetId, expected: &'static str },

    /// A local copy exists but could not be read.
    #[error("cached copy of {dataset} unreadable: {reason}")]
    CacheUnreadable { dataset: DatasetId, reason: String },
}

/// Criterion rasters do not share one grid at aggregation time.
///
/// This is a contract violation by the alignment step, not a recoverable
/// condition.
#[derive(Error, Debug)]
#[error("criterion rasters are not aligned: {expected} vs {found}")]
pub struct AlignmentError {
    pub expected: String,
    pub found: String,
}

/// Coverage store or result sink backend failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Top-level pipeline error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no criteria selected for analysis")]
    NoCriteria,

    /// The reference grid over the reduced AOI has no cells.
    #[error("empty analysis grid over {0}")]
    EmptyGrid(BBox),
}

impl PipelineError {
    /// True for upstream fetch failures, which callers report distinctly.
    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, PipelineError::Fetch(FetchError::DataUnavailable { .. }))
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
