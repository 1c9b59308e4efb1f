//! Pipeline orchestrator: runs every stage in order for one project.

use tracing::{debug, info, warn};

use crate::acquire::{Acquirer, DatasetFetcher, DatasetId};
use crate::aggregate::aggregate;
use crate::cache::CoverageStore;
use crate::classify::{classify, ClassifiedRaster, Criterion, SuitabilityBand, SuitabilityRaster};
use crate::config::PipelineConfig;
use crate::crs::{Crs, Reprojector};
use crate::error::{PipelineError, Result};
use crate::gate::{GateOutcome, GeometryGate, ReducedAoi, Shortfall};
use crate::geometry::{AreaOfInterest, BBox};
use crate::raster::{Grid, RasterLayer};
use crate::sink::ResultSink;
use crate::stats::{StatisticsCollector, StatisticsReport};
use crate::terrain::slope_percent;

#[cfg(feature = "threading")]
use rayon::prelude::*;

// ── Public structs ────────────────────────────────────────────────────────────

/// One analysis request.
#[derive(Debug, Clone)]
pub struct ProjectRequest {
    pub project_name: String,
    /// Year of the land-cover layer to use.
    pub project_year: i32,
    pub aoi: AreaOfInterest,
}

/// Terminal outcome of a run that did not fail.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed { raster: SuitabilityRaster, report: StatisticsReport },
    /// The gate stopped the run; no raster was produced.
    InsufficientArea { shortfall: Shortfall, report: StatisticsReport },
}

impl RunOutcome {
    pub fn report(&self) -> &StatisticsReport {
        match self {
            RunOutcome::Completed { report, .. } | RunOutcome::InsufficientArea { report, .. } => report,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Completed { .. } => RunStatus::Success,
            RunOutcome::InsufficientArea { .. } => RunStatus::InsufficientArea,
        }
    }
}

/// Caller-visible status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    InsufficientArea,
    Failure,
}

impl RunStatus {
    pub fn of(result: &Result<RunOutcome>) -> RunStatus {
        match result {
            Ok(outcome) => outcome.status(),
            Err(_) => RunStatus::Failure,
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failure => 1,
            RunStatus::InsufficientArea => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::InsufficientArea => "insufficient_area",
            RunStatus::Failure => "failure",
        }
    }
}

/// Output of one criterion stage.
#[derive(Debug, Clone)]
pub struct CriterionOutput {
    pub criterion: Criterion,
    /// Aligned, masked measurement (category code, slope % or HAND m).
    pub measurement: RasterLayer,
    pub classified: ClassifiedRaster,
}

// ── Stages ────────────────────────────────────────────────────────────────────

/// Grid in `crs` covering `area` at `cell_size`.
pub fn reference_grid(area: &AreaOfInterest, cell_size: f64) -> Result<Grid> {
    let Some(bbox) = area.bbox() else {
        return Err(PipelineError::EmptyGrid(BBox::new(0.0, 0.0, 0.0, 0.0)));
    };
    let grid = Grid::covering(&bbox, cell_size, area.crs);
    if grid.is_empty() {
        return Err(PipelineError::EmptyGrid(bbox));
    }
    Ok(grid)
}

/// Native cell size of `raster` expressed in `crs` units.
pub fn native_cell_size(raster: &RasterLayer, crs: Crs) -> Result<f64> {
    let bbox = raster.bbox().reprojected(&Reprojector::new(raster.crs, crs)?);
    let size = (bbox.width() / raster.width.max(1) as f64).min(bbox.height() / raster.height.max(1) as f64);
    if size.is_finite() && size > 0.0 {
        Ok(size)
    } else {
        Err(PipelineError::Config(format!("cannot derive a cell size from a {}x{} raster", raster.width, raster.height)))
    }
}

/// Align one criterion's raw raster to `grid`, derive its measurement,
/// restrict it to `mask` and classify it.
///
/// Slope is derived on the full aligned DEM before masking so cells on the
/// AOI edge still see their outside neighbours.
pub fn run_criterion(
    criterion: Criterion,
    source: &RasterLayer,
    grid: &Grid,
    mask: &[bool],
    config: &PipelineConfig,
    stats: &StatisticsCollector,
) -> Result<CriterionOutput> {
    let aligned = source.resample_to(grid, criterion.resampling())?;
    let measurement = match criterion {
        Criterion::Slope => slope_percent(&aligned),
        Criterion::LandCover | Criterion::Hand => aligned,
    }
    .masked(mask);

    if let Some(summary) = measurement.summary() {
        match criterion {
            Criterion::Slope => {
                stats.record("slope_min_pct", summary.min);
                stats.record("slope_max_pct", summary.max);
                stats.record("slope_mean_pct", summary.mean);
            }
            Criterion::Hand => {
                stats.record("hand_min_m", summary.min);
                stats.record("hand_max_m", summary.max);
                stats.record("hand_mean_m", summary.mean);
            }
            Criterion::LandCover => {}
        }
    } else {
        warn!(criterion = %criterion, "no valid cells inside the remaining land");
    }

    let classified = classify(&measurement, &config.thresholds(criterion));
    if criterion == Criterion::LandCover {
        let adequate = classified.cells.iter().filter(|c| c.is_some()).count();
        stats.record("adequate_land_cover_area_ha", cells_to_ha(adequate, grid));
    }
    record_band_counts(criterion.name(), &classified, stats);
    debug!(criterion = %criterion, grid = %grid, "criterion classified");

    Ok(CriterionOutput { criterion, measurement, classified })
}

fn record_band_counts(name: &str, raster: &ClassifiedRaster, stats: &StatisticsCollector) {
    let counts = raster.band_counts();
    for band in SuitabilityBand::ALL {
        stats.record(format!("{name}_{}_pixels", band.name()), counts.get(band));
    }
    stats.record(format!("{name}_nodata_pixels"), counts.nodata);
}

fn cells_to_ha(count: usize, grid: &Grid) -> f64 {
    count as f64 * grid.transform.cell_area() / 10_000.0
}

#[cfg(feature = "threading")]
fn run_stages(
    inputs: &[(Criterion, RasterLayer)],
    grid: &Grid,
    mask: &[bool],
    config: &PipelineConfig,
    stats: &StatisticsCollector,
) -> Vec<Result<CriterionOutput>> {
    inputs
        .par_iter()
        .map(|(criterion, raw)| run_criterion(*criterion, raw, grid, mask, config, stats))
        .collect()
}

#[cfg(not(feature = "threading"))]
fn run_stages(
    inputs: &[(Criterion, RasterLayer)],
    grid: &Grid,
    mask: &[bool],
    config: &PipelineConfig,
    stats: &StatisticsCollector,
) -> Vec<Result<CriterionOutput>> {
    inputs
        .iter()
        .map(|(criterion, raw)| run_criterion(*criterion, raw, grid, mask, config, stats))
        .collect()
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// Composes the stages with a data source, a coverage store and a sink.
pub struct Pipeline<F, C, S> {
    config: PipelineConfig,
    acquirer: Acquirer<F, C>,
    sink: S,
}

impl<F, C, S> Pipeline<F, C, S>
where
    F: DatasetFetcher,
    C: CoverageStore,
    S: ResultSink,
{
    pub fn new(config: PipelineConfig, fetcher: F, store: C, sink: S) -> Self {
        Self { config, acquirer: Acquirer::new(fetcher, store), sink }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn acquirer(&self) -> &Acquirer<F, C> {
        &self.acquirer
    }

    /// Run the full pipeline for `request`.
    ///
    /// Order:
    ///   1. Reference layers (cache-gated) and AOI reduction
    ///   2. Criterion rasters (cache-gated)
    ///   3. Alignment onto one grid, per-criterion classification
    ///   4. Aggregation
    ///   5. Statistics and persistence
    pub fn run(&mut self, request: &ProjectRequest) -> Result<RunOutcome> {
        self.config.validate()?;
        let stats = StatisticsCollector::new();
        let crs = self.config.output_crs;
        stats.record("project_name", request.project_name.as_str());
        stats.record("project_year", request.project_year);
        stats.record("project_crs", crs.to_string());

        let aoi = request.aoi.to_crs(crs)?;
        if let Some(b) = aoi.bbox() {
            stats.record("project_bbox_min_x", b.min_x);
            stats.record("project_bbox_min_y", b.min_y);
            stats.record("project_bbox_max_x", b.max_x);
            stats.record("project_bbox_max_y", b.max_y);
        }
        info!(project = %request.project_name, year = request.project_year, crs = %crs, "starting analysis");

        // ── 1. Geometry gate ────────────────────────────────────────────────
        let reduced = match self.reduce_aoi(&aoi, &stats)? {
            GateOutcome::Reduced(r) => r,
            GateOutcome::Insufficient(shortfall) => {
                stats.record("status", RunStatus::InsufficientArea.name());
                let report = stats.finalize();
                self.sink.persist_report(&report)?;
                warn!(%shortfall, "analysis stopped");
                return Ok(RunOutcome::InsufficientArea { shortfall, report });
            }
        };
        self.sink.persist_remaining_land(&reduced.area.geometry, crs)?;

        // ── 2. Criterion rasters ────────────────────────────────────────────
        let mut inputs = Vec::new();
        for &criterion in self.config.criteria.criteria() {
            let id = criterion.dataset(request.project_year);
            let raw = self.acquirer.acquire_raster(&id, &reduced.area.geometry, crs)?;
            inputs.push((criterion, raw));
        }

        // ── 3. Align + classify ─────────────────────────────────────────────
        let cell_size = match self.config.resolution {
            Some(res) => res,
            None => {
                let reference = inputs
                    .iter()
                    .find(|(c, _)| *c == Criterion::Slope)
                    .or(inputs.first())
                    .map(|(_, r)| r)
                    .ok_or(PipelineError::NoCriteria)?;
                native_cell_size(reference, crs)?
            }
        };
        let grid = reference_grid(&reduced.area, cell_size)?;
        let mask = grid.inside_mask(&reduced.area.geometry);
        debug!(grid = %grid, "reference grid built");

        let mut outputs = Vec::with_capacity(inputs.len());
        for output in run_stages(&inputs, &grid, &mask, &self.config, &stats) {
            outputs.push(output?);
        }
        drop(inputs);

        if self.config.keep_intermediate {
            for out in &outputs {
                let name = out.criterion.name();
                self.sink.persist_intermediate(name, &out.measurement)?;
                self.sink.persist_intermediate(&format!("{name}_reclassified"), &out.classified.to_raster())?;
            }
        }

        // ── 4. Aggregate ────────────────────────────────────────────────────
        let classified: Vec<&ClassifiedRaster> = outputs.iter().map(|o| &o.classified).collect();
        let raster = aggregate(&classified, &self.config.rounding)?.masked(&mask);

        // ── 5. Statistics + persist ─────────────────────────────────────────
        record_band_counts("suitability", &raster, &stats);
        let counts = raster.band_counts();
        for band in SuitabilityBand::ALL {
            stats.record(format!("area_{}_suitability_ha", band.name()), cells_to_ha(counts.get(band), &grid));
        }
        stats.record("status", RunStatus::Success.name());
        let report = stats.finalize();
        self.sink.persist(&raster, &report)?;
        info!(
            high = counts.high,
            medium = counts.medium,
            low = counts.low,
            "analysis complete"
        );

        Ok(RunOutcome::Completed { raster, report })
    }

    /// Acquire the reference layers and run the gate, or pass the AOI
    /// through when land checks are off.
    pub fn reduce_aoi(&mut self, aoi: &AreaOfInterest, stats: &StatisticsCollector) -> Result<GateOutcome> {
        let gate = GeometryGate::new(self.config.min_viable_area_ha);
        if !self.config.land_checks {
            return Ok(GateOutcome::Reduced(gate.pass_through(aoi, stats)));
        }
        let borders = self.acquirer.acquire_vector(&DatasetId::AdministrativeBorders, &aoi.geometry, aoi.crs)?;
        let protected = self.acquirer.acquire_vector(&DatasetId::ProtectedAreas, &aoi.geometry, aoi.crs)?;
        Ok(gate.reduce(aoi, &borders, &protected, stats)?)
    }

    /// Acquire and classify a single criterion over an already reduced AOI.
    pub fn classify_criterion(
        &mut self,
        criterion: Criterion,
        year: i32,
        reduced: &ReducedAoi,
        stats: &StatisticsCollector,
    ) -> Result<CriterionOutput> {
        let crs = reduced.area.crs;
        let raw = self.acquirer.acquire_raster(&criterion.dataset(year), &reduced.area.geometry, crs)?;
        let cell_size = match self.config.resolution {
            Some(res) => res,
            None => native_cell_size(&raw, crs)?,
        };
        let grid = reference_grid(&reduced.area, cell_size)?;
        let mask = grid.inside_mask(&reduced.area.geometry);
        run_criterion(criterion, &raw, &grid, &mask, &self.config, stats)
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
