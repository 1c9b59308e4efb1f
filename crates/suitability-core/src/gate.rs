//! AOI refinement: clip to administrative borders, subtract protected areas,
//! enforce the minimum viable area.
//!
//! All set algebra happens in the AOI's own CRS; reference layers are
//! reprojected into it first. Areas are measured with `crs::area_hectares`,
//! which never measures in degrees.

use std::fmt;

use geo::{BooleanOps, MultiPolygon};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crs::{area_hectares, Crs};
use crate::error::GeometryError;
use crate::geometry::{AreaOfInterest, BBox, ReferenceLayer};
use crate::stats::StatisticsCollector;

/// Default minimum remaining area, in hectares.
pub const DEFAULT_MIN_VIABLE_AREA_HA: f64 = 100.0;

/// Where the AOI ran out of usable land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallStage {
    /// No part of the AOI lies inside the administrative borders.
    OutsideBorders,
    /// Every part inside the borders is protected.
    FullyProtected,
    /// Some land remains but less than the viable minimum.
    BelowThreshold,
}

impl ShortfallStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::OutsideBorders => "outside_borders",
            Self::FullyProtected => "fully_protected",
            Self::BelowThreshold => "below_threshold",
        }
    }
}

/// Why the gate stopped the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shortfall {
    pub remaining_ha: f64,
    pub required_ha: f64,
    pub stage: ShortfallStage,
}

impl Shortfall {
    pub fn shortfall_ha(&self) -> f64 {
        (self.required_ha - self.remaining_ha).max(0.0)
    }
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "remaining area {:.2} Ha is below the viable minimum of {:.2} Ha ({:.2} Ha short, {})",
            self.remaining_ha,
            self.required_ha,
            self.shortfall_ha(),
            self.stage.name()
        )
    }
}

/// The AOI after clipping and subtraction, with its measured area.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedAoi {
    pub area: AreaOfInterest,
    pub area_ha: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Reduced(ReducedAoi),
    Insufficient(Shortfall),
}

/// Spatial-set gate in front of every raster stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryGate {
    pub min_viable_area_ha: f64,
}

impl Default for GeometryGate {
    fn default() -> Self {
        Self { min_viable_area_ha: DEFAULT_MIN_VIABLE_AREA_HA }
    }
}

impl GeometryGate {
    pub fn new(min_viable_area_ha: f64) -> Self {
        Self { min_viable_area_ha }
    }

    /// Run the three reduction steps and the area check.
    ///
    /// Areas before and after each step go into `stats`. An AOI with no land
    /// left after any step is insufficient regardless of the threshold.
    pub fn reduce(
        &self,
        aoi: &AreaOfInterest,
        borders: &ReferenceLayer,
        protected: &ReferenceLayer,
        stats: &StatisticsCollector,
    ) -> Result<GateOutcome, GeometryError> {
        let crs = aoi.crs;
        let aoi_ha = aoi.area_ha();
        stats.record("min_viable_area_ha", self.min_viable_area_ha);
        stats.record("aoi_area_ha", aoi_ha);
        debug!(aoi = %aoi.describe(), area_ha = aoi_ha, "reducing area of interest");

        // 1. Clip to the union of the administrative borders.
        let border_union = borders.dissolved_in(crs)?;
        let within = clip(&aoi.geometry, &border_union);
        let within_ha = area_hectares(&within, crs);
        let outside_ha = (aoi_ha - within_ha).max(0.0);
        stats.record("aoi_within_admin_border_area_ha", within_ha);
        stats.record("aoi_outside_admin_border_area_ha", outside_ha);

        if is_empty(&within, within_ha) {
            warn!("area of interest lies entirely outside the administrative borders");
            stats.record("intersect_with_protected_area_ha", 0.0);
            return Ok(self.insufficient(0.0, ShortfallStage::OutsideBorders, stats));
        }
        if outside_ha > 0.0 {
            warn!(
                outside_ha,
                within_ha, "area of interest is partially outside the region; clipping to the borders"
            );
        }

        // 2. Subtract protected areas.
        let protected_union = protected.dissolved_in(crs)?;
        let (remaining, protected_ha) = subtract(&within, &protected_union, crs);
        stats.record("intersect_with_protected_area_ha", protected_ha);
        if protected_ha > 0.0 {
            warn!(protected_ha, "area of interest is partly protected; removing protected land");
        } else {
            info!("no intersection with protected areas");
        }

        // 3. Measure what is left.
        let remaining_ha = area_hectares(&remaining, crs).min(within_ha);
        stats.record("remaining_area_ha", remaining_ha);

        // 4. Enforce the minimum.
        if is_empty(&remaining, remaining_ha) {
            warn!("area of interest is entirely protected");
            return Ok(self.insufficient(0.0, ShortfallStage::FullyProtected, stats));
        }
        if remaining_ha < self.min_viable_area_ha {
            warn!(
                remaining_ha,
                required_ha = self.min_viable_area_ha,
                "area below viable threshold; stopping analysis"
            );
            return Ok(self.insufficient(remaining_ha, ShortfallStage::BelowThreshold, stats));
        }

        info!(remaining_ha, "remaining land area is viable");
        Ok(GateOutcome::Reduced(ReducedAoi {
            area: AreaOfInterest::derived(remaining, crs),
            area_ha: remaining_ha,
        }))
    }

    /// Skip the land checks and hand the whole AOI through.
    pub fn pass_through(&self, aoi: &AreaOfInterest, stats: &StatisticsCollector) -> ReducedAoi {
        let area_ha = aoi.area_ha();
        stats.record("aoi_area_ha", area_ha);
        stats.record("remaining_area_ha", area_ha);
        info!(area_ha, "land checks disabled; using the full area of interest");
        ReducedAoi { area: aoi.clone(), area_ha }
    }

    fn insufficient(
        &self,
        remaining_ha: f64,
        stage: ShortfallStage,
        stats: &StatisticsCollector,
    ) -> GateOutcome {
        let shortfall = Shortfall { remaining_ha, required_ha: self.min_viable_area_ha, stage };
        stats.record("remaining_area_ha", remaining_ha);
        stats.record("shortfall_ha", shortfall.shortfall_ha());
        stats.record("shortfall_stage", stage.name());
        GateOutcome::Insufficient(shortfall)
    }
}

fn is_empty(mp: &MultiPolygon<f64>, area_ha: f64) -> bool {
    mp.0.is_empty() || area_ha <= 0.0
}

fn clip(aoi: &MultiPolygon<f64>, borders: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    match (BBox::from_multipolygon(aoi), BBox::from_multipolygon(borders)) {
        (Some(a), Some(b)) if a.intersects(&b) => aoi.intersection(borders),
        _ => MultiPolygon(Vec::new()),
    }
}

/// `within` minus `protected`, and the protected overlap in hectares.
fn subtract(
    within: &MultiPolygon<f64>,
    protected: &MultiPolygon<f64>,
    crs: Crs,
) -> (MultiPolygon<f64>, f64) {
    let overlapping = match (BBox::from_multipolygon(within), BBox::from_multipolygon(protected)) {
        (Some(a), Some(b)) => a.intersects(&b),
        _ => false,
    };
    if !overlapping {
        return (within.clone(), 0.0);
    }
    let overlap = within.intersection(protected);
    let overlap_ha = area_hectares(&overlap, crs);
    if overlap_ha <= 0.0 {
        return (within.clone(), 0.0);
    }
    (within.difference(protected), overlap_ha)
}
