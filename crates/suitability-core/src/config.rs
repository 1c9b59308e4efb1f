//! Run configuration consumed by the pipeline.

use serde::{Deserialize, Serialize};

use crate::aggregate::Rounding;
use crate::classify::{CategoryTable, Criterion, IntervalThresholds, Thresholds};
use crate::crs::Crs;
use crate::error::PipelineError;
use crate::gate::DEFAULT_MIN_VIABLE_AREA_HA;

/// Default output CRS: WGS 84 / UTM zone 21S.
pub const DEFAULT_OUTPUT_EPSG: u32 = 32721;

/// Which criteria to evaluate. Serializes as `"all"` or a list of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CriteriaRepr", into = "CriteriaRepr")]
pub struct CriteriaSelection(Vec<Criterion>);

/// Serialized form of [`CriteriaSelection`].
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriteriaRepr {
    Keyword(String),
    List(Vec<Criterion>),
}

impl CriteriaSelection {
    pub fn all() -> Self {
        Self(Criterion::ALL.to_vec())
    }

    /// Selection in the fixed merge order, without duplicates.
    pub fn only(criteria: impl IntoIterator<Item = Criterion>) -> Self {
        let mut list: Vec<Criterion> = criteria.into_iter().collect();
        list.sort();
        list.dedup();
        Self(list)
    }

    pub fn is_all(&self) -> bool {
        Criterion::ALL.iter().all(|c| self.0.contains(c))
    }

    pub fn contains(&self, criterion: Criterion) -> bool {
        self.0.contains(&criterion)
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CriteriaSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl TryFrom<CriteriaRepr> for CriteriaSelection {
    type Error = String;

    fn try_from(repr: CriteriaRepr) -> Result<Self, Self::Error> {
        match repr {
            CriteriaRepr::Keyword(k) if k == "all" => Ok(Self::all()),
            CriteriaRepr::Keyword(k) => Err(format!("expected \"all\" or a list of criteria, got \"{k}\"")),
            CriteriaRepr::List(list) => Ok(Self::only(list)),
        }
    }
}

impl From<CriteriaSelection> for CriteriaRepr {
    fn from(sel: CriteriaSelection) -> Self {
        if sel.is_all() {
            CriteriaRepr::Keyword("all".to_string())
        } else {
            CriteriaRepr::List(sel.0)
        }
    }
}

/// Everything a run can be tuned with. Missing JSON fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Hectares of land that must remain after the gate. Default 100.
    pub min_viable_area_ha: f64,
    /// CRS of every output raster and of the reduced AOI.
    pub output_crs: Crs,
    pub rounding: Rounding,
    pub criteria: CriteriaSelection,
    /// When false, borders and protected areas are ignored and the whole
    /// AOI is analysed.
    pub land_checks: bool,
    /// Slope percent bands.
    pub slope: IntervalThresholds,
    /// HAND metre bands.
    pub hand: IntervalThresholds,
    pub land_cover: CategoryTable,
    /// Output cell size in output CRS units. None: taken from the reference raster.
    pub resolution: Option<f64>,
    /// Hand per-criterion rasters to the sink.
    pub keep_intermediate: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_viable_area_ha: DEFAULT_MIN_VIABLE_AREA_HA,
            output_crs: Crs::from_epsg(DEFAULT_OUTPUT_EPSG),
            rounding: Rounding::default(),
            criteria: CriteriaSelection::all(),
            land_checks: true,
            slope: IntervalThresholds::SLOPE_PERCENT,
            hand: IntervalThresholds::HAND_METRES,
            land_cover: CategoryTable::land_cover(),
            resolution: None,
            keep_intermediate: true,
        }
    }
}

impl PipelineConfig {
    pub fn thresholds(&self, criterion: Criterion) -> Thresholds {
        match criterion {
            Criterion::LandCover => Thresholds::Categories(self.land_cover.clone()),
            Criterion::Slope => Thresholds::Interval(self.slope),
            Criterion::Hand => Thresholds::Interval(self.hand),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let config = |msg: String| PipelineError::Config(msg);
        if !self.min_viable_area_ha.is_finite() || self.min_viable_area_ha < 0.0 {
            return Err(config(format!(
                "min_viable_area_ha must be a non-negative number, got {}",
                self.min_viable_area_ha
            )));
        }
        if self.output_crs.is_geographic() {
            return Err(config(format!(
                "output CRS {} is geographic; a projected (metric) CRS is required",
                self.output_crs
            )));
        }
        if let Some(res) = self.resolution {
            if !res.is_finite() || res <= 0.0 {
                return Err(config(format!("resolution must be positive, got {res}")));
            }
        }
        if self.criteria.is_empty() {
            return Err(PipelineError::NoCriteria);
        }
        self.slope.validate().map_err(|e| config(format!("slope: {e}")))?;
        self.hand.validate().map_err(|e| config(format!("hand: {e}")))?;
        self.land_cover.validate().map_err(|e| config(format!("land_cover: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.min_viable_area_ha, 100.0);
        assert_eq!(c.output_crs.epsg(), 32721);
        assert_eq!(c.rounding, Rounding::Floor);
        assert!(c.criteria.is_all());
        assert_eq!(c.slope.medium_threshold, 5.0);
        assert_eq!(c.hand.high_threshold, 30.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: PipelineConfig = serde_json::from_str(
            r#"{ "min_viable_area_ha": 25, "rounding": "half-up", "criteria": ["hand", "slope"] }"#,
        )
        .unwrap();
        assert_eq!(c.min_viable_area_ha, 25.0);
        assert_eq!(c.rounding, Rounding::HalfUp);
        assert_eq!(c.criteria.criteria(), &[Criterion::Slope, Criterion::Hand]);
        assert!(c.land_checks);
    }

    #[test]
    fn criteria_all_keyword_round_trips() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert_eq!(json["criteria"], "all");
        let back: PipelineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, PipelineConfig::default());
        assert!(serde_json::from_str::<PipelineConfig>(r#"{ "criteria": "some" }"#).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut c = PipelineConfig::default();
        c.output_crs = Crs::WGS84;
        assert!(matches!(c.validate(), Err(PipelineError::Config(_))));

        let mut c = PipelineConfig::default();
        c.criteria = CriteriaSelection::only([]);
        assert!(matches!(c.validate(), Err(PipelineError::NoCriteria)));

        let mut c = PipelineConfig::default();
        c.min_viable_area_ha = -1.0;
        assert!(c.validate().is_err());
    }
}
