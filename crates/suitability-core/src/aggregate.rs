//! Pixel-wise merge of per-criterion bands into one suitability raster.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassifiedRaster, SuitabilityBand, SuitabilityRaster};
use crate::error::{AlignmentError, PipelineError};

// ── Rounding ──────────────────────────────────────────────────────────────────

/// Maps the mean of the criterion bands to a band value.
///
/// The result is clamped to 1..=3 by the aggregator, so implementations
/// only decide how ties and fractions resolve.
pub trait RoundingStrategy: Send + Sync {
    fn round(&self, mean: f64) -> f64;
}

impl<F> RoundingStrategy for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn round(&self, mean: f64) -> f64 {
        self(mean)
    }
}

/// Built-in rounding rules, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rounding {
    /// Conservative: fractions fall to the lower band.
    #[default]
    Floor,
    Ceiling,
    /// Nearest, ties to even (2.5 → 2, 1.5 → 2).
    Round,
    /// Nearest, ties away from the lower band (2.5 → 3).
    HalfUp,
}

impl Rounding {
    pub const ALL: [Rounding; 4] = [Self::Floor, Self::Ceiling, Self::Round, Self::HalfUp];

    pub fn name(self) -> &'static str {
        match self {
            Self::Floor => "floor",
            Self::Ceiling => "ceiling",
            Self::Round => "round",
            Self::HalfUp => "half-up",
        }
    }
}

impl RoundingStrategy for Rounding {
    fn round(&self, mean: f64) -> f64 {
        match self {
            Self::Floor => mean.floor(),
            Self::Ceiling => mean.ceil(),
            Self::Round => mean.round_ties_even(),
            Self::HalfUp => (mean + 0.5).floor(),
        }
    }
}

impl fmt::Display for Rounding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Rounding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "floor" => Ok(Self::Floor),
            "ceiling" | "ceil" => Ok(Self::Ceiling),
            "round" | "nearest" => Ok(Self::Round),
            "half-up" | "half_up" => Ok(Self::HalfUp),
            other => Err(format!(
                "unknown rounding '{other}' (expected floor, ceiling, round or half-up)"
            )),
        }
    }
}

// ── Aggregation ───────────────────────────────────────────────────────────────

/// Merge any number of aligned classified rasters.
///
/// A cell is no-data when any input cell is no-data; otherwise it is the
/// rounded arithmetic mean of the input bands. The result does not depend on
/// input order.
pub fn aggregate(
    inputs: &[&ClassifiedRaster],
    rounding: &dyn RoundingStrategy,
) -> Result<SuitabilityRaster, PipelineError> {
    let Some(first) = inputs.first() else {
        return Err(PipelineError::NoCriteria);
    };
    let grid = first.grid;
    for other in &inputs[1..] {
        if !other.grid.is_aligned_with(&grid) || other.cells.len() != first.cells.len() {
            return Err(AlignmentError {
                expected: grid.to_string(),
                found: other.grid.to_string(),
            }
            .into());
        }
    }

    let n = inputs.len() as f64;
    let cells = (0..first.cells.len())
        .map(|i| {
            let mut sum = 0i32;
            for input in inputs {
                sum += input.cells[i]?.code();
            }
            band_for_mean(sum as f64 / n, rounding)
        })
        .collect();

    Ok(ClassifiedRaster { cells, grid })
}

/// The three-criterion form used by the full pipeline.
pub fn aggregate_criteria(
    cover: &ClassifiedRaster,
    slope: &ClassifiedRaster,
    hand: &ClassifiedRaster,
    rounding: &dyn RoundingStrategy,
) -> Result<SuitabilityRaster, PipelineError> {
    aggregate(&[cover, slope, hand], rounding)
}

fn band_for_mean(mean: f64, rounding: &dyn RoundingStrategy) -> Option<SuitabilityBand> {
    let rounded = rounding.round(mean);
    if !rounded.is_finite() {
        return None;
    }
    SuitabilityBand::from_code(rounded.clamp(1.0, 3.0) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::raster::{GeoTransform, Grid};

    use SuitabilityBand::{High, Low, Medium};

    fn grid(width: usize) -> Grid {
        Grid {
            width,
            height: 1,
            transform: GeoTransform::new(0.0, 10.0, 10.0, -10.0),
            crs: Crs::from_epsg(32721),
        }
    }

    fn raster(cells: Vec<Option<SuitabilityBand>>) -> ClassifiedRaster {
        ClassifiedRaster { grid: grid(cells.len()), cells }
    }

    #[test]
    fn tie_handling_per_rule() {
        let cases = [
            (Rounding::Floor, 2.0),
            (Rounding::Ceiling, 3.0),
            (Rounding::Round, 2.0),
            (Rounding::HalfUp, 3.0),
        ];
        for (rule, expected) in cases {
            assert_eq!(rule.round(2.5), expected, "{rule}");
        }
        assert_eq!(Rounding::Round.round(1.5), 2.0);
    }

    #[test]
    fn mean_of_two_bands_at_half() {
        let a = raster(vec![Some(Medium)]);
        let b = raster(vec![Some(High)]);
        let floor = aggregate(&[&a, &b], &Rounding::Floor).unwrap();
        let ceil = aggregate(&[&a, &b], &Rounding::Ceiling).unwrap();
        assert_eq!(floor.cells, vec![Some(Medium)]);
        assert_eq!(ceil.cells, vec![Some(High)]);
    }

    #[test]
    fn floor_is_the_default() {
        assert_eq!(Rounding::default(), Rounding::Floor);
        let cover = raster(vec![Some(Low), Some(Low), Some(High)]);
        let slope = raster(vec![Some(High), Some(Medium), Some(High)]);
        let hand = raster(vec![Some(Medium), Some(High), Some(High)]);
        let out = aggregate_criteria(&cover, &slope, &hand, &Rounding::default()).unwrap();
        // (1+3+2)/3 = 2, (1+2+3)/3 = 2, 3.
        assert_eq!(out.cells, vec![Some(Medium), Some(Medium), Some(High)]);
    }

    #[test]
    fn permuting_inputs_gives_same_raster() {
        let cover = raster(vec![Some(Low), Some(High), None, Some(Medium)]);
        let slope = raster(vec![Some(High), Some(High), Some(High), Some(Low)]);
        let hand = raster(vec![Some(High), Some(Medium), Some(High), Some(Low)]);
        let reference = aggregate_criteria(&cover, &slope, &hand, &Rounding::Floor).unwrap();
        let permutations: [[&ClassifiedRaster; 3]; 5] = [
            [&cover, &hand, &slope],
            [&slope, &cover, &hand],
            [&slope, &hand, &cover],
            [&hand, &cover, &slope],
            [&hand, &slope, &cover],
        ];
        for p in permutations {
            assert_eq!(aggregate(&p, &Rounding::Floor).unwrap(), reference);
        }
    }

    #[test]
    fn one_nodata_input_forces_nodata() {
        let cover = raster(vec![None, Some(High)]);
        let slope = raster(vec![Some(High), Some(High)]);
        let hand = raster(vec![Some(High), Some(High)]);
        let out = aggregate_criteria(&cover, &slope, &hand, &Rounding::Ceiling).unwrap();
        assert_eq!(out.cells, vec![None, Some(High)]);
    }

    #[test]
    fn custom_strategy_is_clamped() {
        let a = raster(vec![Some(High), Some(Low)]);
        let out = aggregate(&[&a], &|m: f64| if m > 2.0 { m + 10.0 } else { m - 10.0 }).unwrap();
        assert_eq!(out.cells, vec![Some(High), Some(Low)]);
    }

    #[test]
    fn misaligned_inputs_are_rejected() {
        let a = raster(vec![Some(High); 3]);
        let b = raster(vec![Some(High); 4]);
        let err = aggregate(&[&a, &b], &Rounding::Floor).unwrap_err();
        assert!(matches!(err, PipelineError::Alignment(_)), "{err}");
        assert!(matches!(aggregate(&[], &Rounding::Floor), Err(PipelineError::NoCriteria)));
    }

    #[test]
    fn parse_names() {
        for rule in Rounding::ALL {
            assert_eq!(rule.name().parse::<Rounding>().unwrap(), rule);
        }
        assert!("banker".parse::<Rounding>().is_err());
    }
}
