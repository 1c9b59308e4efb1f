//! Per-criterion reclassification into ordinal suitability bands.
//!
//! One classifier serves all three criteria; what differs is the threshold
//! table it is handed. Interval tables use half-open intervals checked in
//! ascending band order:
//!
//! ```text
//!   [low, high)      → High
//!   [high, medium)   → Medium
//!   anything else    → Low      (finite values only)
//! ```
//!
//! Non-finite inputs, masked category codes and categories outside the
//! table come out as no-data; they never default to Low.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::acquire::DatasetId;
use crate::raster::{Grid, RasterLayer, Resampling, NODATA};

/// Ordinal suitability value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SuitabilityBand {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl SuitabilityBand {
    pub const ALL: [SuitabilityBand; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Land-cover classes of the annual 10 m land use / land cover product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum LandCoverClass {
    NoData = 0,
    Water = 1,
    Trees = 2,
    FloodedVegetation = 4,
    Crops = 5,
    BuiltArea = 7,
    BareGround = 8,
    SnowIce = 9,
    Clouds = 10,
    Rangeland = 11,
}

impl LandCoverClass {
    pub const ALL: [LandCoverClass; 10] = [
        Self::NoData,
        Self::Water,
        Self::Trees,
        Self::FloodedVegetation,
        Self::Crops,
        Self::BuiltArea,
        Self::BareGround,
        Self::SnowIce,
        Self::Clouds,
        Self::Rangeland,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NoData => "No Data",
            Self::Water => "Water",
            Self::Trees => "Trees",
            Self::FloodedVegetation => "Flooded vegetation",
            Self::Crops => "Crops",
            Self::BuiltArea => "Built area",
            Self::BareGround => "Bare ground",
            Self::SnowIce => "Snow/ice",
            Self::Clouds => "Clouds",
            Self::Rangeland => "Rangeland",
        }
    }
}

/// Band boundaries for a continuous measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalThresholds {
    /// Lower bound of the High band (inclusive).
    pub low_threshold: f64,
    /// Upper bound of High (exclusive) and lower bound of Medium (inclusive).
    pub high_threshold: f64,
    /// Upper bound of the Medium band (exclusive).
    pub medium_threshold: f64,
}

impl IntervalThresholds {
    /// Slope in percent: High [1, 3), Medium [3, 5), Low otherwise.
    pub const SLOPE_PERCENT: IntervalThresholds =
        IntervalThresholds { low_threshold: 1.0, high_threshold: 3.0, medium_threshold: 5.0 };

    /// HAND in metres: High [1, 30), Medium [30, 50), Low otherwise.
    pub const HAND_METRES: IntervalThresholds =
        IntervalThresholds { low_threshold: 1.0, high_threshold: 30.0, medium_threshold: 50.0 };

    pub fn band(&self, value: f64) -> Option<SuitabilityBand> {
        if !value.is_finite() {
            return None;
        }
        if value >= self.low_threshold && value < self.high_threshold {
            Some(SuitabilityBand::High)
        } else if value >= self.high_threshold && value < self.medium_threshold {
            Some(SuitabilityBand::Medium)
        } else {
            Some(SuitabilityBand::Low)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let ordered = self.low_threshold <= self.high_threshold
            && self.high_threshold <= self.medium_threshold;
        let finite = [self.low_threshold, self.high_threshold, self.medium_threshold]
            .iter()
            .all(|v| v.is_finite());
        if ordered && finite {
            Ok(())
        } else {
            Err(format!(
                "thresholds must be finite and satisfy low <= high <= medium, got {}/{}/{}",
                self.low_threshold, self.high_threshold, self.medium_threshold
            ))
        }
    }
}

/// Band membership for categorical codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTable {
    pub low: Vec<i32>,
    pub medium: Vec<i32>,
    pub high: Vec<i32>,
    /// Codes treated as missing observations (no-data, clouds).
    #[serde(default = "CategoryTable::default_masked")]
    pub masked: Vec<i32>,
}

impl CategoryTable {
    /// Crops → Low; Bare ground, Rangeland → High; everything else no-data.
    pub fn land_cover() -> Self {
        Self {
            low: vec![LandCoverClass::Crops.code()],
            medium: Vec::new(),
            high: vec![LandCoverClass::BareGround.code(), LandCoverClass::Rangeland.code()],
            masked: Self::default_masked(),
        }
    }

    fn default_masked() -> Vec<i32> {
        vec![LandCoverClass::NoData.code(), LandCoverClass::Clouds.code()]
    }

    /// Every code that maps to a band.
    pub fn viable_codes(&self) -> impl Iterator<Item = i32> + '_ {
        self.low.iter().chain(&self.medium).chain(&self.high).copied()
    }

    pub fn band(&self, value: f64) -> Option<SuitabilityBand> {
        if !value.is_finite() || value.fract() != 0.0 {
            return None;
        }
        let code = value as i32;
        if self.masked.contains(&code) {
            None
        } else if self.high.contains(&code) {
            Some(SuitabilityBand::High)
        } else if self.medium.contains(&code) {
            Some(SuitabilityBand::Medium)
        } else if self.low.contains(&code) {
            Some(SuitabilityBand::Low)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let lists = [("low", &self.low), ("medium", &self.medium), ("high", &self.high)];
        for (i, (name_a, a)) in lists.iter().enumerate() {
            for (name_b, b) in &lists[i + 1..] {
                if let Some(code) = a.iter().find(|c| b.contains(c)) {
                    return Err(format!("category {code} listed as both {name_a} and {name_b}"));
                }
            }
            if let Some(code) = a.iter().find(|c| self.masked.contains(c)) {
                return Err(format!("category {code} is both {name_a} and masked"));
            }
        }
        Ok(())
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::land_cover()
    }
}

/// Threshold table handed to the classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Thresholds {
    Interval(IntervalThresholds),
    Categories(CategoryTable),
}

impl Thresholds {
    pub fn band(&self, value: f64) -> Option<SuitabilityBand> {
        match self {
            Thresholds::Interval(t) => t.band(value),
            Thresholds::Categories(t) => t.band(value),
        }
    }
}

/// The three suitability criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    LandCover,
    Slope,
    Hand,
}

impl Criterion {
    /// Fixed merge order.
    pub const ALL: [Criterion; 3] = [Criterion::LandCover, Criterion::Slope, Criterion::Hand];

    pub fn name(self) -> &'static str {
        match self {
            Criterion::LandCover => "land_cover",
            Criterion::Slope => "slope",
            Criterion::Hand => "hand",
        }
    }

    /// Source dataset the criterion's measurement is derived from.
    pub fn dataset(self, year: i32) -> DatasetId {
        match self {
            Criterion::LandCover => DatasetId::LandCover { year },
            Criterion::Slope => DatasetId::Dem,
            Criterion::Hand => DatasetId::Hand,
        }
    }

    pub fn resampling(self) -> Resampling {
        match self {
            Criterion::LandCover => Resampling::Nearest,
            Criterion::Slope | Criterion::Hand => Resampling::Bilinear,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Criterion {
    type Err = String;

    /// Accepts the snake_case name, the kebab-case serde name and `lc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "land_cover" | "landcover" | "lc" => Ok(Criterion::LandCover),
            "slope" => Ok(Criterion::Slope),
            "hand" => Ok(Criterion::Hand),
            other => Err(format!("unknown criterion '{other}' (expected land_cover, slope or hand)")),
        }
    }
}

/// Raster of suitability bands; `None` is no-data.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRaster {
    pub cells: Vec<Option<SuitabilityBand>>,
    pub grid: Grid,
}

/// The aggregate of all selected criteria.
pub type SuitabilityRaster = ClassifiedRaster;

impl ClassifiedRaster {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<SuitabilityBand> {
        self.cells[row * self.grid.width + col]
    }

    pub fn band_counts(&self) -> BandCounts {
        let mut counts = BandCounts::default();
        for cell in &self.cells {
            match cell {
                Some(SuitabilityBand::Low) => counts.low += 1,
                Some(SuitabilityBand::Medium) => counts.medium += 1,
                Some(SuitabilityBand::High) => counts.high += 1,
                None => counts.nodata += 1,
            }
        }
        counts
    }

    /// Copy with every cell whose mask entry is false set to no-data.
    pub fn masked(&self, mask: &[bool]) -> ClassifiedRaster {
        let cells = self
            .cells
            .iter()
            .zip(mask)
            .map(|(&cell, &keep)| if keep { cell } else { None })
            .collect();
        ClassifiedRaster { cells, grid: self.grid }
    }

    /// Band codes with no-data written as the `NODATA` sentinel.
    pub fn to_raster(&self) -> RasterLayer {
        let data = self
            .cells
            .iter()
            .map(|c| c.map_or(NODATA, |b| b.code() as f32))
            .collect();
        RasterLayer::from_data(self.grid, data)
    }
}

/// Pixel counts per band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub nodata: usize,
}

impl BandCounts {
    pub fn get(&self, band: SuitabilityBand) -> usize {
        match band {
            SuitabilityBand::Low => self.low,
            SuitabilityBand::Medium => self.medium,
            SuitabilityBand::High => self.high,
        }
    }
}

/// Map every cell of `raster` to a band. The grid is kept as-is: callers
/// align rasters before classifying.
pub fn classify(raster: &RasterLayer, thresholds: &Thresholds) -> ClassifiedRaster {
    let cells = raster.data.iter().map(|&v| thresholds.band(v as f64)).collect();
    ClassifiedRaster { cells, grid: raster.grid() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::raster::GeoTransform;

    use SuitabilityBand::{High, Low, Medium};

    fn row_raster(values: &[f32]) -> RasterLayer {
        let grid = Grid {
            width: values.len(),
            height: 1,
            transform: GeoTransform::new(0.0, 10.0, 10.0, -10.0),
            crs: Crs::from_epsg(32721),
        };
        RasterLayer::from_data(grid, values.to_vec())
    }

    #[test]
    fn slope_boundaries_are_half_open() {
        let table = IntervalThresholds::SLOPE_PERCENT;
        let cases = [
            (0.0, Low),
            (0.999, Low),
            (1.0, High),
            (2.0, High),
            (2.999, High),
            (3.0, Medium),
            (4.999, Medium),
            (5.0, Low),
            (12.0, Low),
        ];
        for (value, expected) in cases {
            assert_eq!(table.band(value), Some(expected), "slope {value}");
        }
    }

    #[test]
    fn hand_boundaries_are_half_open() {
        let table = IntervalThresholds::HAND_METRES;
        let cases = [
            (0.5, Low),
            (1.0, High),
            (10.0, High),
            (29.99, High),
            (30.0, Medium),
            (49.99, Medium),
            (50.0, Low),
            (120.0, Low),
        ];
        for (value, expected) in cases {
            assert_eq!(table.band(value), Some(expected), "hand {value}");
        }
    }

    #[test]
    fn non_finite_values_are_nodata_not_low() {
        let table = IntervalThresholds::SLOPE_PERCENT;
        assert_eq!(table.band(f64::NAN), None);
        assert_eq!(table.band(f64::INFINITY), None);
    }

    #[test]
    fn land_cover_table() {
        let table = CategoryTable::land_cover();
        assert_eq!(table.band(LandCoverClass::Crops.code() as f64), Some(Low));
        assert_eq!(table.band(LandCoverClass::Rangeland.code() as f64), Some(High));
        assert_eq!(table.band(LandCoverClass::BareGround.code() as f64), Some(High));
        for other in [
            LandCoverClass::Trees,
            LandCoverClass::Water,
            LandCoverClass::BuiltArea,
            LandCoverClass::Clouds,
            LandCoverClass::NoData,
        ] {
            assert_eq!(table.band(other.code() as f64), None, "{}", other.label());
        }
        assert_eq!(table.band(5.5), None);
    }

    #[test]
    fn overlapping_category_lists_are_rejected() {
        let mut table = CategoryTable::land_cover();
        table.medium.push(LandCoverClass::Crops.code());
        assert!(table.validate().is_err());
        assert!(CategoryTable::land_cover().validate().is_ok());
    }

    #[test]
    fn unordered_intervals_are_rejected() {
        let bad = IntervalThresholds { low_threshold: 1.0, high_threshold: 5.0, medium_threshold: 3.0 };
        assert!(bad.validate().is_err());
        assert!(IntervalThresholds::HAND_METRES.validate().is_ok());
    }

    #[test]
    fn classify_keeps_grid_and_propagates_nodata() {
        let raster = row_raster(&[0.5, 2.0, 4.0, f32::NAN]);
        let classified = classify(&raster, &Thresholds::Interval(IntervalThresholds::SLOPE_PERCENT));
        assert_eq!(classified.grid, raster.grid());
        assert_eq!(classified.cells, vec![Some(Low), Some(High), Some(Medium), None]);

        let counts = classified.band_counts();
        assert_eq!((counts.low, counts.medium, counts.high, counts.nodata), (1, 1, 1, 1));
    }

    #[test]
    fn to_raster_uses_sentinel() {
        let raster = row_raster(&[2.0, f32::NAN]);
        let out = classify(&raster, &Thresholds::Interval(IntervalThresholds::SLOPE_PERCENT)).to_raster();
        assert_eq!(out.data, vec![3.0, NODATA]);
    }

    #[test]
    fn criterion_names_parse() {
        for c in Criterion::ALL {
            assert_eq!(c.name().parse::<Criterion>().unwrap(), c);
        }
        assert_eq!("land-cover".parse::<Criterion>().unwrap(), Criterion::LandCover);
        assert!("ndvi".parse::<Criterion>().is_err());
    }
}
