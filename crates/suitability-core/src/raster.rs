use geo::{Contains, Coord, MultiPolygon, Point};
use serde::{Deserialize, Serialize};

use crate::crs::{Crs, Reprojector};
use crate::error::GeometryError;
use crate::geometry::BBox;

/// On-disk no-data sentinel for every raster the pipeline writes.
pub const NODATA: f32 = -9999.0;

/// North-up affine transform: `x = origin_x + col · pixel_width`,
/// `y = origin_y + row · pixel_height` (pixel_height is negative).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// World coordinates of the centre of cell `(row, col)`.
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> Coord<f64> {
        Coord {
            x: self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            y: self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        }
    }

    /// Fractional (row, col) of a world coordinate; cell centres sit on .5.
    #[inline]
    pub fn to_pixel(&self, c: Coord<f64>) -> (f64, f64) {
        (
            (c.y - self.origin_y) / self.pixel_height,
            (c.x - self.origin_x) / self.pixel_width,
        )
    }

    pub fn cell_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }

    fn approx_eq(&self, other: &GeoTransform) -> bool {
        let tol = 1e-9 * self.pixel_width.abs().max(1.0);
        (self.origin_x - other.origin_x).abs() <= tol
            && (self.origin_y - other.origin_y).abs() <= tol
            && (self.pixel_width - other.pixel_width).abs() <= tol
            && (self.pixel_height - other.pixel_height).abs() <= tol
    }
}

/// Shape, placement and CRS shared by aligned rasters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl Grid {
    /// Smallest grid of `cell_size` squares that covers `bbox`.
    pub fn covering(bbox: &BBox, cell_size: f64, crs: Crs) -> Self {
        let width = (bbox.width() / cell_size).ceil().max(0.0) as usize;
        let height = (bbox.height() / cell_size).ceil().max(0.0) as usize;
        Self {
            width,
            height,
            transform: GeoTransform::new(bbox.min_x, bbox.max_y, cell_size, -cell_size),
            crs,
        }
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bbox(&self) -> BBox {
        let t = &self.transform;
        let x0 = t.origin_x;
        let x1 = t.origin_x + self.width as f64 * t.pixel_width;
        let y0 = t.origin_y;
        let y1 = t.origin_y + self.height as f64 * t.pixel_height;
        BBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    pub fn is_aligned_with(&self, other: &Grid) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.crs == other.crs
            && self.transform.approx_eq(&other.transform)
    }

    /// Row-major mask of cells whose centre lies inside `area`.
    pub fn inside_mask(&self, area: &MultiPolygon<f64>) -> Vec<bool> {
        let Some(area_bbox) = BBox::from_multipolygon(area) else {
            return vec![false; self.len()];
        };
        let mut mask = Vec::with_capacity(self.len());
        for r in 0..self.height {
            for c in 0..self.width {
                let centre = self.transform.cell_center(r, c);
                let candidate = centre.x >= area_bbox.min_x
                    && centre.x <= area_bbox.max_x
                    && centre.y >= area_bbox.min_y
                    && centre.y <= area_bbox.max_y;
                mask.push(candidate && area.contains(&Point::from(centre)));
            }
        }
        mask
    }
}

impl std::fmt::Display for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} cells of {}x{} at ({}, {}) in {}",
            self.width,
            self.height,
            self.transform.pixel_width,
            self.transform.pixel_height,
            self.transform.origin_x,
            self.transform.origin_y,
            self.crs
        )
    }
}

/// How to sample a source raster at a target cell centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resampling {
    /// Category codes: never invent values between classes.
    Nearest,
    /// Continuous measurements.
    Bilinear,
}

/// Single-band raster storing values as f32, row-major, row 0 = north edge.
/// No-data cells hold NaN in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterLayer {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl RasterLayer {
    /// Create a new RasterLayer filled with the given value.
    pub fn new(grid: Grid, fill: f32) -> Self {
        Self {
            data: vec![fill; grid.len()],
            width: grid.width,
            height: grid.height,
            transform: grid.transform,
            crs: grid.crs,
        }
    }

    pub fn from_data(grid: Grid, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), grid.len());
        Self {
            data,
            width: grid.width,
            height: grid.height,
            transform: grid.transform,
            crs: grid.crs,
        }
    }

    pub fn grid(&self) -> Grid {
        Grid { width: self.width, height: self.height, transform: self.transform, crs: self.crs }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    pub fn bbox(&self) -> BBox {
        self.grid().bbox()
    }

    /// Sample at fractional pixel position using the given method.
    /// Returns None outside the raster or where the needed cells are no-data.
    pub fn sample_pixel(&self, row: f64, col: f64, method: Resampling) -> Option<f32> {
        if row < 0.0 || col < 0.0 || row >= self.height as f64 || col >= self.width as f64 {
            return None;
        }
        match method {
            Resampling::Nearest => {
                let v = self.get(row.floor() as usize, col.floor() as usize);
                (!v.is_nan()).then_some(v)
            }
            Resampling::Bilinear => {
                // Shift to centre-based coordinates and clamp at the edges.
                let fy = (row - 0.5).clamp(0.0, (self.height - 1) as f64);
                let fx = (col - 0.5).clamp(0.0, (self.width - 1) as f64);

                let x0 = fx.floor() as usize;
                let y0 = fy.floor() as usize;
                let x1 = (x0 + 1).min(self.width - 1);
                let y1 = (y0 + 1).min(self.height - 1);

                let tx = (fx - x0 as f64) as f32;
                let ty = (fy - y0 as f64) as f32;

                let v00 = self.get(y0, x0);
                let v10 = self.get(y0, x1);
                let v01 = self.get(y1, x0);
                let v11 = self.get(y1, x1);

                let v = v00 * (1.0 - tx) * (1.0 - ty)
                    + v10 * tx * (1.0 - ty)
                    + v01 * (1.0 - tx) * ty
                    + v11 * tx * ty;

                (!v.is_nan()).then_some(v)
            }
        }
    }

    /// Resample onto `grid`, converting target cell centres into this
    /// raster's CRS. Cells outside the source become NaN.
    pub fn resample_to(&self, grid: &Grid, method: Resampling) -> Result<RasterLayer, GeometryError> {
        if self.grid().is_aligned_with(grid) {
            return Ok(self.clone());
        }
        let to_source = Reprojector::new(grid.crs, self.crs)?;
        let mut out = RasterLayer::new(*grid, f32::NAN);
        for r in 0..grid.height {
            for c in 0..grid.width {
                let world = to_source.convert(grid.transform.cell_center(r, c));
                let (pr, pc) = self.transform.to_pixel(world);
                if let Some(v) = self.sample_pixel(pr, pc, method) {
                    out.set(r, c, v);
                }
            }
        }
        Ok(out)
    }

    /// Window of this raster covering `bbox` (same CRS), padded by one cell.
    /// Returns None when the two do not overlap.
    pub fn crop(&self, bbox: &BBox) -> Option<RasterLayer> {
        if !self.bbox().intersects(bbox) || self.width == 0 || self.height == 0 {
            return None;
        }
        let t = &self.transform;
        let (r_a, c_a) = t.to_pixel(Coord { x: bbox.min_x, y: bbox.max_y });
        let (r_b, c_b) = t.to_pixel(Coord { x: bbox.max_x, y: bbox.min_y });
        let clamp = |v: f64, hi: usize| v.max(0.0).min(hi as f64) as usize;
        let r0 = clamp(r_a.min(r_b).floor() - 1.0, self.height);
        let r1 = clamp(r_a.max(r_b).ceil() + 1.0, self.height);
        let c0 = clamp(c_a.min(c_b).floor() - 1.0, self.width);
        let c1 = clamp(c_a.max(c_b).ceil() + 1.0, self.width);
        if r1 <= r0 || c1 <= c0 {
            return None;
        }

        let mut data = Vec::with_capacity((r1 - r0) * (c1 - c0));
        for r in r0..r1 {
            data.extend_from_slice(&self.data[r * self.width + c0..r * self.width + c1]);
        }
        Some(RasterLayer {
            data,
            width: c1 - c0,
            height: r1 - r0,
            transform: GeoTransform::new(
                t.origin_x + c0 as f64 * t.pixel_width,
                t.origin_y + r0 as f64 * t.pixel_height,
                t.pixel_width,
                t.pixel_height,
            ),
            crs: self.crs,
        })
    }

    /// Copy with every cell whose mask entry is false set to NaN.
    pub fn masked(&self, mask: &[bool]) -> RasterLayer {
        let mut out = self.clone();
        for (v, &keep) in out.data.iter_mut().zip(mask) {
            if !keep {
                *v = f32::NAN;
            }
        }
        out
    }

    /// NaN-aware min / max / mean. None when every cell is no-data.
    pub fn summary(&self) -> Option<RasterSummary> {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0f64;
        let mut count = 0usize;
        for &v in self.data.iter().filter(|v| !v.is_nan()) {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
            count += 1;
        }
        (count > 0).then(|| RasterSummary { min, max, mean: sum / count as f64, count })
    }

    /// Raster values with NaN replaced by the on-disk sentinel.
    pub fn to_sentinel_data(&self) -> Vec<f32> {
        self.data.iter().map(|&v| if v.is_nan() { NODATA } else { v }).collect()
    }
}

/// Summary of the valid cells of a raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterSummary {
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn utm() -> Crs {
        Crs::from_epsg(32721)
    }

    fn ramp(width: usize, height: usize, cell: f64) -> RasterLayer {
        let grid = Grid {
            width,
            height,
            transform: GeoTransform::new(0.0, height as f64 * cell, cell, -cell),
            crs: utm(),
        };
        let data = (0..height).flat_map(|r| (0..width).map(move |c| (r * width + c) as f32)).collect();
        RasterLayer::from_data(grid, data)
    }

    #[test]
    fn grid_covering_rounds_up() {
        let g = Grid::covering(&BBox::new(0.0, 0.0, 95.0, 41.0), 10.0, utm());
        assert_eq!((g.width, g.height), (10, 5));
        assert_eq!(g.transform.origin_y, 41.0);
    }

    #[test]
    fn nearest_sampling_returns_cell_value() {
        let r = ramp(4, 4, 10.0);
        assert_eq!(r.sample_pixel(2.5, 1.5, Resampling::Nearest), Some(9.0));
        assert!(r.sample_pixel(-0.1, 1.0, Resampling::Nearest).is_none());
        assert!(r.sample_pixel(1.0, 4.0, Resampling::Nearest).is_none());
    }

    #[test]
    fn bilinear_sampling_at_centres_is_exact() {
        let r = ramp(4, 4, 10.0);
        let v = r.sample_pixel(1.5, 2.5, Resampling::Bilinear).unwrap();
        assert_abs_diff_eq!(v, 6.0, epsilon = 1e-5);
        // Midway between cells (1,1)=5 and (1,2)=6.
        let v = r.sample_pixel(1.5, 2.0, Resampling::Bilinear).unwrap();
        assert_abs_diff_eq!(v, 5.5, epsilon = 1e-5);
    }

    #[test]
    fn resample_to_coarser_grid_in_same_crs() {
        let r = ramp(4, 4, 10.0);
        let target = Grid::covering(&r.bbox(), 20.0, utm());
        let out = r.resample_to(&target, Resampling::Nearest).unwrap();
        assert_eq!((out.width, out.height), (2, 2));
        // Target centre (10, 30) falls on the corner shared by 4 source cells;
        // nearest picks the lower-right one.
        assert_eq!(out.get(0, 0), 5.0);
    }

    #[test]
    fn resample_outside_source_is_nodata() {
        let r = ramp(2, 2, 10.0);
        let target = Grid::covering(&BBox::new(100.0, 100.0, 120.0, 120.0), 10.0, utm());
        let out = r.resample_to(&target, Resampling::Bilinear).unwrap();
        assert!(out.data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn crop_keeps_transform_consistent() {
        let r = ramp(10, 10, 10.0);
        let cropped = r.crop(&BBox::new(40.0, 40.0, 60.0, 60.0)).unwrap();
        let centre = cropped.transform.cell_center(0, 0);
        let (row, col) = r.transform.to_pixel(centre);
        assert_eq!(cropped.get(0, 0), r.get(row as usize, col as usize));
        assert!(r.crop(&BBox::new(500.0, 500.0, 600.0, 600.0)).is_none());
    }

    #[test]
    fn summary_skips_nodata() {
        let mut r = ramp(2, 2, 10.0);
        r.set(0, 0, f32::NAN);
        let s = r.summary().unwrap();
        assert_eq!((s.min, s.max, s.count), (1.0, 3.0, 3));
        assert_abs_diff_eq!(s.mean, 2.0);
        assert!(r.masked(&[false; 4]).summary().is_none());
    }
}
