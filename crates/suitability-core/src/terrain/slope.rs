//! Slope raster in percent (Horn method).
//!
//! The DEM must already sit on a metric grid: cell sizes come straight from
//! the geotransform. slope% = 100 · √(dz_dx² + dz_dy²).
use crate::raster::RasterLayer;
use super::gradient::horn_gradient;

/// Compute a per-cell slope raster in percent on the DEM's own grid.
///
/// No-data cells, and cells with a no-data neighbour, come out as NaN.
/// Rasters narrower or shorter than 2 cells have no defined gradient and
/// are returned as all no-data.
pub fn slope_percent(dem: &RasterLayer) -> RasterLayer {
    let mut out = RasterLayer::new(dem.grid(), f32::NAN);
    if dem.width < 2 || dem.height < 2 {
        return out;
    }

    let cell_x = dem.transform.pixel_width.abs();
    let cell_y = dem.transform.pixel_height.abs();

    for r in 0..dem.height {
        for c in 0..dem.width {
            if let Some((dz_dx, dz_dy)) = horn_gradient(dem, r, c, cell_x, cell_y) {
                let pct = 100.0 * (dz_dx * dz_dx + dz_dy * dz_dy).sqrt();
                out.set(r, c, pct as f32);
            }
        }
    }
    out
}
