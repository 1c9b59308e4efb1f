//! Horn (1981) 3×3 gradient helper used by the slope derivation.
//! Crate-private; slope is the public entry point.

use crate::raster::RasterLayer;

/// Horn (1981) weighted 3×3 gradient at cell `(r, c)`.
///
/// Returns `(dz_dx, dz_dy)` as dimensionless rise/run values, or None when
/// any cell of the neighbourhood is no-data.
///
/// 3×3 neighbourhood layout:
/// ```text
///   NW(-1,-1)  N(-1, 0)  NE(-1,+1)
///   W ( 0,-1)  *         E ( 0,+1)
///   SW(+1,-1)  S(+1, 0)  SE(+1,+1)
/// ```
///
/// `dz/dx = ((NE + 2E + SE) − (NW + 2W + SW)) / (8 · cell_x)`
/// `dz/dy = ((NW + 2N + NE) − (SW + 2S + SE)) / (8 · cell_y)`
///
/// Edge cells replicate the centre cell for the missing side, and the
/// divisor shrinks to the one-cell span that is actually available.
/// Caller must ensure width and height are at least 2.
pub(crate) fn horn_gradient(
    dem: &RasterLayer,
    r: usize,
    c: usize,
    cell_x: f64,
    cell_y: f64,
) -> Option<(f64, f64)> {
    let up = r.saturating_sub(1);
    let down = (r + 1).min(dem.height - 1);
    let left = c.saturating_sub(1);
    let right = (c + 1).min(dem.width - 1);

    let at = |row: usize, col: usize| -> Option<f64> {
        let v = dem.get(row, col);
        (!v.is_nan()).then_some(v as f64)
    };

    let nw = at(up, left)?;
    let n  = at(up, c)?;
    let ne = at(up, right)?;
    let w  = at(r, left)?;
    let e  = at(r, right)?;
    let sw = at(down, left)?;
    let s  = at(down, c)?;
    let se = at(down, right)?;
    at(r, c)?;

    let span_x = (right - left) as f64;
    let span_y = (down - up) as f64;
    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (4.0 * span_x * cell_x);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (4.0 * span_y * cell_y);
    Some((dz_dx, dz_dy))
}
