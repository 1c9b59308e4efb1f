//! Terrain derivatives computed from an aligned DEM.
mod gradient;
pub mod slope;

pub use slope::slope_percent;
