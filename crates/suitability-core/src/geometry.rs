//! Polygon types shared by the gate, the cache and the raster stages.
//!
//! Geometries are `geo` multipolygons tagged with their CRS. Set algebra
//! (union, intersection, difference) goes through `geo::BooleanOps`, whose
//! outputs are valid by construction; user-supplied inputs are validated once
//! on entry.

use std::fmt;

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{BooleanOps, BoundingRect, Coord, Line, LineString, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::crs::{area_hectares, Crs, Reprojector};
use crate::error::GeometryError;

/// Axis-aligned bounding box in the units of its CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn from_multipolygon(mp: &MultiPolygon<f64>) -> Option<Self> {
        mp.bounding_rect().map(Self::from)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Check if this bbox fully contains another bbox.
    pub fn contains_bbox(&self, other: &BBox) -> bool {
        self.min_x <= other.min_x
            && self.max_x >= other.max_x
            && self.min_y <= other.min_y
            && self.max_y >= other.max_y
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            Coord { x: self.min_x, y: self.min_y },
            Coord { x: self.max_x, y: self.max_y },
        )
        .to_polygon()
    }

    /// Envelope of this box after converting its outline to another CRS.
    ///
    /// Edges are densified so curved projected edges stay inside the result.
    pub fn reprojected(&self, reprojector: &Reprojector) -> BBox {
        const STEPS: usize = 16;
        let mut out: Option<BBox> = None;
        for i in 0..=STEPS {
            let t = i as f64 / STEPS as f64;
            let x = self.min_x + t * self.width();
            let y = self.min_y + t * self.height();
            for c in [
                Coord { x, y: self.min_y },
                Coord { x, y: self.max_y },
                Coord { x: self.min_x, y },
                Coord { x: self.max_x, y },
            ] {
                let p = reprojector.convert(c);
                let b = BBox::new(p.x, p.y, p.x, p.y);
                out = Some(match out {
                    Some(acc) => acc.union(&b),
                    None => b,
                });
            }
        }
        out.unwrap_or(*self)
    }
}

impl From<Rect<f64>> for BBox {
    fn from(r: Rect<f64>) -> Self {
        Self::new(r.min().x, r.min().y, r.max().x, r.max().y)
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// The user-supplied polygon under analysis, with its CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

impl AreaOfInterest {
    /// Validate and wrap a user geometry.
    pub fn new(geometry: MultiPolygon<f64>, crs: Crs) -> Result<Self, GeometryError> {
        validate_polygons(&geometry, "area of interest")?;
        Ok(Self { geometry, crs })
    }

    /// Wrap a geometry produced by set algebra on already-valid inputs.
    pub(crate) fn derived(geometry: MultiPolygon<f64>, crs: Crs) -> Self {
        Self { geometry, crs }
    }

    pub fn area_ha(&self) -> f64 {
        area_hectares(&self.geometry, self.crs)
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_multipolygon(&self.geometry)
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }

    pub fn to_crs(&self, crs: Crs) -> Result<Self, GeometryError> {
        let reprojector = Reprojector::new(self.crs, crs)?;
        Ok(Self { geometry: reprojector.convert_multipolygon(&self.geometry), crs })
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        let vertices: usize = self
            .geometry
            .0
            .iter()
            .map(|p| p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>())
            .sum();
        match self.bbox() {
            Some(b) => format!("{} polygons, {} vertices, bbox {} ({})", self.geometry.0.len(), vertices, b, self.crs),
            None => format!("empty geometry ({})", self.crs),
        }
    }
}

/// A read-only reference polygon collection (administrative borders or
/// protected areas).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLayer {
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

impl ReferenceLayer {
    pub fn new(geometry: MultiPolygon<f64>, crs: Crs) -> Self {
        Self { geometry, crs }
    }

    pub fn empty(crs: Crs) -> Self {
        Self { geometry: MultiPolygon(Vec::new()), crs }
    }

    /// The layer's polygons dissolved into one multipolygon in `crs`.
    pub fn dissolved_in(&self, crs: Crs) -> Result<MultiPolygon<f64>, GeometryError> {
        let reprojector = Reprojector::new(self.crs, crs)?;
        Ok(union_all(&reprojector.convert_multipolygon(&self.geometry)))
    }
}

/// Union of every polygon in `mp`. Overlapping members are dissolved.
pub fn union_all(mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let mut polygons = mp.0.iter();
    let Some(first) = polygons.next() else {
        return MultiPolygon(Vec::new());
    };
    polygons.fold(MultiPolygon(vec![first.clone()]), |acc, p| {
        acc.union(&MultiPolygon(vec![p.clone()]))
    })
}

/// Reject empty, non-finite, unclosed or self-intersecting polygons.
pub fn validate_polygons(mp: &MultiPolygon<f64>, context: &str) -> Result<(), GeometryError> {
    if mp.0.is_empty() {
        return Err(GeometryError::Empty(context.to_string()));
    }
    let invalid = |reason: String| GeometryError::Invalid { context: context.to_string(), reason };

    for (i, polygon) in mp.0.iter().enumerate() {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(invalid(format!("polygon {i} has non-finite coordinates")));
            }
            if ring.0.len() < 4 {
                return Err(invalid(format!("polygon {i} has a ring with fewer than 4 vertices")));
            }
            if ring.0.first() != ring.0.last() {
                return Err(invalid(format!("polygon {i} has an unclosed ring")));
            }
            if let Some(at) = ring_self_intersection(ring) {
                return Err(invalid(format!(
                    "polygon {i} self-intersects near ({:.6}, {:.6})",
                    at.x, at.y
                )));
            }
        }
        if geo::Area::unsigned_area(polygon) == 0.0 {
            return Err(invalid(format!("polygon {i} has zero area")));
        }
    }
    Ok(())
}

/// First crossing between two non-adjacent segments of a closed ring.
fn ring_self_intersection(ring: &LineString<f64>) -> Option<Coord<f64>> {
    let segments: Vec<Line<f64>> = ring.lines().collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if let Some(hit) = line_intersection(segments[i], segments[j]) {
                return Some(match hit {
                    LineIntersection::SinglePoint { intersection, .. } => intersection,
                    LineIntersection::Collinear { intersection } => intersection.start,
                });
            }
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::polygon;

    /// Axis-aligned rectangle as a multipolygon.
    pub(crate) fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![BBox::new(min_x, min_y, max_x, max_y).to_polygon()])
    }

    #[test]
    fn bow_tie_is_rejected() {
        let bow_tie = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0), (x: 10.0, y: 10.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0), (x: 0.0, y: 0.0)
        ]]);
        let err = AreaOfInterest::new(bow_tie, Crs::from_epsg(32721)).unwrap_err();
        assert!(matches!(err, GeometryError::Invalid { .. }), "{err}");
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let err = AreaOfInterest::new(MultiPolygon(vec![]), Crs::WGS84).unwrap_err();
        assert!(matches!(err, GeometryError::Empty(_)));
    }

    #[test]
    fn simple_square_is_valid() {
        assert!(AreaOfInterest::new(rect(0.0, 0.0, 100.0, 100.0), Crs::from_epsg(32721)).is_ok());
    }

    #[test]
    fn union_all_dissolves_overlaps() {
        let mut mp = rect(0.0, 0.0, 10.0, 10.0);
        mp.0.extend(rect(5.0, 0.0, 15.0, 10.0).0);
        let dissolved = union_all(&mp);
        assert!((geo::Area::unsigned_area(&dissolved) - 150.0).abs() < 1e-9);
    }

    #[test]
    fn bbox_reprojection_contains_corners() {
        let wgs = BBox::new(-58.0, -28.0, -57.0, -27.0);
        let utm = wgs.reprojected(&Reprojector::new(Crs::WGS84, Crs::from_epsg(32721)).unwrap());
        assert!(utm.min_x < 500_000.0 && utm.max_x > 500_000.0 - 1.0);
        assert!(utm.min_y > 6_800_000.0 && utm.max_y < 7_100_000.0, "{utm}");
    }
}
