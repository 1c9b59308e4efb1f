/// Coordinate reference systems and the conversions the pipeline needs.
/// All coordinate math uses f64 for precision.
///
/// Supported conversions: WGS84 geographic (EPSG:4326) to and from the WGS84
/// UTM zones (EPSG:326xx north, EPSG:327xx south). Any other EPSG code is
/// carried through untouched and only works when no conversion is requested.
use std::fmt;

use geo::{Area, BoundingRect, Centroid, Coord, MapCoords, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// WGS84 semi-major axis (metres).
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM scale factor on the central meridian.
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
/// Radius of the sphere with the same surface area as the WGS84 ellipsoid.
const AUTHALIC_RADIUS: f64 = 6_371_007.181;

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };

    pub fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// True for CRSs whose units are degrees.
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg, 4326 | 4269 | 4258 | 4674)
    }

    /// UTM zone and hemisphere for WGS84 / UTM codes.
    pub fn utm_zone(&self) -> Option<UtmZone> {
        let (base, south) = match self.epsg {
            32601..=32660 => (32600, false),
            32701..=32760 => (32700, true),
            _ => return None,
        };
        Some(UtmZone { zone: (self.epsg - base) as u8, south })
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub zone: u8,
    pub south: bool,
}

impl UtmZone {
    /// Longitude of the zone's central meridian, degrees.
    pub fn central_meridian(&self) -> f64 {
        (self.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }

    /// Transverse Mercator forward projection (Snyder 1987, eqs. 8-9 to 8-15).
    pub fn project(&self, ll: LatLon) -> (f64, f64) {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let ep2 = e2 / (1.0 - e2);
        let phi = ll.lat.to_radians();
        let dlam = (ll.lon - self.central_meridian()).to_radians();

        let (sin_phi, cos_phi) = phi.sin_cos();
        let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = phi.tan().powi(2);
        let c = ep2 * cos_phi * cos_phi;
        let a = cos_phi * dlam;
        let m = meridian_arc(phi, e2);

        let x = UTM_K0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
            + UTM_FALSE_EASTING;
        let mut y = UTM_K0
            * (m + n
                * phi.tan()
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
        if self.south {
            y += UTM_FALSE_NORTHING_SOUTH;
        }
        (x, y)
    }

    /// Transverse Mercator inverse projection (Snyder 1987, eqs. 8-17 to 8-25).
    pub fn unproject(&self, x: f64, y: f64) -> LatLon {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let ep2 = e2 / (1.0 - e2);
        let x = x - UTM_FALSE_EASTING;
        let y = if self.south { y - UTM_FALSE_NORTHING_SOUTH } else { y };

        let m = y / UTM_K0;
        let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));
        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
        let t1 = phi1.tan().powi(2);
        let c1 = ep2 * cos1 * cos1;
        let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
        let d = x / (n1 * UTM_K0);

        let phi = phi1
            - (n1 * phi1.tan() / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lam = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / cos1;

        LatLon::new(phi.to_degrees(), self.central_meridian() + lam.to_degrees())
    }
}

fn meridian_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Identity,
    Forward(UtmZone),
    Inverse(UtmZone),
    Both(UtmZone, UtmZone),
}

/// Converts coordinates from one CRS to another.
#[derive(Debug, Clone, Copy)]
pub struct Reprojector {
    from: Crs,
    to: Crs,
    step: Step,
}

impl Reprojector {
    pub fn new(from: Crs, to: Crs) -> Result<Self, GeometryError> {
        let unsupported = || GeometryError::UnsupportedCrs { from, to };
        let step = if from == to {
            Step::Identity
        } else if from == Crs::WGS84 {
            Step::Forward(to.utm_zone().ok_or_else(unsupported)?)
        } else if to == Crs::WGS84 {
            Step::Inverse(from.utm_zone().ok_or_else(unsupported)?)
        } else {
            let src = from.utm_zone().ok_or_else(unsupported)?;
            let dst = to.utm_zone().ok_or_else(unsupported)?;
            Step::Both(src, dst)
        };
        Ok(Self { from, to, step })
    }

    pub fn source(&self) -> Crs {
        self.from
    }

    pub fn target(&self) -> Crs {
        self.to
    }

    /// Geographic inputs and outputs are (x = lon, y = lat).
    pub fn convert(&self, c: Coord<f64>) -> Coord<f64> {
        match self.step {
            Step::Identity => c,
            Step::Forward(zone) => {
                let (x, y) = zone.project(LatLon::new(c.y, c.x));
                Coord { x, y }
            }
            Step::Inverse(zone) => {
                let ll = zone.unproject(c.x, c.y);
                Coord { x: ll.lon, y: ll.lat }
            }
            Step::Both(src, dst) => {
                let (x, y) = dst.project(src.unproject(c.x, c.y));
                Coord { x, y }
            }
        }
    }

    pub fn convert_multipolygon(&self, mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if matches!(self.step, Step::Identity) {
            return mp.clone();
        }
        mp.map_coords(|c| self.convert(c))
    }
}

/// Area of a polygon set in hectares.
///
/// Metric CRSs use planar area directly. Geographic CRSs are first projected
/// into a spherical Lambert azimuthal equal-area projection centred on the
/// geometry's centroid, so areas never come from degree units.
pub fn area_hectares(mp: &MultiPolygon<f64>, crs: Crs) -> f64 {
    if mp.0.is_empty() {
        return 0.0;
    }
    let m2 = if crs.is_geographic() {
        let Some(centre) = mp.centroid().or_else(|| {
            mp.bounding_rect().map(|r| r.center().into())
        }) else {
            return 0.0;
        };
        let laea = EqualAreaProjection::centred_at(LatLon::new(centre.y(), centre.x()));
        mp.map_coords(|c| laea.project(c)).unsigned_area()
    } else {
        mp.unsigned_area()
    };
    m2 / 10_000.0
}

/// Spherical Lambert azimuthal equal-area projection (Snyder 1987, eq. 24-2).
#[derive(Debug, Clone, Copy)]
struct EqualAreaProjection {
    sin_phi0: f64,
    cos_phi0: f64,
    lam0: f64,
}

impl EqualAreaProjection {
    fn centred_at(centre: LatLon) -> Self {
        let phi0 = centre.lat.to_radians();
        Self { sin_phi0: phi0.sin(), cos_phi0: phi0.cos(), lam0: centre.lon.to_radians() }
    }

    fn project(&self, c: Coord<f64>) -> Coord<f64> {
        let (sin_phi, cos_phi) = c.y.to_radians().sin_cos();
        let dlam = c.x.to_radians() - self.lam0;
        let cos_dlam = dlam.cos();
        let denom = 1.0 + self.sin_phi0 * sin_phi + self.cos_phi0 * cos_phi * cos_dlam;
        let k = (2.0 / denom.max(f64::EPSILON)).sqrt();
        Coord {
            x: AUTHALIC_RADIUS * k * cos_phi * dlam.sin(),
            y: AUTHALIC_RADIUS * k * (self.cos_phi0 * sin_phi - self.sin_phi0 * cos_phi * cos_dlam),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo::polygon;

    #[test]
    fn utm_zone_from_epsg() {
        assert_eq!(Crs::from_epsg(32721).utm_zone(), Some(UtmZone { zone: 21, south: true }));
        assert_eq!(Crs::from_epsg(32633).utm_zone(), Some(UtmZone { zone: 33, south: false }));
        assert_eq!(Crs::WGS84.utm_zone(), None);
        assert!(Crs::WGS84.is_geographic());
        assert!(!Crs::from_epsg(32721).is_geographic());
    }

    #[test]
    fn central_meridian_maps_to_false_easting() {
        let zone = UtmZone { zone: 21, south: true };
        let (x, y) = zone.project(LatLon::new(0.0, zone.central_meridian()));
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 10_000_000.0, epsilon = 1e-6);
    }

    #[test]
    fn project_unproject_roundtrip_within_tolerance() {
        let zone = UtmZone { zone: 21, south: true };
        let mut state: u64 = 7;
        for _ in 0..500 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let lat = -(state as f64 / u64::MAX as f64) * 60.0;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let lon = zone.central_meridian() - 3.0 + (state as f64 / u64::MAX as f64) * 6.0;

            let (x, y) = zone.project(LatLon::new(lat, lon));
            let back = zone.unproject(x, y);
            assert_abs_diff_eq!(back.lat, lat, epsilon = 1e-6);
            assert_abs_diff_eq!(back.lon, lon, epsilon = 1e-6);
        }
    }

    #[test]
    fn one_degree_of_latitude_is_about_110_km() {
        let zone = UtmZone { zone: 21, south: true };
        let (_, y0) = zone.project(LatLon::new(-27.0, -57.0));
        let (_, y1) = zone.project(LatLon::new(-28.0, -57.0));
        let d = (y0 - y1) / UTM_K0;
        assert!((110_700.0..111_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn reprojector_rejects_unknown_pairs() {
        assert!(Reprojector::new(Crs::from_epsg(3857), Crs::WGS84).is_err());
        assert!(Reprojector::new(Crs::from_epsg(3857), Crs::from_epsg(3857)).is_ok());
    }

    #[test]
    fn geographic_area_uses_equal_area_projection() {
        // 1°×1° cell on the equator: R² · Δλ · (sin φ₂ − sin φ₁).
        let cell = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0), (x: 0.0, y: 0.0)
        ]]);
        let expected_ha = AUTHALIC_RADIUS.powi(2)
            * 1f64.to_radians()
            * 1f64.to_radians().sin()
            / 10_000.0;
        let got = area_hectares(&cell, Crs::WGS84);
        assert!((got - expected_ha).abs() / expected_ha < 1e-3, "got {got}, want {expected_ha}");
    }

    #[test]
    fn projected_area_is_planar() {
        let square = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 1000.0, y: 1000.0), (x: 0.0, y: 1000.0), (x: 0.0, y: 0.0)
        ]]);
        assert_abs_diff_eq!(area_hectares(&square, Crs::from_epsg(32721)), 100.0, epsilon = 1e-9);
    }
}
