//! Minimal GeoJSON polygon reading and writing.
//!
//! Only Polygon and MultiPolygon geometries are kept; other geometry types are
//! skipped. The CRS comes from the legacy `crs` member when present and is
//! WGS84 otherwise.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use suitability_core::Crs;

// ── JSON schema ───────────────────────────────────────────────────────────────

#[derive(Deserialize, Serialize)]
#[serde(tag = "type")]
enum Document {
    FeatureCollection {
        features: Vec<Feature>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crs: Option<NamedCrs>,
    },
    Feature {
        #[serde(default)]
        properties: Option<Map<String, Value>>,
        geometry: Option<Geometry>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crs: Option<NamedCrs>,
    },
    Polygon {
        coordinates: Vec<Vec<Vec<f64>>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crs: Option<NamedCrs>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crs: Option<NamedCrs>,
    },
}

#[derive(Deserialize, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    geometry: Option<Geometry>,
}

#[derive(Deserialize, Serialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
    #[serde(other)]
    Unsupported,
}

/// Legacy `{"type": "name", "properties": {"name": "EPSG:32721"}}` member.
#[derive(Deserialize, Serialize)]
struct NamedCrs {
    #[serde(rename = "type")]
    kind: String,
    properties: NamedCrsProperties,
}

#[derive(Deserialize, Serialize)]
struct NamedCrsProperties {
    name: String,
}

/// Keep only features whose `property` equals `value`.
#[derive(Debug, Clone, Copy)]
pub struct PropertyFilter<'a> {
    pub property: &'a str,
    pub value: &'a str,
}

// ── Reading ───────────────────────────────────────────────────────────────────

pub fn read_polygons(path: &Path, filter: Option<PropertyFilter<'_>>) -> Result<(MultiPolygon<f64>, Crs)> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    parse_polygons(&text, filter).with_context(|| format!("Invalid GeoJSON in {}", path.display()))
}

pub fn parse_polygons(text: &str, filter: Option<PropertyFilter<'_>>) -> Result<(MultiPolygon<f64>, Crs)> {
    let doc: Document = serde_json::from_str(text).context("Not a GeoJSON polygon document")?;
    let mut polygons = Vec::new();

    let crs = match doc {
        Document::FeatureCollection { features, crs } => {
            let mut matched = 0usize;
            for feature in features {
                if keep(feature.properties.as_ref(), filter) {
                    matched += 1;
                    if let Some(g) = feature.geometry {
                        push_geometry(g, &mut polygons)?;
                    }
                }
            }
            if let (Some(f), 0) = (filter, matched) {
                bail!("No feature has {} = \"{}\"", f.property, f.value);
            }
            crs
        }
        Document::Feature { properties, geometry, crs } => {
            if keep(properties.as_ref(), filter) {
                if let Some(g) = geometry {
                    push_geometry(g, &mut polygons)?;
                }
            }
            crs
        }
        Document::Polygon { coordinates, crs } => {
            polygons.push(polygon(&coordinates)?);
            crs
        }
        Document::MultiPolygon { coordinates, crs } => {
            for p in &coordinates {
                polygons.push(polygon(p)?);
            }
            crs
        }
    };

    let crs = match crs {
        Some(named) => parse_crs_name(&named.properties.name)?,
        None => Crs::WGS84,
    };
    Ok((MultiPolygon(polygons), crs))
}

fn keep(properties: Option<&Map<String, Value>>, filter: Option<PropertyFilter<'_>>) -> bool {
    let Some(f) = filter else {
        return true;
    };
    properties
        .and_then(|p| p.get(f.property))
        .and_then(Value::as_str)
        .is_some_and(|v| v == f.value)
}

fn push_geometry(geometry: Geometry, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    match geometry {
        Geometry::Polygon { coordinates } => out.push(polygon(&coordinates)?),
        Geometry::MultiPolygon { coordinates } => {
            for p in &coordinates {
                out.push(polygon(p)?);
            }
        }
        Geometry::Unsupported => {}
    }
    Ok(())
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let mut rings = rings.iter().map(|r| ring(r));
    let Some(exterior) = rings.next() else {
        bail!("Polygon without rings");
    };
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior?, interiors))
}

fn ring(positions: &[Vec<f64>]) -> Result<LineString<f64>> {
    positions
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => bail!("Position with fewer than 2 coordinates"),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

/// Accepts `EPSG:n`, `urn:ogc:def:crs:EPSG::n` and the OGC CRS84 URN.
fn parse_crs_name(name: &str) -> Result<Crs> {
    if name.ends_with("CRS84") {
        return Ok(Crs::WGS84);
    }
    let code = name
        .rsplit(':')
        .next()
        .and_then(|c| c.parse::<u32>().ok())
        .with_context(|| format!("Unrecognised CRS name \"{name}\""))?;
    Ok(Crs::from_epsg(code))
}

// ── Writing ───────────────────────────────────────────────────────────────────

pub fn to_string(mp: &MultiPolygon<f64>, crs: Crs, properties: Map<String, Value>) -> Result<String> {
    let coordinates = mp
        .0
        .iter()
        .map(|p| {
            std::iter::once(p.exterior())
                .chain(p.interiors())
                .map(|r| r.0.iter().map(|c| vec![c.x, c.y]).collect())
                .collect()
        })
        .collect();
    let doc = Document::FeatureCollection {
        features: vec![Feature {
            kind: "Feature".to_string(),
            properties: Some(properties),
            geometry: Some(Geometry::MultiPolygon { coordinates }),
        }],
        crs: (crs != Crs::WGS84).then(|| NamedCrs {
            kind: "name".to_string(),
            properties: NamedCrsProperties { name: format!("urn:ogc:def:crs:EPSG::{}", crs.epsg()) },
        }),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

pub fn write_polygons(path: &Path, mp: &MultiPolygon<f64>, crs: Crs, properties: Map<String, Value>) -> Result<()> {
    fs::write(path, to_string(mp, crs, properties)?)
        .with_context(|| format!("Write failed: {}", path.display()))
}
