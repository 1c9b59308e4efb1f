//! Directory-backed dataset source.
//!
//! The input directory plays the role of the upstream archive: a fetch reads
//! the full file, crops rasters to the requested box and leaves a local copy
//! in the project's data directory. A later run whose AOI the coverage store
//! says is covered reads that copy instead.
//!
//! Vector copies keep every feature and its properties, so the sub-region
//! filter applies on each read, whether from upstream or from the copy.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use geo::{BooleanOps, MultiPolygon};
use suitability_core::{
    BBox, Crs, Dataset, DatasetFetcher, DatasetId, FetchError, ReferenceLayer, Reprojector,
};
use tracing::{debug, warn};

use crate::geojson::{self, PropertyFilter};
use crate::geotiff;
use crate::layout::dataset_file_name;

/// Property naming the first-level administrative unit in border layers.
const SUB_REGION_PROPERTY: &str = "NAME_1";

pub struct DirectorySource {
    input_dir: PathBuf,
    data_dir: PathBuf,
    admin_border: Option<PathBuf>,
    protected_areas: Option<PathBuf>,
    sub_region: Option<String>,
}

impl DirectorySource {
    pub fn new(input_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self { input_dir, data_dir, admin_border: None, protected_areas: None, sub_region: None }
    }

    /// Read administrative borders from `path` instead of the input directory.
    pub fn with_admin_border(mut self, path: Option<PathBuf>) -> Self {
        self.admin_border = path;
        self
    }

    pub fn with_protected_areas(mut self, path: Option<PathBuf>) -> Self {
        self.protected_areas = path;
        self
    }

    /// Keep only the border features of this sub-region.
    pub fn with_sub_region(mut self, name: Option<String>) -> Self {
        self.sub_region = name;
        self
    }

    fn upstream_path(&self, id: &DatasetId) -> PathBuf {
        let explicit = match id {
            DatasetId::AdministrativeBorders => self.admin_border.clone(),
            DatasetId::ProtectedAreas => self.protected_areas.clone(),
            _ => None,
        };
        explicit.unwrap_or_else(|| self.input_dir.join(dataset_file_name(id)))
    }

    fn local_path(&self, id: &DatasetId) -> PathBuf {
        self.data_dir.join(dataset_file_name(id))
    }

    fn read_vector(&self, path: &Path, id: &DatasetId) -> anyhow::Result<ReferenceLayer> {
        let filter = match (id, self.sub_region.as_deref()) {
            (DatasetId::AdministrativeBorders, Some(name)) => {
                Some(PropertyFilter { property: SUB_REGION_PROPERTY, value: name })
            }
            _ => None,
        };
        let (geometry, crs) = geojson::read_polygons(path, filter)?;
        Ok(ReferenceLayer::new(geometry, crs))
    }

    fn store_local_copy(&self, id: &DatasetId, upstream: &Path, dataset: &Dataset) {
        let path = self.local_path(id);
        let written = match dataset {
            Dataset::Raster(r) => geotiff::write_raster(&path, r),
            Dataset::Vector(_) => fs::copy(upstream, &path)
                .map(|_| ())
                .with_context(|| format!("Cannot copy {} to {}", upstream.display(), path.display())),
        };
        match written {
            Ok(()) => debug!(dataset = %id, path = %path.display(), "stored local copy"),
            Err(e) => warn!(dataset = %id, error = %format!("{e:#}"), "could not store local copy"),
        }
    }
}

impl DatasetFetcher for DirectorySource {
    fn fetch(&self, bbox: &BBox, dataset: &DatasetId) -> Result<Dataset, FetchError> {
        let path = self.upstream_path(dataset);
        let unavailable = |reason: String| FetchError::DataUnavailable { dataset: dataset.clone(), bbox: *bbox, reason };
        if !path.exists() {
            return Err(unavailable(format!("{} not found", path.display())));
        }

        let fetched = if dataset.is_vector() {
            let layer = self.read_vector(&path, dataset).map_err(|e| unavailable(format!("{e:#}")))?;
            Dataset::Vector(clip_to_request(layer, bbox).map_err(|e| unavailable(e.to_string()))?)
        } else {
            let raster = geotiff::read_raster(&path).map_err(|e| unavailable(format!("{e:#}")))?;
            let to_native = Reprojector::new(Crs::WGS84, raster.crs).map_err(|e| unavailable(e.to_string()))?;
            let window = bbox.reprojected(&to_native);
            let cropped = raster
                .crop(&window)
                .ok_or_else(|| unavailable(format!("{} does not overlap the request", path.display())))?;
            Dataset::Raster(cropped)
        };

        self.store_local_copy(dataset, &path, &fetched);
        Ok(fetched)
    }

    fn load_cached(&self, dataset: &DatasetId) -> Result<Option<Dataset>, FetchError> {
        let path = self.local_path(dataset);
        if !path.exists() {
            return Ok(None);
        }
        let unreadable = |e: anyhow::Error| FetchError::CacheUnreadable {
            dataset: dataset.clone(),
            reason: format!("{e:#}"),
        };
        let local = if dataset.is_vector() {
            Dataset::Vector(self.read_vector(&path, dataset).map_err(unreadable)?)
        } else {
            Dataset::Raster(geotiff::read_raster(&path).map_err(unreadable)?)
        };
        Ok(Some(local))
    }
}

/// Drop the polygons that do not reach the requested box.
fn clip_to_request(layer: ReferenceLayer, bbox: &BBox) -> Result<ReferenceLayer, suitability_core::GeometryError> {
    let to_native = Reprojector::new(Crs::WGS84, layer.crs)?;
    let window = MultiPolygon(vec![bbox.reprojected(&to_native).to_polygon()]);
    let Some(window_bbox) = BBox::from_multipolygon(&window) else {
        return Ok(layer);
    };
    let kept = layer
        .geometry
        .0
        .into_iter()
        .filter(|p| {
            let mp = MultiPolygon(vec![p.clone()]);
            BBox::from_multipolygon(&mp).is_some_and(|b| b.intersects(&window_bbox))
                && !mp.intersection(&window).0.is_empty()
        })
        .collect();
    Ok(ReferenceLayer::new(MultiPolygon(kept), layer.crs))
}
