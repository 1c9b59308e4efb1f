//! Result sink writing GeoTIFF, GeoJSON and JSON files into the project layout.

use std::fs;

use geo::MultiPolygon;
use serde_json::{Map, Value};
use suitability_core::{Crs, RasterLayer, ResultSink, StatisticsReport, StoreError, SuitabilityRaster};
use tracing::{debug, info};

use crate::geojson;
use crate::geotiff;
use crate::layout::ProjectLayout;

pub struct DiskSink {
    layout: ProjectLayout,
}

impl DiskSink {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }
}

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{e:#}"))
}

impl ResultSink for DiskSink {
    fn persist(&mut self, raster: &SuitabilityRaster, report: &StatisticsReport) -> Result<(), StoreError> {
        let path = self.layout.classified_raster_path();
        geotiff::write_raster(&path, &raster.to_raster()).map_err(backend)?;
        info!(path = %path.display(), "suitability raster written");
        self.persist_report(report)
    }

    fn persist_report(&mut self, report: &StatisticsReport) -> Result<(), StoreError> {
        let path = self.layout.stats_path();
        fs::write(&path, serde_json::to_string_pretty(report)?)?;
        info!(path = %path.display(), "statistics written");
        Ok(())
    }

    fn persist_intermediate(&mut self, name: &str, raster: &RasterLayer) -> Result<(), StoreError> {
        let path = self.layout.intermediate_path(name);
        geotiff::write_raster(&path, raster).map_err(backend)?;
        debug!(path = %path.display(), "intermediate raster written");
        Ok(())
    }

    fn persist_remaining_land(&mut self, area: &MultiPolygon<f64>, crs: Crs) -> Result<(), StoreError> {
        let path = self.layout.remaining_land_path();
        let mut properties = Map::new();
        properties.insert("name".to_string(), Value::from("remaining_land"));
        geojson::write_polygons(&path, area, crs, properties).map_err(backend)?;
        debug!(path = %path.display(), "remaining land written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use suitability_core::{
        ClassifiedRaster, GeoTransform, Grid, StatisticsCollector, SuitabilityBand, NODATA,
    };

    fn layout(root: &Path) -> ProjectLayout {
        let layout = ProjectLayout::new(root, "demo");
        layout.create_dirs().unwrap();
        layout
    }

    #[test]
    fn completed_run_writes_raster_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DiskSink::new(layout(dir.path()));

        let grid = Grid {
            width: 2,
            height: 1,
            transform: GeoTransform::new(500_000.0, 6_900_000.0, 10.0, -10.0),
            crs: Crs::from_epsg(32721),
        };
        let raster = ClassifiedRaster { cells: vec![Some(SuitabilityBand::Medium), None], grid };
        let stats = StatisticsCollector::new();
        stats.record("status", "success");
        sink.persist(&raster, &stats.finalize()).unwrap();

        let back = geotiff::read_raster(&sink.layout().classified_raster_path()).unwrap();
        assert_eq!(back.get(0, 0), 2.0);
        assert!(back.get(0, 1).is_nan());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(sink.layout().stats_path()).unwrap()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(raster.to_raster().data[1], NODATA);
    }

    #[test]
    fn insufficient_run_writes_only_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DiskSink::new(layout(dir.path()));
        let stats = StatisticsCollector::new();
        stats.record("shortfall_ha", 50.0);
        sink.persist_report(&stats.finalize()).unwrap();

        assert!(sink.layout().stats_path().exists());
        assert!(!sink.layout().classified_raster_path().exists());
    }
}
