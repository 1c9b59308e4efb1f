//! Where results go. New backends implement `ResultSink`; the pipeline
//! never names a concrete one.

use geo::MultiPolygon;

use crate::classify::SuitabilityRaster;
use crate::crs::Crs;
use crate::error::StoreError;
use crate::raster::RasterLayer;
use crate::stats::StatisticsReport;

pub trait ResultSink {
    /// Completed run: the suitability raster and its report.
    fn persist(&mut self, raster: &SuitabilityRaster, report: &StatisticsReport) -> Result<(), StoreError>;

    /// Run stopped early: the report alone.
    fn persist_report(&mut self, report: &StatisticsReport) -> Result<(), StoreError>;

    /// Per-criterion working raster (measurement or reclassified bands).
    fn persist_intermediate(&mut self, _name: &str, _raster: &RasterLayer) -> Result<(), StoreError> {
        Ok(())
    }

    /// Land left after the geometry gate.
    fn persist_remaining_land(&mut self, _area: &MultiPolygon<f64>, _crs: Crs) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn persist(&mut self, raster: &SuitabilityRaster, report: &StatisticsReport) -> Result<(), StoreError> {
        (**self).persist(raster, report)
    }

    fn persist_report(&mut self, report: &StatisticsReport) -> Result<(), StoreError> {
        (**self).persist_report(report)
    }

    fn persist_intermediate(&mut self, name: &str, raster: &RasterLayer) -> Result<(), StoreError> {
        (**self).persist_intermediate(name, raster)
    }

    fn persist_remaining_land(&mut self, area: &MultiPolygon<f64>, crs: Crs) -> Result<(), StoreError> {
        (**self).persist_remaining_land(area, crs)
    }
}

/// Keeps everything in memory. Used for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub raster: Option<SuitabilityRaster>,
    pub report: Option<StatisticsReport>,
    pub intermediates: Vec<(String, RasterLayer)>,
    pub remaining_land: Option<(MultiPolygon<f64>, Crs)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intermediate(&self, name: &str) -> Option<&RasterLayer> {
        self.intermediates.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }
}

impl ResultSink for MemorySink {
    fn persist(&mut self, raster: &SuitabilityRaster, report: &StatisticsReport) -> Result<(), StoreError> {
        self.raster = Some(raster.clone());
        self.report = Some(report.clone());
        Ok(())
    }

    fn persist_report(&mut self, report: &StatisticsReport) -> Result<(), StoreError> {
        self.report = Some(report.clone());
        Ok(())
    }

    fn persist_intermediate(&mut self, name: &str, raster: &RasterLayer) -> Result<(), StoreError> {
        self.intermediates.push((name.to_string(), raster.clone()));
        Ok(())
    }

    fn persist_remaining_land(&mut self, area: &MultiPolygon<f64>, crs: Crs) -> Result<(), StoreError> {
        self.remaining_land = Some((area.clone(), crs));
        Ok(())
    }
}
