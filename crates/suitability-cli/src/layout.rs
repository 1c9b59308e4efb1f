//! On-disk layout of one project under the output directory.
//!
//! ```text
//! <output>/<project>/
//!   data/                   local copies of fetched datasets + coverage.json
//!   intermediate_results/   per-criterion rasters
//!   results/                classified_land.tif, stats.json, remaining_land.geojson
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use suitability_core::DatasetId;

#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(output_dir: &Path, project_name: &str) -> Self {
        Self { root: output_dir.join(project_name) }
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [self.data_dir(), self.results_dir(), self.intermediate_dir()] {
            fs::create_dir_all(&dir).with_context(|| format!("Cannot create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn intermediate_dir(&self) -> PathBuf {
        self.root.join("intermediate_results")
    }

    pub fn coverage_path(&self) -> PathBuf {
        self.data_dir().join("coverage.json")
    }

    pub fn classified_raster_path(&self) -> PathBuf {
        self.results_dir().join("classified_land.tif")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.results_dir().join("stats.json")
    }

    pub fn remaining_land_path(&self) -> PathBuf {
        self.results_dir().join("remaining_land.geojson")
    }

    pub fn intermediate_path(&self, name: &str) -> PathBuf {
        self.intermediate_dir().join(format!("{name}.tif"))
    }
}

/// File name of a dataset, both in the input directory and as a local copy.
pub fn dataset_file_name(id: &DatasetId) -> String {
    if id.is_vector() {
        format!("{}.geojson", id.key())
    } else {
        format!("{}.tif", id.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_project_layout() {
        let layout = ProjectLayout::new(Path::new("/out"), "chaco");
        assert_eq!(layout.classified_raster_path(), Path::new("/out/chaco/results/classified_land.tif"));
        assert_eq!(layout.coverage_path(), Path::new("/out/chaco/data/coverage.json"));
        assert_eq!(
            layout.intermediate_path("slope_reclassified"),
            Path::new("/out/chaco/intermediate_results/slope_reclassified.tif")
        );
    }

    #[test]
    fn dataset_file_names() {
        assert_eq!(dataset_file_name(&DatasetId::LandCover { year: 2022 }), "lc_2022.tif");
        assert_eq!(dataset_file_name(&DatasetId::AdministrativeBorders), "admin_borders.geojson");
    }
}
