/// Land suitability analysis from the command line.
///
/// `landsuit run --aoi area.geojson` reduces the AOI by administrative
/// borders and protected areas, classifies land cover, slope and HAND from
/// the rasters in the input directory, and writes the suitability raster
/// and statistics under `<output-dir>/<project>/results/`.
///
/// Exit codes: 0 success, 2 insufficient area, 1 failure.
mod geojson;
mod geotiff;
mod layout;
mod sink;
mod source;
mod store;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use suitability_core::{
    AreaOfInterest, CriteriaSelection, Criterion, Crs, Pipeline, PipelineConfig, ProjectRequest, Rounding,
    RunOutcome, RunStatus,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::layout::ProjectLayout;
use crate::sink::DiskSink;
use crate::source::DirectorySource;
use crate::store::JsonCoverageStore;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "landsuit", version, about = "Classify land suitability inside an area of interest")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full analysis for one project.
    Run(RunArgs),
}

/// Where results are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum IoMode {
    #[default]
    Disk,
    /// Not available yet; falls back to disk.
    Db,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// GeoJSON polygon or multipolygon of the area of interest.
    #[arg(long)]
    aoi: PathBuf,

    /// Project name; defaults to the AOI file stem.
    #[arg(long)]
    project_name: Option<String>,

    /// Year of the land-cover layer.
    #[arg(long, default_value_t = 2023)]
    project_year: i32,

    /// Administrative borders GeoJSON (default: <input-dir>/admin_borders.geojson).
    #[arg(long)]
    admin_border: Option<PathBuf>,

    /// Restrict borders to features whose NAME_1 equals this value.
    #[arg(long)]
    sub_region: Option<String>,

    /// Protected areas GeoJSON (default: <input-dir>/protected_areas.geojson).
    #[arg(long)]
    protected_areas: Option<PathBuf>,

    /// Minimum remaining land in hectares.
    #[arg(long)]
    min_viable_area: Option<f64>,

    /// EPSG code of the projected output CRS.
    #[arg(long)]
    epsg: Option<u32>,

    /// floor, ceiling, round or half-up.
    #[arg(long)]
    rounding: Option<Rounding>,

    /// Comma-separated criteria, or "all".
    #[arg(long, value_delimiter = ',')]
    criteria: Vec<String>,

    /// Skip the border and protected-area checks.
    #[arg(long)]
    no_land_checks: bool,

    #[arg(long)]
    slope_low: Option<f64>,
    #[arg(long)]
    slope_high: Option<f64>,
    #[arg(long)]
    slope_medium: Option<f64>,

    #[arg(long)]
    hand_low: Option<f64>,
    #[arg(long)]
    hand_high: Option<f64>,
    #[arg(long)]
    hand_medium: Option<f64>,

    /// Land-cover codes for each band, comma separated.
    #[arg(long, value_delimiter = ',')]
    land_cover_low: Option<Vec<i32>>,
    #[arg(long, value_delimiter = ',')]
    land_cover_medium: Option<Vec<i32>>,
    #[arg(long, value_delimiter = ',')]
    land_cover_high: Option<Vec<i32>>,

    /// Output cell size in metres (default: the DEM's native resolution).
    #[arg(long)]
    resolution: Option<f64>,

    /// Do not write per-criterion rasters.
    #[arg(long)]
    no_intermediate: bool,

    /// JSON run configuration; flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = IoMode::Disk)]
    io: IoMode,

    /// Directory holding the upstream datasets.
    #[arg(long, env = "INPUT_DIR", default_value = "./input")]
    input_dir: PathBuf,

    #[arg(long, env = "OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,
}

// ── Config merge ──────────────────────────────────────────────────────────────

fn parse_criteria(values: &[String]) -> Result<Option<CriteriaSelection>> {
    if values.is_empty() {
        return Ok(None);
    }
    if values.iter().any(|v| v.trim().eq_ignore_ascii_case("all")) {
        return Ok(Some(CriteriaSelection::all()));
    }
    let criteria = values
        .iter()
        .map(|v| v.parse::<Criterion>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(CriteriaSelection::only(criteria)))
}

/// Config file (or defaults) with every given flag applied on top.
fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid config in {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(v) = args.min_viable_area {
        config.min_viable_area_ha = v;
    }
    if let Some(code) = args.epsg {
        config.output_crs = Crs::from_epsg(code);
    }
    if let Some(r) = args.rounding {
        config.rounding = r;
    }
    if let Some(sel) = parse_criteria(&args.criteria)? {
        config.criteria = sel;
    }
    if args.no_land_checks {
        config.land_checks = false;
    }
    if args.no_intermediate {
        config.keep_intermediate = false;
    }
    if args.resolution.is_some() {
        config.resolution = args.resolution;
    }

    let overrides = [
        (&mut config.slope.low_threshold, args.slope_low),
        (&mut config.slope.high_threshold, args.slope_high),
        (&mut config.slope.medium_threshold, args.slope_medium),
        (&mut config.hand.low_threshold, args.hand_low),
        (&mut config.hand.high_threshold, args.hand_high),
        (&mut config.hand.medium_threshold, args.hand_medium),
    ];
    for (field, value) in overrides {
        if let Some(v) = value {
            *field = v;
        }
    }
    for (field, value) in [
        (&mut config.land_cover.low, &args.land_cover_low),
        (&mut config.land_cover.medium, &args.land_cover_medium),
        (&mut config.land_cover.high, &args.land_cover_high),
    ] {
        if let Some(codes) = value {
            *field = codes.clone();
        }
    }

    config.validate()?;
    Ok(config)
}

fn project_name(args: &RunArgs) -> Result<String> {
    if let Some(name) = &args.project_name {
        return Ok(name.clone());
    }
    match args.aoi.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => bail!("Cannot derive a project name from {}; pass --project-name", args.aoi.display()),
    }
}

// ── Run ───────────────────────────────────────────────────────────────────────

fn run(args: RunArgs) -> Result<RunStatus> {
    let config = build_config(&args)?;
    let name = project_name(&args)?;

    let (geometry, crs) = geojson::read_polygons(&args.aoi, None)?;
    let aoi = AreaOfInterest::new(geometry, crs).with_context(|| format!("Invalid AOI in {}", args.aoi.display()))?;
    info!(project = %name, aoi = %aoi.describe(), "loaded area of interest");

    if args.io == IoMode::Db {
        warn!("database output is not available; writing to disk");
    }

    let layout = ProjectLayout::new(&args.output_dir, &name);
    layout.create_dirs()?;

    let source = DirectorySource::new(args.input_dir.clone(), layout.data_dir())
        .with_admin_border(args.admin_border.clone())
        .with_protected_areas(args.protected_areas.clone())
        .with_sub_region(args.sub_region.clone());
    let store = JsonCoverageStore::new(layout.coverage_path());
    let sink = DiskSink::new(layout.clone());

    let request = ProjectRequest { project_name: name, project_year: args.project_year, aoi };
    let mut pipeline = Pipeline::new(config, source, store, sink);
    let result = pipeline.run(&request);
    let status = RunStatus::of(&result);

    match result {
        Ok(RunOutcome::Completed { .. }) => {
            info!(results = %layout.results_dir().display(), "suitability raster and statistics written");
        }
        Ok(RunOutcome::InsufficientArea { shortfall, .. }) => {
            warn!(stats = %layout.stats_path().display(), "insufficient area: {shortfall}");
        }
        Err(e) if e.is_data_unavailable() => error!("data unavailable: {e}"),
        Err(e) => error!("analysis failed: {e}"),
    }
    Ok(status)
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "landsuit=debug,suitability_core=debug"
    } else {
        "landsuit=info,suitability_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let status = match cli.command {
        Command::Run(args) => run(args).unwrap_or_else(|e| {
            error!("{e:#}");
            RunStatus::Failure
        }),
    };
    ExitCode::from(status.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["landsuit", "run", "--aoi", "areas/chaco_north.geojson"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
        }
    }

    #[test]
    fn defaults_without_flags() {
        let args = run_args(&[]);
        assert_eq!(args.project_year, 2023);
        assert_eq!(args.io, IoMode::Disk);
        assert_eq!(project_name(&args).unwrap(), "chaco_north");
        assert_eq!(build_config(&args).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let args = run_args(&[
            "--min-viable-area", "25",
            "--rounding", "ceiling",
            "--criteria", "hand,slope",
            "--slope-medium", "8",
            "--land-cover-medium", "7,9",
            "--no-land-checks",
            "--project-name", "demo",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.min_viable_area_ha, 25.0);
        assert_eq!(config.rounding, Rounding::Ceiling);
        assert_eq!(config.criteria.criteria(), &[Criterion::Slope, Criterion::Hand]);
        assert_eq!(config.slope.medium_threshold, 8.0);
        assert_eq!(config.land_cover.medium, vec![7, 9]);
        assert!(!config.land_checks);
        assert_eq!(project_name(&args).unwrap(), "demo");
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{ "min_viable_area_ha": 10, "rounding": "round", "output_crs": 32720 }"#).unwrap();

        let path_arg = path.to_str().unwrap();
        let config = build_config(&run_args(&["--config", path_arg, "--rounding", "floor"])).unwrap();
        assert_eq!(config.min_viable_area_ha, 10.0);
        assert_eq!(config.output_crs.epsg(), 32720);
        assert_eq!(config.rounding, Rounding::Floor);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(build_config(&run_args(&["--epsg", "4326"])).is_err());
        assert!(build_config(&run_args(&["--criteria", "ndvi"])).is_err());
        assert!(build_config(&run_args(&["--slope-low", "4"])).is_err());
        assert!(Cli::try_parse_from(["landsuit", "run", "--aoi", "a.geojson", "--rounding", "up"]).is_err());
    }

    #[test]
    fn criteria_keyword_all() {
        let config = build_config(&run_args(&["--criteria", "all"])).unwrap();
        assert!(config.criteria.is_all());
    }
}
