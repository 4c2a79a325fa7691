//! Raster compositing: builds one crop-type grid per `(tile, year)` from a
//! directory of source rasters and submits each to the output sink with its
//! resolution metadata.

use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use croptype_core::batch::{self, BatchReport};
use croptype_core::raster::DirRasterProvider;
use croptype_core::sink::DirectorySink;
use croptype_core::years::{self, YEAR_MIN};
use croptype_core::{EngineConfig, SpatialUnit};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "composite_tiles", about = "Composite crop-type rasters per tile and year")]
struct Args {
    /// Raster root: <root>/<source>/<year>/<tile>.json, masks in <root>/mask/.
    #[arg(long)]
    raster_root: PathBuf,

    /// Output directory for artifacts and their properties.
    #[arg(short, long, default_value = "data/composites")]
    out: PathBuf,

    /// MGRS tile ids, e.g. "11SKA 10SEG".
    #[arg(short, long, num_args = 1..)]
    tiles: Vec<String>,

    /// JSON list of tiles: [{"id": "...", "region": "..."}].
    #[arg(long)]
    tile_list: Option<PathBuf>,

    /// Years to composite, e.g. "2008-2015".
    #[arg(short, long, required = true, num_args = 1..)]
    years: Vec<String>,

    /// Rebuild artifacts that already exist.
    #[arg(long)]
    overwrite: bool,

    /// Write the batch report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    debug: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TileList {
    Units(Vec<SpatialUnit>),
    Wrapped { tiles: Vec<SpatialUnit> },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn collect_tiles(args: &Args) -> Result<Vec<SpatialUnit>> {
    let mut tiles = Vec::new();
    for raw in args.tiles.iter().flat_map(|t| t.split(',')).map(str::trim) {
        if raw.is_empty() {
            continue;
        }
        match SpatialUnit::mgrs_tile(raw) {
            Some(tile) => tiles.push(tile),
            None => bail!("Not an MGRS tile id: {raw:?}"),
        }
    }
    if let Some(path) = &args.tile_list {
        let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
        let list: TileList = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse tile list {}", path.display()))?;
        tiles.extend(match list {
            TileList::Units(units) | TileList::Wrapped { tiles: units } => units,
        });
    }
    tiles.sort_by(|a, b| a.id.cmp(&b.id));
    tiles.dedup_by(|a, b| a.id == b.id);
    Ok(tiles)
}

fn print_summary(report: &BatchReport) {
    eprintln!();
    eprintln!(
        "{:<8} {:>10} {:>10} {:>10}",
        "zone", "sourced", "composited", "unset"
    );
    eprintln!("{}", "-".repeat(41));
    for (zone, c) in &report.by_region {
        eprintln!(
            "{:<8} {:>10} {:>10} {:>10}",
            zone, c.sourced, c.composited, c.unset
        );
    }
    eprintln!("{}", "-".repeat(41));
    eprintln!(
        "{} submitted, {} skipped (exist), {} failed, {} source warnings",
        report.jobs.len(),
        report.skipped,
        report.failures.len(),
        report.warnings.len()
    );
    for failure in &report.failures {
        eprintln!("  [fail] {}: {}", failure.unit, failure.error);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let years = years::parse_year_ranges(&args.years, YEAR_MIN, years::year_max())
        .map_err(anyhow::Error::msg)
        .context("Invalid --years")?;
    if years.is_empty() {
        bail!("No years in range {}-{}", YEAR_MIN, years::year_max());
    }
    let tiles = collect_tiles(&args)?;
    if tiles.is_empty() {
        bail!("No tiles given (use --tiles or --tile-list)");
    }

    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;
    let provider = DirRasterProvider::new(&args.raster_root);
    let sink = DirectorySink::new(&args.out)
        .with_context(|| format!("Cannot create output directory {}", args.out.display()))?;

    eprintln!(
        "[composite_tiles] {} tiles x {} years -> {}",
        tiles.len(),
        years.len(),
        args.out.display()
    );
    let report = batch::composite_tiles(
        &config,
        &provider,
        &sink,
        &tiles,
        &years,
        args.overwrite,
        (env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
    );

    if let Some(path) = &args.report {
        let text = serde_json::to_string_pretty(&report)?;
        fs::write(path, text).with_context(|| format!("Cannot write {}", path.display()))?;
    }

    print_summary(&report);
    if report.has_failures() {
        bail!("{} tile-years failed", report.failures.len());
    }
    tracing::info!(submitted = report.jobs.len(), "done");
    Ok(())
}
