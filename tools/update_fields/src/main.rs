//! Direct resolution pass over a feature store: optionally clears the
//! requested years, then writes `CROP_<year>` / `CSRC_<year>` for every unset
//! year from the configured sources.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use croptype_core::batch::{self, BatchReport, UnitFilter};
use croptype_core::fill::ClearMode;
use croptype_core::store::JsonFeatureStore;
use croptype_core::years::{self, YEAR_MIN};
use croptype_core::EngineConfig;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "update_fields", about = "Resolve crop-type attributes for a feature store")]
struct Args {
    /// Feature store JSON document (updated in place unless --output is set).
    #[arg(short, long)]
    store: PathBuf,

    /// Write the updated store here instead of in place.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Region tags to process (e.g. "CA,NV"), or ALL.
    #[arg(short, long, default_value = "ALL", num_args = 1..)]
    regions: Vec<String>,

    /// Years to resolve, e.g. "2008-2015, 2019".
    #[arg(short, long, required = true, num_args = 1..)]
    years: Vec<String>,

    /// Clear filled and composited values for the requested years first.
    #[arg(long)]
    overwrite: bool,

    /// With --overwrite, clear sourced values too.
    #[arg(long, requires = "overwrite")]
    hard_reset: bool,

    /// Write the batch report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(report: &BatchReport) {
    eprintln!();
    eprintln!(
        "{:<12} {:>8} {:>10} {:>8} {:>8}",
        "region", "sourced", "composited", "filled", "unset"
    );
    eprintln!("{}", "-".repeat(50));
    for (region, c) in &report.by_region {
        eprintln!(
            "{:<12} {:>8} {:>10} {:>8} {:>8}",
            region, c.sourced, c.composited, c.filled, c.unset
        );
    }
    eprintln!("{}", "-".repeat(50));
    let c = &report.counts;
    eprintln!(
        "{:<12} {:>8} {:>10} {:>8} {:>8}",
        "total", c.sourced, c.composited, c.filled, c.unset
    );
    eprintln!(
        "{} units, {} cleared, {} source warnings, {} failed",
        report.units,
        report.cleared,
        report.warnings.len(),
        report.failures.len()
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
    let filter = UnitFilter::parse(&args.regions);

    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;
    let mut store = JsonFeatureStore::load(&args.store)
        .with_context(|| format!("Cannot load store {}", args.store.display()))?;

    eprintln!(
        "[update_fields] {} features, years {}-{}",
        store.len(),
        years[0],
        years[years.len() - 1]
    );

    let clear = args.overwrite.then_some(if args.hard_reset {
        ClearMode::Hard
    } else {
        ClearMode::Derived
    });
    let report = batch::update_store(&config, &mut store, &filter, &years, clear);

    let written = args.output.as_ref().unwrap_or(&args.store);
    store
        .save_to(written)
        .with_context(|| format!("Cannot write store {}", written.display()))?;
    tracing::info!(path = %written.display(), "store written");

    if let Some(path) = &args.report {
        let text = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, text).with_context(|| format!("Cannot write {}", path.display()))?;
    }

    print_summary(&report);
    if report.has_failures() {
        bail!("{} units failed", report.failures.len());
    }
    Ok(())
}
