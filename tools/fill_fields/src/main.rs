//! Temporal fill pass over a feature store: unset years take the value of
//! the nearest younger set year, subject to the configured fill overrides.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use croptype_core::batch::{self, BatchReport, UnitFilter};
use croptype_core::fill::FillOptions;
use croptype_core::store::JsonFeatureStore;
use croptype_core::years::{self, YEAR_MIN};
use croptype_core::EngineConfig;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "fill_fields", about = "Fill crop-type gaps from neighbouring years")]
struct Args {
    /// Feature store JSON document (updated in place unless --output is set).
    #[arg(short, long)]
    store: PathBuf,

    /// Write the updated store here instead of in place.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Region tags to process (e.g. "NM,CO"), or ALL.
    #[arg(short, long, default_value = "ALL", num_args = 1..)]
    regions: Vec<String>,

    /// Years to fill, e.g. "1997-2007".
    #[arg(short, long, required = true, num_args = 1..)]
    years: Vec<String>,

    /// Clear filled and composited values for the requested years first.
    #[arg(long)]
    overwrite: bool,

    /// With --overwrite, clear sourced values too.
    #[arg(long, requires = "overwrite")]
    hard_reset: bool,

    /// Also fill years with no younger donor from the nearest older year.
    #[arg(long)]
    forward: bool,

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
    let f = &report.fill;
    eprintln!();
    eprintln!("{:<20} {:>8}", "units", report.units);
    eprintln!("{}", "-".repeat(30));
    eprintln!("{:<20} {:>8}", "cleared", f.cleared);
    eprintln!("{:<20} {:>8}", "kept", f.kept);
    eprintln!("{:<20} {:>8}", "filled", f.filled);
    eprintln!("{:<20} {:>8}", "overridden", f.overridden);
    eprintln!("{:<20} {:>8}", "unresolved", f.unresolved);
    eprintln!("{}", "-".repeat(30));
    let c = &report.counts;
    eprintln!(
        "sourced {} / composited {} / filled {} / unset {}",
        c.sourced, c.composited, c.filled, c.unset
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
    let options = FillOptions {
        overwrite: args.overwrite,
        hard_reset: args.hard_reset,
        forward: args.forward,
    };

    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;
    let mut store = JsonFeatureStore::load(&args.store)
        .with_context(|| format!("Cannot load store {}", args.store.display()))?;
    eprintln!("[fill_fields] {} features, {} years", store.len(), years.len());

    let report = batch::fill_store(&config, &mut store, &filter, &years, &options);

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
        bail!("{} units failed, see report", report.failures.len());
    }
    Ok(())
}
