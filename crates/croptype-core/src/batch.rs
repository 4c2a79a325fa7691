//! Per-unit batch driver.
//!
//! Units are independent, so each pass maps over them in parallel (with the
//! `threading` feature) against a shared read-only configuration. Results are
//! written back in input order. A failing unit is reported and skipped; it
//! never aborts the batch.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::composite::SourceUnavailable;
use crate::config::EngineConfig;
use crate::error::UnitError;
use crate::fill::{ClearMode, FillOptions, FillSummary};
use crate::provider::{FeatureStore, FetchCache, IngestionSink, JobHandle, RasterProvider};
use crate::unit::{OriginCounts, SpatialUnit, UnitRecord};
use crate::years::{self, Year};

/// Which units of a store a pass touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFilter {
    /// `None` selects every region.
    regions: Option<Vec<String>>,
}

impl UnitFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Comma/space separated region tags. `ALL` selects everything.
    pub fn parse<S: AsRef<str>>(inputs: &[S]) -> Self {
        let mut tags: Vec<String> = inputs
            .iter()
            .flat_map(|s| {
                s.as_ref()
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .map(|t| t.trim().to_ascii_uppercase())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect();
        if tags.is_empty() || tags.iter().any(|t| t == "ALL") {
            return Self::all();
        }
        tags.sort();
        tags.dedup();
        Self { regions: Some(tags) }
    }

    pub fn matches(&self, unit: &SpatialUnit) -> bool {
        match &self.regions {
            None => true,
            Some(tags) => tags.iter().any(|t| t.eq_ignore_ascii_case(&unit.region)),
        }
    }

    pub fn regions(&self) -> Option<&[String]> {
        self.regions.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub unit: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub units: usize,
    pub counts: OriginCounts,
    pub by_region: BTreeMap<String, OriginCounts>,
    pub cleared: usize,
    pub fill: FillSummary,
    /// Work items skipped because their output already exists.
    pub skipped: usize,
    pub jobs: Vec<JobHandle>,
    pub warnings: Vec<SourceUnavailable>,
    pub failures: Vec<UnitFailure>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn add_counts(&mut self, region: &str, counts: &OriginCounts) {
        self.counts.merge(counts);
        self.by_region
            .entry(region.to_string())
            .or_default()
            .merge(counts);
    }

    fn fail(&mut self, unit: &str, err: &dyn std::fmt::Display) {
        tracing::warn!(target: "croptype::batch", unit, error = %err, "unit failed");
        self.failures.push(UnitFailure {
            unit: unit.to_string(),
            error: err.to_string(),
        });
    }
}

fn map_units<T, R, F>(items: Vec<T>, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync + Send,
{
    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        items.into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "threading"))]
    {
        items.into_iter().map(f).collect()
    }
}

struct UnitOutcome {
    record: UnitRecord,
    cleared: usize,
    fill: FillSummary,
    warnings: Vec<SourceUnavailable>,
}

fn selected_units<S: FeatureStore>(store: &S, filter: &UnitFilter) -> Vec<SpatialUnit> {
    store.units().into_iter().filter(|u| filter.matches(u)).collect()
}

/// Write successful outcomes back and fold everything into a report.
fn collect<S: FeatureStore>(
    store: &mut S,
    units: Vec<SpatialUnit>,
    outcomes: Vec<Result<UnitOutcome, UnitError>>,
    years: &[Year],
) -> BatchReport {
    let mut report = BatchReport::default();
    for (unit, outcome) in units.iter().zip(outcomes) {
        report.units += 1;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                report.fail(&unit.id, &err);
                continue;
            }
        };
        if let Err(err) = store.store_record(&outcome.record, years) {
            report.fail(&unit.id, &err);
            continue;
        }
        report.cleared += outcome.cleared;
        report.fill.merge(&outcome.fill);
        report.warnings.extend(outcome.warnings);
        report.add_counts(&unit.region, &outcome.record.counts(years));
    }
    report
}

/// Direct resolution pass over a feature store: optionally clear `years`,
/// then resolve every unset year from the configured sources.
pub fn update_store<S: FeatureStore>(
    config: &EngineConfig,
    store: &mut S,
    filter: &UnitFilter,
    years: &[Year],
    clear: Option<ClearMode>,
) -> BatchReport {
    let units = selected_units(store, filter);
    let domain: Vec<Year> = years::domain().collect();
    let compositor = config.compositor();
    let engine = config.fill_engine();
    let shared: &S = store;
    tracing::info!(target: "croptype::batch", units = units.len(), years = years.len(), "update pass");

    let outcomes = map_units(units.clone(), |unit| -> Result<UnitOutcome, UnitError> {
        let mut record = shared.load_record(&unit, &domain)?;
        let cleared = clear.map_or(0, |mode| engine.clear(&mut record, years, mode));
        let warnings = compositor.resolve_record(shared, &mut record, years);
        Ok(UnitOutcome {
            record,
            cleared,
            fill: FillSummary::default(),
            warnings,
        })
    });
    collect(store, units, outcomes, years)
}

/// Temporal fill pass over a feature store.
pub fn fill_store<S: FeatureStore>(
    config: &EngineConfig,
    store: &mut S,
    filter: &UnitFilter,
    years: &[Year],
    options: &FillOptions,
) -> BatchReport {
    let units = selected_units(store, filter);
    let domain: Vec<Year> = years::domain().collect();
    let engine = config.fill_engine();
    let shared: &S = store;
    tracing::info!(target: "croptype::batch", units = units.len(), years = years.len(), "fill pass");

    let outcomes = map_units(units.clone(), |unit| -> Result<UnitOutcome, UnitError> {
        let mut record = shared.load_record(&unit, &domain)?;
        let fill = engine.fill(&mut record, years, options)?;
        Ok(UnitOutcome {
            record,
            cleared: fill.cleared,
            fill,
            warnings: Vec::new(),
        })
    });
    collect(store, units, outcomes, years)
}

enum TileOutcome {
    Skipped,
    Submitted {
        counts: OriginCounts,
        job: JobHandle,
        warnings: Vec<SourceUnavailable>,
    },
    Failed(String),
}

/// Composite every `(tile, year)` and hand each result to the sink. Existing
/// artifacts are skipped unless `overwrite` is set.
pub fn composite_tiles(
    config: &EngineConfig,
    provider: &dyn RasterProvider,
    sink: &dyn IngestionSink,
    tiles: &[SpatialUnit],
    years: &[Year],
    overwrite: bool,
    tool: (&str, &str),
) -> BatchReport {
    let cache = FetchCache::new();
    let compositor = config.compositor();
    let work: Vec<(&SpatialUnit, Year)> = tiles
        .iter()
        .flat_map(|t| years.iter().map(move |&y| (t, y)))
        .collect();
    tracing::info!(target: "croptype::batch", tiles = tiles.len(), years = years.len(), "composite pass");

    let outcomes = map_units(work.clone(), |(tile, year)| {
        let artifact_id = format!("{}_{year}", tile.id);
        if !overwrite && sink.exists(&artifact_id) {
            tracing::debug!(target: "croptype::batch", artifact_id, "exists, skipping");
            return TileOutcome::Skipped;
        }
        let composite = match compositor.composite_tile(provider, &cache, tile, year) {
            Ok(composite) => composite,
            Err(err) => return TileOutcome::Failed(err.to_string()),
        };
        let properties = composite.properties(tool.0, tool.1);
        match sink.submit(&composite.artifact_id(), &composite.grid, &properties) {
            Ok(job) => TileOutcome::Submitted {
                counts: composite.counts,
                job,
                warnings: composite.warnings,
            },
            Err(err) => TileOutcome::Failed(err.to_string()),
        }
    });

    let mut report = BatchReport::default();
    for ((tile, year), outcome) in work.into_iter().zip(outcomes) {
        report.units += 1;
        match outcome {
            TileOutcome::Skipped => report.skipped += 1,
            TileOutcome::Submitted {
                counts,
                job,
                warnings,
            } => {
                report.add_counts(&tile.region, &counts);
                report.jobs.push(job);
                report.warnings.extend(warnings);
            }
            TileOutcome::Failed(err) => report.fail(&format!("{}_{year}", tile.id), &err),
        }
    }
    tracing::debug!(
        target: "croptype::batch",
        cache_hits = cache.hits(),
        cache_misses = cache.misses(),
        "tile cache"
    );
    report
}
