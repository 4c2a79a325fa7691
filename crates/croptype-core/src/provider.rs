//! Collaborator interfaces: raster tiles, vector attributes, ingestion.
//!
//! The engine never talks to storage directly. Fetches go through a bounded
//! [`RetryPolicy`] and, for rasters, a run-scoped [`FetchCache`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, PoisonError, RwLock,
    },
    thread,
    time::Duration,
};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{FetchError, SinkError, StoreError};
use crate::grid::CropGrid;
use crate::provenance::{crop_field, source_field};
use crate::unit::{CropCode, ResolvedValue, SpatialUnit, UnitRecord, UNSET};
use crate::years::Year;

// ── Raster ───────────────────────────────────────────────────────────────────

pub trait RasterProvider: Send + Sync {
    /// The source's tile at `year`, or `None` when it does not exist.
    fn fetch(&self, source: &str, year: Year, tile: &str) -> Result<Option<CropGrid>, FetchError>;

    /// Unit-level tile mask. Non-zero cells are inside the unit.
    fn mask(&self, tile: &str) -> Result<Option<CropGrid>, FetchError>;
}

// ── Vector ───────────────────────────────────────────────────────────────────

pub trait FeatureStore: Send + Sync {
    fn units(&self) -> Vec<SpatialUnit>;

    fn get_attribute(&self, unit_id: &str, field: &str) -> Result<Option<Value>, FetchError>;

    /// Persist a resolved value into `CROP_<year>` and `CSRC_<year>`.
    fn set_attribute(
        &mut self,
        unit_id: &str,
        year: Year,
        value: CropCode,
        provenance: &str,
    ) -> Result<(), StoreError>;

    /// Attribute read as a crop code. Null and 0 both read as absent.
    fn raw_code(&self, unit_id: &str, field: &str) -> Result<Option<CropCode>, FetchError> {
        match self.get_attribute(unit_id, field)? {
            None => Ok(None),
            Some(value) => code_from_value(&value)
                .map(|c| Some(c).filter(|&c| c != UNSET))
                .map_err(|msg| FetchError::Permanent(format!("{unit_id} {field}: {msg}"))),
        }
    }

    /// All persisted years of one unit.
    fn load_record(&self, unit: &SpatialUnit, years: &[Year]) -> Result<UnitRecord, FetchError> {
        let mut record = UnitRecord::new(unit.clone());
        for &year in years {
            let Some(code) = self.raw_code(&unit.id, &crop_field(year))? else {
                continue;
            };
            let provenance = match self.get_attribute(&unit.id, &source_field(year))? {
                Some(Value::String(text)) => text,
                _ => String::new(),
            };
            record.set(year, ResolvedValue::from_persisted(year, code, &provenance));
        }
        Ok(record)
    }

    fn store_record(&mut self, record: &UnitRecord, years: &[Year]) -> Result<(), StoreError> {
        let unset = ResolvedValue::unset();
        for &year in years {
            let value = record.years.get(&year).unwrap_or(&unset);
            self.set_attribute(&record.unit.id, year, value.code, &value.provenance_string())?;
        }
        Ok(())
    }
}

/// Interpret a JSON attribute as a crop code. Shapefile-derived documents
/// often carry integral floats.
pub fn code_from_value(value: &Value) -> Result<CropCode, String> {
    let n = match value {
        Value::Null => return Ok(UNSET),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i,
            (None, Some(f)) if f.fract() == 0.0 => f as i64,
            _ => return Err(format!("non-integral code {n}")),
        },
        Value::String(s) if s.trim().is_empty() => return Ok(UNSET),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid code {s:?}"))?,
        other => return Err(format!("invalid code {other}")),
    };
    CropCode::try_from(n).map_err(|_| format!("code {n} outside 0..=255"))
}

// ── Ingestion ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub artifact_id: String,
    pub submitted: String,
}

pub trait IngestionSink: Send + Sync {
    /// Whether an artifact with this id was already ingested.
    fn exists(&self, _artifact_id: &str) -> bool {
        false
    }

    fn submit(
        &self,
        artifact_id: &str,
        artifact: &CropGrid,
        properties: &Map<String, Value>,
    ) -> Result<JobHandle, SinkError>;
}

// ── Retry ────────────────────────────────────────────────────────────────────

/// Bounded retry for transient collaborator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff before attempt `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(10);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Result<T, FetchError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        target: "croptype::fetch",
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

type CacheKey = (String, Year, String);

/// Run-scoped cache of fetched tiles keyed by `(source, year, tile)`.
/// Absent tiles are cached too; failures are not.
#[derive(Debug, Default)]
pub struct FetchCache {
    entries: RwLock<HashMap<CacheKey, Option<Arc<CropGrid>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_fetch<F>(
        &self,
        source: &str,
        year: Year,
        tile: &str,
        fetch: F,
    ) -> Result<Option<Arc<CropGrid>>, FetchError>
    where
        F: FnOnce() -> Result<Option<CropGrid>, FetchError>,
    {
        let key = (source.to_string(), year, tile.to_string());
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let fetched = fetch()?.map(Arc::new);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(key).or_insert(fetched).clone())
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
