//! Error taxonomy for the resolution engine.
//!
//! Configuration problems are fatal at load time. Everything that can go wrong
//! while resolving a single unit is scoped to that unit.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::years::Year;

/// Malformed run configuration: remap table, source registry or fill overrides.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("remap table line {line}: {message}")]
    RemapRow { line: usize, message: String },
    #[error("remap table maps {code} to {target}, but {target} is itself remapped to {next}")]
    NonIdempotentRemap { code: u8, target: u8, next: u8 },
    #[error("remap table maps {code} to both {first} and {second}")]
    ConflictingRemap { code: u8, first: u8, second: u8 },
    #[error("source {source_name:?} has an empty validity domain")]
    EmptyValidity { source_name: String },
    #[error("source {source_name:?} declares an inverted year range {first}..={last}")]
    InvertedRange {
        source_name: String,
        first: Year,
        last: Year,
    },
    #[error("source {0:?} is declared more than once")]
    DuplicateSource(String),
    #[error("fill override {index}: {message}")]
    InvalidOverride { index: usize, message: String },
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read {what} from {path:?}: {source}")]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure of a collaborator fetch (raster tile or feature attribute).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying: timeouts, throttling, interrupted reads.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    #[error("fetch failed: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Errors raised by the fill pass for a single unit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FillError {
    /// A region override points at a donor year that has no value. This is a
    /// configuration bug, not missing data.
    #[error("override for unit {unit:?} year {year} requires donor year {donor_year}, which is unresolved")]
    AmbiguousOverride {
        unit: String,
        year: Year,
        donor_year: Year,
    },
}

/// Feature store persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read feature store {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write feature store {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse feature store: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown feature {0:?}")]
    UnknownFeature(String),
    #[error("feature store was not loaded from a file")]
    NoBackingFile,
    #[error("feature {unit:?} field {field}: {message}")]
    InvalidValue {
        unit: String,
        field: String,
        message: String,
    },
}

/// Failures handing an artifact to the ingestion sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write artifact {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Anything that can stop one unit from being processed.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Fill(#[from] FillError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
