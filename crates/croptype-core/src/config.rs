//! Run-scoped engine configuration.
//!
//! Everything a run needs is loaded once, validated, and passed explicitly:
//! the source registry, the remap table, fill overrides, mask predicates and
//! the fetch retry policy. Each table is embedded in the binary and may be
//! replaced by a file named in an environment variable. A replacement that
//! fails to load is fatal rather than silently falling back.

use std::{
    env,
    path::{Path, PathBuf},
};

use crate::composite::Compositor;
use crate::error::ConfigError;
use crate::fill::FillEngine;
use crate::mask::{builtin_masks, SharedMask};
use crate::overrides::FillOverrides;
use crate::provider::RetryPolicy;
use crate::registry::SourceRegistry;
use crate::remap::RemapTable;

pub const SOURCES_PATH_ENV: &str = "CROPTYPE_SOURCES_PATH";
pub const OVERRIDES_PATH_ENV: &str = "CROPTYPE_OVERRIDES_PATH";
pub const REMAP_PATH_ENV: &str = "CROPTYPE_REMAP_PATH";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub registry: SourceRegistry,
    pub remap: RemapTable,
    pub overrides: FillOverrides,
    pub masks: Vec<SharedMask>,
    pub retry: RetryPolicy,
}

/// Optional file replacements for the embedded tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPaths {
    pub sources: Option<PathBuf>,
    pub overrides: Option<PathBuf>,
    pub remap: Option<PathBuf>,
}

impl ConfigPaths {
    pub fn from_env() -> Self {
        let var = |name: &str| env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        Self {
            sources: var(SOURCES_PATH_ENV),
            overrides: var(OVERRIDES_PATH_ENV),
            remap: var(REMAP_PATH_ENV),
        }
    }
}

impl EngineConfig {
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::load(&ConfigPaths::default())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&ConfigPaths::from_env())
    }

    pub fn load(paths: &ConfigPaths) -> Result<Self, ConfigError> {
        let registry = load_table(
            "sources",
            paths.sources.as_deref(),
            SourceRegistry::from_file,
            SourceRegistry::builtin,
        )?;
        let remap = load_table(
            "remap",
            paths.remap.as_deref(),
            RemapTable::from_file,
            RemapTable::builtin,
        )?;
        let overrides = load_table(
            "overrides",
            paths.overrides.as_deref(),
            FillOverrides::from_file,
            FillOverrides::builtin,
        )?;
        tracing::debug!(
            target: "croptype::config",
            sources = registry.len(),
            remapped_codes = remap.len(),
            overrides = overrides.len(),
            "engine config ready"
        );
        Ok(Self {
            registry,
            remap,
            overrides,
            masks: builtin_masks(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_masks(mut self, masks: Vec<SharedMask>) -> Self {
        self.masks = masks;
        self
    }

    pub fn compositor(&self) -> Compositor<'_> {
        Compositor::new(self)
    }

    pub fn fill_engine(&self) -> FillEngine<'_> {
        FillEngine::new(&self.remap, &self.overrides)
    }
}

fn load_table<T>(
    what: &str,
    path: Option<&Path>,
    from_file: fn(&Path) -> Result<T, ConfigError>,
    builtin: fn() -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match path {
        Some(path) => match from_file(path) {
            Ok(table) => {
                tracing::info!(
                    target: "croptype::config",
                    path = %path.display(),
                    "{what}.loaded=file"
                );
                Ok(table)
            }
            Err(err) => {
                tracing::error!(
                    target: "croptype::config",
                    path = %path.display(),
                    error = %err,
                    "{what}.load_failed"
                );
                Err(err)
            }
        },
        None => {
            tracing::debug!(target: "croptype::config", "{what}.loaded=builtin");
            builtin()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn builtin_config_loads() {
        let config = EngineConfig::builtin().unwrap();
        assert!(config.registry.get("CDL").is_some());
        assert_eq!(config.remap.remap(1), 47);
        assert_eq!(config.overrides.len(), 3);
        assert_eq!(config.masks.len(), 2);
    }

    #[test]
    fn file_replacement_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let remap = dir.path().join("remap.csv");
        fs::write(&remap, "IN,OUT\n82,37\n87,37\n").unwrap();
        let paths = ConfigPaths {
            remap: Some(remap),
            ..Default::default()
        };
        let config = EngineConfig::load(&paths).unwrap();
        assert_eq!(config.remap.len(), 2);
        assert_eq!(config.remap.remap(1), 1);
    }

    #[test]
    fn broken_replacement_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources.json");
        fs::write(&sources, r#"{"sources":[{"name":"X","valid_years":[],"precedence":1}]}"#).unwrap();
        let paths = ConfigPaths {
            sources: Some(sources),
            ..Default::default()
        };
        assert!(matches!(
            EngineConfig::load(&paths).unwrap_err(),
            ConfigError::EmptyValidity { .. }
        ));

        let missing = ConfigPaths {
            overrides: Some(dir.path().join("nope.json")),
            ..Default::default()
        };
        assert!(matches!(
            EngineConfig::load(&missing).unwrap_err(),
            ConfigError::Read { .. }
        ));
    }
}
