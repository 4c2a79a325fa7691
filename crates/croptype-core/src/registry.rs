//! Source descriptor registry.
//!
//! Every candidate classification source is declared once, as data: which
//! years it natively covers, which regions it applies to, when its codes need
//! remapping, and its precedence. Loaded from `data/sources.json` unless
//! `CROPTYPE_SOURCES_PATH` points elsewhere.

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resolver::{effective_year, EffectiveYear};
use crate::unit::CropCode;
use crate::years::{ValidYears, Year, YearBounds};

pub const BUILTIN_SOURCES: &str = include_str!("data/sources.json");

/// Predicate over a unit's region tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionFilter {
    #[default]
    Any,
    Only(Vec<String>),
    /// Matches tags starting with any prefix, e.g. UTM zone `"10"` covers `"10S"`.
    Prefix(Vec<String>),
    Except(Vec<String>),
}

impl RegionFilter {
    pub fn matches(&self, region: &str) -> bool {
        match self {
            RegionFilter::Any => true,
            RegionFilter::Only(tags) => tags.iter().any(|t| t.eq_ignore_ascii_case(region)),
            RegionFilter::Prefix(prefixes) => {
                let region = region.to_ascii_uppercase();
                prefixes
                    .iter()
                    .any(|p| region.starts_with(&p.to_ascii_uppercase()))
            }
            RegionFilter::Except(tags) => !tags.iter().any(|t| t.eq_ignore_ascii_case(region)),
        }
    }
}

/// Whether codes read at a native year need the remap table.
/// Substitute years always do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapPolicy {
    #[default]
    Never,
    Always,
    Years(Vec<Year>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    /// Competes for the resolved value.
    #[default]
    Primary,
    /// Only consulted by mask predicates.
    Auxiliary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub valid_years: ValidYears,
    /// Extra native years that exist only for some regions.
    #[serde(default)]
    pub region_years: BTreeMap<String, Vec<Year>>,
    #[serde(default)]
    pub regions: RegionFilter,
    #[serde(default)]
    pub remap: RemapPolicy,
    pub precedence: u32,
    /// Raw codes meaning "no data" for this source.
    #[serde(default)]
    pub nodata: Vec<CropCode>,
    /// Raw codes that are unreliable once a substitute year is used.
    #[serde(default)]
    pub ambiguous: Vec<CropCode>,
    /// Requested years outside these bounds never use this source.
    #[serde(default)]
    pub usable: YearBounds,
    #[serde(default)]
    pub field_prefix: Option<String>,
    #[serde(default)]
    pub role: SourceRole,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, valid_years: ValidYears, precedence: u32) -> Self {
        Self {
            name: name.into(),
            valid_years,
            region_years: BTreeMap::new(),
            regions: RegionFilter::Any,
            remap: RemapPolicy::Never,
            precedence,
            nodata: Vec::new(),
            ambiguous: Vec::new(),
            usable: YearBounds::default(),
            field_prefix: None,
            role: SourceRole::Primary,
        }
    }

    pub fn requires_remap_at(&self, native_year: Year) -> bool {
        match &self.remap {
            RemapPolicy::Never => false,
            RemapPolicy::Always => true,
            RemapPolicy::Years(years) => years.contains(&native_year),
        }
    }

    pub fn is_nodata(&self, code: CropCode) -> bool {
        code == 0 || self.nodata.contains(&code)
    }

    pub fn is_ambiguous(&self, code: CropCode) -> bool {
        self.ambiguous.contains(&code)
    }

    /// Feature store attribute holding this source's raw value for `year`.
    /// Prefix of this source's per-unit attributes.
    pub fn attribute_prefix(&self) -> String {
        self.field_prefix
            .clone()
            .unwrap_or_else(|| self.name.to_ascii_uppercase())
    }

    pub fn field_name(&self, year: Year) -> String {
        format!("{}_{year}", self.attribute_prefix())
    }

    /// The descriptor as seen from one region.
    pub fn scoped(&self, region: &str) -> ScopedSource<'_> {
        let extra: Vec<Year> = self
            .region_years
            .iter()
            .filter(|(tag, _)| tag.eq_ignore_ascii_case(region))
            .flat_map(|(_, years)| years.iter().copied())
            .collect();
        let valid_years = if extra.is_empty() {
            Cow::Borrowed(&self.valid_years)
        } else {
            Cow::Owned(self.valid_years.merged(&extra))
        };
        ScopedSource {
            descriptor: self,
            valid_years,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let ValidYears::Range { first, last } = self.valid_years {
            if first > last {
                return Err(ConfigError::InvertedRange {
                    source_name: self.name.clone(),
                    first,
                    last,
                });
            }
        }
        if self.valid_years.is_empty() {
            return Err(ConfigError::EmptyValidity {
                source_name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// A descriptor with its validity domain specialised to one region.
#[derive(Debug, Clone)]
pub struct ScopedSource<'a> {
    pub descriptor: &'a SourceDescriptor,
    pub valid_years: Cow<'a, ValidYears>,
}

impl ScopedSource<'_> {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn effective_year(&self, requested: Year) -> Option<EffectiveYear> {
        effective_year(self, requested)
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    sources: Vec<SourceDescriptor>,
}

/// Immutable, validated set of source descriptors ordered by precedence.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<SourceDescriptor>,
}

impl SourceRegistry {
    pub fn new(mut sources: Vec<SourceDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for source in &sources {
            source.validate()?;
            if !seen.insert(source.name.to_ascii_uppercase()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
        }
        sources.sort_by(|a, b| a.precedence.cmp(&b.precedence).then_with(|| a.name.cmp(&b.name)));
        Ok(Self { sources })
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            what: "source registry",
            source,
        })?;
        Self::new(file.sources)
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json(BUILTIN_SOURCES)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            what: "source registry",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn get(&self, name: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Primary sources applicable to `region` with an admissible effective
    /// year for `year`, ascending by precedence.
    pub fn sources_for(&self, region: &str, year: Year) -> Vec<ScopedSource<'_>> {
        self.sources
            .iter()
            .filter(|s| s.role == SourceRole::Primary && s.regions.matches(region))
            .map(|s| s.scoped(region))
            .filter(|s| s.effective_year(year).is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SourceRegistry {
        let mut regional = SourceDescriptor::new("regional", ValidYears::sparse([2014]), 1);
        regional.regions = RegionFilter::Only(vec!["CA".into()]);
        let national = SourceDescriptor::new("national", ValidYears::range(2008, 2020), 2);
        let fields = SourceDescriptor::new("fields", ValidYears::range(2016, 2020), 0);
        SourceRegistry::new(vec![national, regional, fields]).unwrap()
    }

    #[test]
    fn sources_sorted_by_precedence_and_filtered_by_region() {
        let reg = registry();
        let names: Vec<_> = reg.sources_for("CA", 2018).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["fields", "regional", "national"]);
        let names: Vec<_> = reg.sources_for("NV", 2018).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["fields", "national"]);
    }

    #[test]
    fn region_filters() {
        assert!(RegionFilter::Prefix(vec!["10".into()]).matches("10S"));
        assert!(!RegionFilter::Prefix(vec!["10".into()]).matches("11S"));
        assert!(RegionFilter::Only(vec!["ca".into()]).matches("CA"));
        assert!(!RegionFilter::Except(vec!["ID".into()]).matches("ID"));
        assert!(RegionFilter::Any.matches("anything"));
    }

    #[test]
    fn empty_validity_is_a_config_error() {
        let bad = SourceDescriptor::new("empty", ValidYears::sparse([]), 1);
        assert!(matches!(
            SourceRegistry::new(vec![bad]).unwrap_err(),
            ConfigError::EmptyValidity { .. }
        ));
        let inverted = SourceDescriptor::new("inv", ValidYears::range(2010, 2008), 1);
        assert!(matches!(
            SourceRegistry::new(vec![inverted]).unwrap_err(),
            ConfigError::InvertedRange { .. }
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let a = SourceDescriptor::new("CDL", ValidYears::range(2008, 2010), 1);
        let b = SourceDescriptor::new("cdl", ValidYears::range(2008, 2010), 2);
        assert!(matches!(
            SourceRegistry::new(vec![a, b]).unwrap_err(),
            ConfigError::DuplicateSource(_)
        ));
    }

    #[test]
    fn region_years_extend_native_domain() {
        let mut cdl = SourceDescriptor::new("CDL", ValidYears::range(2008, 2024), 3);
        cdl.region_years.insert("ND".into(), (1997..=2007).collect());
        let nd = cdl.scoped("ND");
        assert!(nd.valid_years.contains(1997));
        let ca = cdl.scoped("CA");
        assert!(!ca.valid_years.contains(2007));
    }

    #[test]
    fn builtin_registry_loads() {
        let reg = SourceRegistry::builtin().unwrap();
        assert!(reg.get("CDL").is_some());
        assert!(reg.get("LANDIQ").is_some());
        let ca: Vec<_> = reg.sources_for("CA", 2016).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(ca.first().map(String::as_str), Some("FIELDS"));
        assert!(ca.contains(&"LANDIQ".to_string()));
        // Auxiliary land cover never competes for the value.
        assert!(!ca.contains(&"NLCD".to_string()));
    }

    #[test]
    fn field_name_uses_prefix() {
        let mut s = SourceDescriptor::new("landiq", ValidYears::range(2014, 2014), 1);
        assert_eq!(s.field_name(2014), "LANDIQ_2014");
        s.field_prefix = Some("LIQ".into());
        assert_eq!(s.field_name(2014), "LIQ_2014");
    }
}
