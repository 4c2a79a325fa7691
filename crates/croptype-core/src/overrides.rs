//! Region-scoped fill overrides.
//!
//! Some areas have known-bad imagery for specific years. An override pins
//! those years to a designated donor year of the same unit, or to a constant.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::unit::{CropCode, SpatialUnit, UNSET};
use crate::years::Year;

pub const BUILTIN_OVERRIDES: &str = include_str!("data/fill_overrides.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    Donor {
        year: Year,
        /// Skip the remap when the year before the target already carries
        /// the donor's code.
        #[serde(default)]
        keep_when_bracketed: bool,
    },
    /// Fixed code, recorded with `DEFAULT` provenance.
    Constant { code: CropCode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillOverride {
    pub name: String,
    /// Region tags the rule applies to. Empty matches every region.
    #[serde(default)]
    pub regions: Vec<String>,
    /// Subregion code prefixes. Empty matches any subregion, including none.
    #[serde(default)]
    pub subregion_prefixes: Vec<String>,
    pub first: Year,
    pub last: Year,
    pub action: OverrideAction,
    /// Apply even when the year already holds a value.
    #[serde(default)]
    pub replace_existing: bool,
}

impl FillOverride {
    pub fn matches(&self, unit: &SpatialUnit, year: Year) -> bool {
        if !(self.first..=self.last).contains(&year) {
            return false;
        }
        if !self.regions.is_empty()
            && !self.regions.iter().any(|r| r.eq_ignore_ascii_case(&unit.region))
        {
            return false;
        }
        if self.subregion_prefixes.is_empty() {
            return true;
        }
        match &unit.subregion {
            Some(sub) => self.subregion_prefixes.iter().any(|p| sub.starts_with(p.as_str())),
            None => false,
        }
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidOverride { index, message };
        if self.first > self.last {
            return Err(invalid(format!(
                "{}: inverted year range {}..={}",
                self.name, self.first, self.last
            )));
        }
        match self.action {
            OverrideAction::Donor { year, .. } if (self.first..=self.last).contains(&year) => {
                Err(invalid(format!("{}: donor year {year} lies inside its own range", self.name)))
            }
            OverrideAction::Constant { code: UNSET } => {
                Err(invalid(format!("{}: constant code 0 means unset", self.name)))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OverridesFile {
    overrides: Vec<FillOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillOverrides {
    rules: Vec<FillOverride>,
}

impl FillOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(rules: Vec<FillOverride>) -> Result<Self, ConfigError> {
        for (i, rule) in rules.iter().enumerate() {
            rule.validate(i)?;
        }
        Ok(Self { rules })
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: OverridesFile = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            what: "fill overrides",
            source,
        })?;
        Self::new(file.overrides)
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json(BUILTIN_OVERRIDES)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            what: "fill overrides",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// First rule covering `(unit, year)`, in declaration order.
    pub fn matching(&self, unit: &SpatialUnit, year: Year) -> Option<&FillOverride> {
        self.rules.iter().find(|r| r.matches(unit, year))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_load() {
        let rules = FillOverrides::builtin().unwrap();
        assert_eq!(rules.len(), 3);

        let nm = SpatialUnit::new("nm1", "NM").with_subregion("140801010101");
        let rule = rules.matching(&nm, 2009).unwrap();
        assert!(matches!(rule.action, OverrideAction::Donor { year: 2011, .. }));
        assert!(rules.matching(&nm, 2011).is_none());

        let nm_other = SpatialUnit::new("nm2", "NM").with_subregion("130301");
        assert!(rules.matching(&nm_other, 2009).is_none());

        let mx = SpatialUnit::new("mx1", "MX");
        assert!(matches!(
            rules.matching(&mx, 2015).unwrap().action,
            OverrideAction::Constant { code: 47 }
        ));
    }

    #[test]
    fn subregion_required_when_prefixes_given() {
        let rules = FillOverrides::builtin().unwrap();
        let co = SpatialUnit::new("co1", "CO");
        assert!(rules.matching(&co, 2009).is_none());
        let co = co.with_subregion("130201000000");
        assert!(rules.matching(&co, 2009).is_some());
    }

    #[test]
    fn donor_inside_range_rejected() {
        let text = r#"{"overrides":[{"name":"bad","first":2008,"last":2011,
            "action":{"donor":{"year":2010}}}]}"#;
        assert!(matches!(
            FillOverrides::from_json(text).unwrap_err(),
            ConfigError::InvalidOverride { index: 0, .. }
        ));
    }

    #[test]
    fn zero_constant_rejected() {
        let text = r#"{"overrides":[{"name":"bad","first":2008,"last":2011,
            "action":{"constant":{"code":0}}}]}"#;
        assert!(FillOverrides::from_json(text).is_err());
    }
}
