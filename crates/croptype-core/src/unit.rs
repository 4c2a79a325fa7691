//! Spatial units and the per-year values resolved for them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::provenance::Provenance;
use crate::years::Year;

/// Crop-type classification code. `0` is the unset sentinel.
pub type CropCode = u8;

pub const UNSET: CropCode = 0;

/// A tile or field polygon. Only identity and region tags are used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialUnit {
    pub id: String,
    /// Tag matched by source region filters (state code, MGRS tile or zone).
    pub region: String,
    /// Finer code matched by fill overrides (e.g. a HUC12 watershed).
    #[serde(default)]
    pub subregion: Option<String>,
}

impl SpatialUnit {
    pub fn new(id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            region: region.into(),
            subregion: None,
        }
    }

    pub fn with_subregion(mut self, subregion: impl Into<String>) -> Self {
        self.subregion = Some(subregion.into());
        self
    }

    /// An MGRS tile such as `11SKA`, tagged with its grid zone (`11S`).
    pub fn mgrs_tile(id: &str) -> Option<Self> {
        let id = id.trim().to_ascii_uppercase();
        let digits = id.bytes().take_while(u8::is_ascii_digit).count();
        let band = id[digits..].chars().next()?;
        if !(1..=2).contains(&digits) || !band.is_ascii_alphabetic() {
            return None;
        }
        let zone = id[..digits + 1].to_string();
        Some(Self::new(id, zone))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// Read from a source at its native year.
    Sourced,
    /// Read from a source at a substitute year.
    Composited,
    /// Copied from another year of the same unit.
    Filled,
}

/// The resolved crop type of one unit for one year.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedValue {
    pub code: CropCode,
    pub origin: Option<Origin>,
    pub provenance: Option<Provenance>,
}

impl ResolvedValue {
    pub fn unset() -> Self {
        Self::default()
    }

    /// A set value. Code 0 collapses to unset so an unset value can never
    /// carry an origin.
    pub fn new(code: CropCode, origin: Origin, provenance: Provenance) -> Self {
        if code == UNSET {
            return Self::unset();
        }
        Self {
            code,
            origin: Some(origin),
            provenance: Some(provenance),
        }
    }

    /// Rebuild from persisted `CROP_<year>` / `CSRC_<year>` values.
    pub fn from_persisted(year: Year, code: CropCode, provenance: &str) -> Self {
        if code == UNSET {
            return Self::unset();
        }
        match Provenance::parse(provenance) {
            Some(p) => {
                let origin = p.origin_for(year);
                Self::new(code, origin, p)
            }
            // A code without any provenance was set by hand.
            None => Self {
                code,
                origin: Some(Origin::Sourced),
                provenance: None,
            },
        }
    }

    #[inline]
    pub fn is_unset(&self) -> bool {
        self.code == UNSET
    }

    pub fn provenance_string(&self) -> String {
        self.provenance
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

/// Resolution tallies, as reported to operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginCounts {
    pub sourced: usize,
    pub composited: usize,
    pub filled: usize,
    pub unset: usize,
}

impl OriginCounts {
    pub fn add(&mut self, value: &ResolvedValue) {
        match value.origin {
            _ if value.is_unset() => self.unset += 1,
            Some(Origin::Sourced) | None => self.sourced += 1,
            Some(Origin::Composited) => self.composited += 1,
            Some(Origin::Filled) => self.filled += 1,
        }
    }

    pub fn merge(&mut self, other: &OriginCounts) {
        self.sourced += other.sourced;
        self.composited += other.composited;
        self.filled += other.filled;
        self.unset += other.unset;
    }

    pub fn total(&self) -> usize {
        self.sourced + self.composited + self.filled + self.unset
    }
}

/// All years of one unit. Years never touched read as unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub unit: SpatialUnit,
    pub years: BTreeMap<Year, ResolvedValue>,
}

impl UnitRecord {
    pub fn new(unit: SpatialUnit) -> Self {
        Self {
            unit,
            years: BTreeMap::new(),
        }
    }

    pub fn get(&self, year: Year) -> Option<&ResolvedValue> {
        self.years.get(&year).filter(|v| !v.is_unset())
    }

    pub fn code(&self, year: Year) -> CropCode {
        self.get(year).map_or(UNSET, |v| v.code)
    }

    pub fn set(&mut self, year: Year, value: ResolvedValue) {
        self.years.insert(year, value);
    }

    pub fn clear_year(&mut self, year: Year) {
        if let Some(v) = self.years.get_mut(&year) {
            *v = ResolvedValue::unset();
        }
    }

    pub fn counts(&self, years: &[Year]) -> OriginCounts {
        let mut counts = OriginCounts::default();
        let unset = ResolvedValue::unset();
        for y in years {
            counts.add(self.years.get(y).unwrap_or(&unset));
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mgrs_tiles_carry_their_grid_zone() {
        assert_eq!(SpatialUnit::mgrs_tile("11ska").unwrap().region, "11S");
        assert_eq!(SpatialUnit::mgrs_tile("4QFJ").unwrap().region, "4Q");
        assert!(SpatialUnit::mgrs_tile("SKA").is_none());
        assert!(SpatialUnit::mgrs_tile("123").is_none());
    }

    #[test]
    fn zero_code_is_always_unset() {
        let v = ResolvedValue::new(0, Origin::Sourced, Provenance::source("CDL", 2014, false));
        assert!(v.is_unset());
        assert_eq!(v.origin, None);
        assert_eq!(v.provenance_string(), "");
    }

    #[test]
    fn persisted_values_recover_origin() {
        let v = ResolvedValue::from_persisted(2011, 47, "LANDIQ/2014 - remapped annual crops");
        assert_eq!(v.origin, Some(Origin::Composited));
        let v = ResolvedValue::from_persisted(2010, 47, "CROP_2011");
        assert_eq!(v.origin, Some(Origin::Filled));
        let v = ResolvedValue::from_persisted(2010, 47, "");
        assert_eq!(v.origin, Some(Origin::Sourced));
        assert!(ResolvedValue::from_persisted(2010, 0, "CROP_2011").is_unset());
    }

    #[test]
    fn counts_include_untouched_years_as_unset() {
        let mut record = UnitRecord::new(SpatialUnit::new("f1", "NV"));
        record.set(2015, ResolvedValue::new(47, Origin::Sourced, Provenance::source("FIELDS", 2015, false)));
        record.set(2014, ResolvedValue::new(47, Origin::Filled, Provenance::field(2015, false)));
        let counts = record.counts(&[2013, 2014, 2015]);
        assert_eq!(counts, OriginCounts { sourced: 1, composited: 0, filled: 1, unset: 1 });
        assert_eq!(counts.total(), 3);
    }
}
