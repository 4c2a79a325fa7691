//! Temporal fill: propagate resolved values into unset years of the same unit.
//!
//! Years are walked newest to oldest so each fill only depends on years that
//! were already settled. Copies always name the first donor, never an
//! intermediate hop, and pass through the remap table exactly once.

use serde::Serialize;

use crate::error::FillError;
use crate::overrides::{FillOverride, FillOverrides, OverrideAction};
use crate::provenance::Provenance;
use crate::remap::RemapTable;
use crate::unit::{Origin, ResolvedValue, UnitRecord};
use crate::years::Year;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillOptions {
    /// Clear derived values in the target years before filling.
    pub overwrite: bool,
    /// With `overwrite`, also clear sourced values.
    pub hard_reset: bool,
    /// After the backward pass, fill remaining years from older values.
    pub forward: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// Filled and composited values.
    Derived,
    /// Everything.
    Hard,
}

impl ClearMode {
    fn clears(self, value: &ResolvedValue) -> bool {
        match self {
            ClearMode::Hard => !value.is_unset(),
            ClearMode::Derived => matches!(value.origin, Some(Origin::Filled | Origin::Composited)),
        }
    }
}

/// Per-unit tallies of one fill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FillSummary {
    pub cleared: usize,
    pub kept: usize,
    pub filled: usize,
    pub overridden: usize,
    pub unresolved: usize,
}

impl FillSummary {
    pub fn merge(&mut self, other: &FillSummary) {
        self.cleared += other.cleared;
        self.kept += other.kept;
        self.filled += other.filled;
        self.overridden += other.overridden;
        self.unresolved += other.unresolved;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FillEngine<'a> {
    remap: &'a RemapTable,
    overrides: &'a FillOverrides,
}

impl<'a> FillEngine<'a> {
    pub fn new(remap: &'a RemapTable, overrides: &'a FillOverrides) -> Self {
        Self { remap, overrides }
    }

    /// Reset values in `years` to unset. Returns how many were cleared.
    pub fn clear(&self, record: &mut UnitRecord, years: &[Year], mode: ClearMode) -> usize {
        let mut cleared = 0;
        for year in years {
            if let Some(value) = record.years.get_mut(year) {
                if mode.clears(value) {
                    *value = ResolvedValue::unset();
                    cleared += 1;
                }
            }
        }
        cleared
    }

    pub fn fill(
        &self,
        record: &mut UnitRecord,
        years: &[Year],
        options: &FillOptions,
    ) -> Result<FillSummary, FillError> {
        let mut summary = FillSummary::default();
        let mut order: Vec<Year> = years.to_vec();
        order.sort_unstable();
        order.dedup();

        if options.overwrite {
            let mode = if options.hard_reset {
                ClearMode::Hard
            } else {
                ClearMode::Derived
            };
            summary.cleared = self.clear(record, &order, mode);
        }

        for &year in order.iter().rev() {
            let existing = record.get(year).is_some();
            if let Some(rule) = self.overrides.matching(&record.unit, year) {
                if !existing || rule.replace_existing {
                    let value = self.apply_override(record, year, rule)?;
                    tracing::trace!(
                        target: "croptype::fill",
                        unit = %record.unit.id,
                        year,
                        rule = %rule.name,
                        "override"
                    );
                    record.set(year, value);
                    summary.overridden += 1;
                    continue;
                }
            }
            if existing {
                summary.kept += 1;
                continue;
            }
            let donor = record
                .years
                .range(year + 1..)
                .find(|(_, v)| !v.is_unset())
                .map(|(&y, v)| (y, v.clone()));
            match donor {
                Some((donor_year, donor)) => {
                    record.set(year, self.copy_value(donor_year, &donor, false));
                    summary.filled += 1;
                }
                None if !options.forward => summary.unresolved += 1,
                None => {}
            }
        }

        if options.forward {
            for &year in &order {
                if record.get(year).is_some() {
                    continue;
                }
                let donor = record
                    .years
                    .range(..year)
                    .rev()
                    .find(|(_, v)| !v.is_unset())
                    .map(|(&y, v)| (y, v.clone()));
                match donor {
                    Some((donor_year, donor)) => {
                        record.set(year, self.copy_value(donor_year, &donor, false));
                        summary.filled += 1;
                    }
                    None => summary.unresolved += 1,
                }
            }
        }

        Ok(summary)
    }

    fn apply_override(
        &self,
        record: &UnitRecord,
        year: Year,
        rule: &FillOverride,
    ) -> Result<ResolvedValue, FillError> {
        match rule.action {
            OverrideAction::Constant { code } => Ok(ResolvedValue::new(
                code,
                Origin::Sourced,
                Provenance::default_constant(),
            )),
            OverrideAction::Donor {
                year: donor_year,
                keep_when_bracketed,
            } => {
                let donor = record
                    .get(donor_year)
                    .ok_or_else(|| FillError::AmbiguousOverride {
                        unit: record.unit.id.clone(),
                        year,
                        donor_year,
                    })?;
                let bracketed = keep_when_bracketed && record.code(year - 1) == donor.code;
                Ok(self.copy_value(donor_year, donor, bracketed))
            }
        }
    }

    /// A copy of `donor` (stored under `donor_year`) as a filled value.
    fn copy_value(&self, donor_year: Year, donor: &ResolvedValue, skip_remap: bool) -> ResolvedValue {
        let provenance = match &donor.provenance {
            Some(p) => p.copied_from(donor_year),
            None => Provenance::field(donor_year, false),
        };
        if !skip_remap && !provenance.remapped && self.remap.is_remapped(donor.code) {
            return ResolvedValue::new(
                self.remap.remap(donor.code),
                Origin::Filled,
                provenance.with_remap(),
            );
        }
        ResolvedValue::new(donor.code, Origin::Filled, provenance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::SpatialUnit;

    fn engine_parts() -> (RemapTable, FillOverrides) {
        (RemapTable::builtin().unwrap(), FillOverrides::none())
    }

    fn sourced(record: &mut UnitRecord, year: Year, code: u8, source: &str) {
        record.set(
            year,
            ResolvedValue::new(code, Origin::Sourced, Provenance::source(source, year, false)),
        );
    }

    fn prov(record: &UnitRecord, year: Year) -> String {
        record.years.get(&year).map(|v| v.provenance_string()).unwrap_or_default()
    }

    #[test]
    fn backward_fill_from_single_sourced_year() {
        let (remap, overrides) = engine_parts();
        let engine = FillEngine::new(&remap, &overrides);
        let mut record = UnitRecord::new(SpatialUnit::new("f1", "NV"));
        sourced(&mut record, 2015, 47, "FIELDS");

        let years: Vec<Year> = (2010..=2020).collect();
        let summary = engine.fill(&mut record, &years, &FillOptions::default()).unwrap();

        for y in 2016..=2020 {
            assert!(record.get(y).is_none(), "year {y} has no younger donor");
        }
        for y in 2010..=2014 {
            assert_eq!(record.code(y), 47);
            assert_eq!(prov(&record, y), "CROP_2015");
            assert_eq!(record.get(y).unwrap().origin, Some(Origin::Filled));
        }
        assert_eq!(summary.filled, 5);
        assert_eq!(summary.kept, 1);
        assert_eq!(summary.unresolved, 5);
    }

    #[test]
    fn chains_flatten_and_remap_once() {
        let (remap, overrides) = engine_parts();
        let engine = FillEngine::new(&remap, &overrides);
        let mut record = UnitRecord::new(SpatialUnit::new("f1", "ND"));
        // Corn, a remappable annual crop.
        sourced(&mut record, 2010, 1, "CDL");

        let years: Vec<Year> = (2000..=2010).collect();
        engine.fill(&mut record, &years, &FillOptions::default()).unwrap();
        assert_eq!(record.code(2010), 1);
        for y in 2000..=2009 {
            assert_eq!(record.code(y), 47);
            assert_eq!(prov(&record, y), "CROP_2010 - remapped annual crops");
        }
    }

    #[test]
    fn remapped_source_provenance_is_carried() {
        let (remap, overrides) = engine_parts();
        let engine = FillEngine::new(&remap, &overrides);
        let mut record = UnitRecord::new(SpatialUnit::new("f1", "CA"));
        record.set(
            2009,
            ResolvedValue::new(47, Origin::Composited, Provenance::source("LANDIQ", 2014, true)),
        );
        engine.fill(&mut record, &[2008], &FillOptions::default()).unwrap();
        assert_eq!(prov(&record, 2008), "CROP_2009 - remapped annual crops");
    }

    #[test]
    fn rerun_without_overwrite_is_stable() {
        let (remap, overrides) = engine_parts();
        let engine = FillEngine::new(&remap, &overrides);
        let mut record = UnitRecord::new(SpatialUnit::new("f1", "ND"));
        sourced(&mut record, 2012, 5, "CDL");
        sourced(&mut record, 2008, 36, "CDL");
        let years: Vec<Year> = (2000..=2014).collect();

        engine.fill(&mut record, &years, &FillOptions::default()).unwrap();
        let first = record.clone();
        let summary = engine.fill(&mut record, &years, &FillOptions::default()).unwrap();
        assert_eq!(record, first);
        assert_eq!(summary.filled, 0);
    }

    #[test]
    fn overwrite_clears_derived_but_keeps_sourced() {
        let (remap, overrides) = engine_parts();
        let engine = FillEngine::new(&remap, &overrides);
        let mut record = UnitRecord::new(SpatialUnit::new("f1", "ND"));
        sourced(&mut record, 2012, 36, "CDL");
        record.set(2011, ResolvedValue::new(99, Origin::Filled, Provenance::field(2013, false)));
        record.set(2010, ResolvedValue::new(98, Origin::Composited, Provenance::source("CDL", 2008, true)));

        let opts = FillOptions { overwrite: true, ..Default::default() };
        let summary = engine.fill(&mut record, &[2010, 2011, 2012], &opts).unwrap();
        assert_eq!(summary.cleared, 2);
        assert_eq!(record.code(2011), 36);
        assert_eq!(record.code(2010), 36);
        assert_eq!(prov(&record, 2010), "CROP_2012");

        let opts = FillOptions { overwrite: true, hard_reset: true, forward: false };
        engine.fill(&mut record, &[2010, 2011, 2012], &opts).unwrap();
        assert!(record.get(2012).is_none());
        assert!(record.get(2010).is_none());
    }

    #[test]
    fn forward_fill_is_opt_in() {
        let (remap, overrides) = engine_parts();
        let engine = FillEngine::new(&remap, &overrides);
        let mut record = UnitRecord::new(SpatialUnit::new("f1", "NV"));
        sourced(&mut record, 2015, 36, "FIELDS");
        let years: Vec<Year> = (2014..=2017).collect();
        let opts = FillOptions { forward: true, ..Default::default() };
        let summary = engine.fill(&mut record, &years, &opts).unwrap();
        assert_eq!(record.code(2017), 36);
        assert_eq!(prov(&record, 2017), "CROP_2015");
        assert_eq!(prov(&record, 2014), "CROP_2015");
        assert_eq!(summary.unresolved, 0);
    }

    #[test]
    fn donor_override_replaces_and_remaps() {
        let remap = RemapTable::builtin().unwrap();
        let overrides = FillOverrides::builtin().unwrap();
        let engine = FillEngine::new(&remap, &overrides);
        let unit = SpatialUnit::new("nm1", "NM").with_subregion("1408");
        let mut record = UnitRecord::new(unit);
        sourced(&mut record, 2011, 1, "CDL");
        sourced(&mut record, 2009, 36, "CDL");

        let summary = engine.fill(&mut record, &[2008, 2009, 2010], &FillOptions::default()).unwrap();
        assert_eq!(summary.overridden, 3);
        for y in 2008..=2010 {
            assert_eq!(record.code(y), 47);
            assert_eq!(prov(&record, y), "CROP_2011 - remapped annual crops");
        }
    }

    #[test]
    fn bracketed_donor_skips_remap() {
        let remap = RemapTable::builtin().unwrap();
        let overrides = FillOverrides::builtin().unwrap();
        let engine = FillEngine::new(&remap, &overrides);
        let unit = SpatialUnit::new("co1", "CO").with_subregion("130100001");
        let mut record = UnitRecord::new(unit);
        sourced(&mut record, 2008, 1, "CDL");
        sourced(&mut record, 2010, 1, "CDL");
        engine.fill(&mut record, &[2009], &FillOptions::default()).unwrap();
        assert_eq!(record.code(2009), 1);
        assert_eq!(prov(&record, 2009), "CROP_2010");

        sourced(&mut record, 2008, 5, "CDL");
        engine.fill(&mut record, &[2009], &FillOptions::default()).unwrap();
        assert_eq!(record.code(2009), 47);
        assert_eq!(prov(&record, 2009), "CROP_2010 - remapped annual crops");
    }

    #[test]
    fn unresolved_override_donor_is_an_error() {
        let remap = RemapTable::builtin().unwrap();
        let overrides = FillOverrides::builtin().unwrap();
        let engine = FillEngine::new(&remap, &overrides);
        let unit = SpatialUnit::new("nm1", "NM").with_subregion("14");
        let mut record = UnitRecord::new(unit);
        let err = engine.fill(&mut record, &[2009], &FillOptions::default()).unwrap_err();
        assert_eq!(
            err,
            FillError::AmbiguousOverride { unit: "nm1".into(), year: 2009, donor_year: 2011 }
        );
    }

    #[test]
    fn constant_override_sets_default() {
        let remap = RemapTable::builtin().unwrap();
        let overrides = FillOverrides::builtin().unwrap();
        let engine = FillEngine::new(&remap, &overrides);
        let mut record = UnitRecord::new(SpatialUnit::new("mx1", "MX"));
        engine.fill(&mut record, &[2015], &FillOptions::default()).unwrap();
        assert_eq!(record.code(2015), 47);
        assert_eq!(prov(&record, 2015), "DEFAULT");
        assert_eq!(record.get(2015).unwrap().origin, Some(Origin::Sourced));
    }
}
