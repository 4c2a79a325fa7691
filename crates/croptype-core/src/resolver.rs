//! Maps a requested year onto the year a source can actually supply.

use serde::Serialize;

use crate::registry::ScopedSource;
use crate::years::Year;

/// Outcome of resolving a requested year against one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveYear {
    pub requested: Year,
    pub year: Year,
    /// Raw codes read at `year` must go through the remap table.
    pub remap_required: bool,
    /// `year != requested`.
    pub substituted: bool,
}

impl EffectiveYear {
    fn native(year: Year, remap_required: bool) -> Self {
        Self {
            requested: year,
            year,
            remap_required,
            substituted: false,
        }
    }

    fn substitute(requested: Year, year: Year) -> Self {
        Self {
            requested,
            year,
            remap_required: true,
            substituted: true,
        }
    }

    /// A later acquisition is standing in for an earlier requested year.
    pub fn is_backdated(&self) -> bool {
        self.year > self.requested
    }
}

/// Resolve `requested` against `source`.
///
/// 1. native year: itself, remap per the source's native policy
/// 2. before the earliest valid year: the earliest, remap forced
/// 3. after the latest valid year: the latest, remap forced
/// 4. inside a sparse gap: nearest earlier valid year, remap forced
///
/// `None` when the requested year is outside the source's usable bounds.
pub fn effective_year(source: &ScopedSource<'_>, requested: Year) -> Option<EffectiveYear> {
    let descriptor = source.descriptor;
    if !descriptor.usable.contains(requested) {
        return None;
    }
    let valid = &source.valid_years;
    if valid.contains(requested) {
        return Some(EffectiveYear::native(
            requested,
            descriptor.requires_remap_at(requested),
        ));
    }
    let earliest = valid.earliest()?;
    let latest = valid.latest()?;
    let year = if requested < earliest {
        earliest
    } else if requested > latest {
        latest
    } else {
        valid.nearest_earlier(requested)?
    };
    Some(EffectiveYear::substitute(requested, year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RemapPolicy, SourceDescriptor};
    use crate::years::{ValidYears, YearBounds};

    fn landiq() -> SourceDescriptor {
        let mut s = SourceDescriptor::new(
            "LANDIQ",
            ValidYears::sparse([2014, 2016, 2018, 2019, 2020, 2021, 2022, 2023]),
            1,
        );
        s.usable = YearBounds { min: Some(2009), max: None };
        s
    }

    #[test]
    fn native_year_keeps_native_policy() {
        let s = landiq();
        let e = effective_year(&s.scoped("CA"), 2016).unwrap();
        assert_eq!(e.year, 2016);
        assert!(!e.remap_required);
        assert!(!e.substituted);

        let mut always = SourceDescriptor::new("CDL_CA", ValidYears::range(2008, 2024), 2);
        always.remap = RemapPolicy::Always;
        assert!(effective_year(&always.scoped("CA"), 2010).unwrap().remap_required);

        let mut some = SourceDescriptor::new("X", ValidYears::range(2008, 2024), 2);
        some.remap = RemapPolicy::Years(vec![2012]);
        assert!(effective_year(&some.scoped("CA"), 2012).unwrap().remap_required);
        assert!(!effective_year(&some.scoped("CA"), 2013).unwrap().remap_required);
    }

    #[test]
    fn before_earliest_clamps_with_remap() {
        let s = SourceDescriptor::new("regional", ValidYears::sparse([2014]), 1);
        let e = effective_year(&s.scoped("CA"), 2011).unwrap();
        assert_eq!(e.year, 2014);
        assert!(e.remap_required);
        assert!(e.substituted);
        assert!(e.is_backdated());
    }

    #[test]
    fn after_latest_clamps_with_remap() {
        let s = landiq();
        let e = effective_year(&s.scoped("CA"), 2025).unwrap();
        assert_eq!(e.year, 2023);
        assert!(e.remap_required);
        assert!(!e.is_backdated());
    }

    #[test]
    fn sparse_gap_uses_nearest_earlier() {
        let s = landiq();
        assert_eq!(effective_year(&s.scoped("CA"), 2015).unwrap().year, 2014);
        assert_eq!(effective_year(&s.scoped("CA"), 2017).unwrap().year, 2016);
        assert!(effective_year(&s.scoped("CA"), 2017).unwrap().remap_required);
    }

    #[test]
    fn usable_bounds_exclude_source() {
        let s = landiq();
        assert!(effective_year(&s.scoped("CA"), 2008).is_none());
        assert_eq!(effective_year(&s.scoped("CA"), 2009).unwrap().year, 2014);
    }

    #[test]
    fn regional_early_years_are_native() {
        let mut cdl = SourceDescriptor::new("CDL", ValidYears::range(2008, 2024), 3);
        cdl.region_years.insert("ND".into(), (1997..=2007).collect());
        let nd = effective_year(&cdl.scoped("ND"), 2000).unwrap();
        assert_eq!(nd.year, 2000);
        assert!(!nd.remap_required);
        let nv = effective_year(&cdl.scoped("NV"), 2000).unwrap();
        assert_eq!(nv.year, 2008);
        assert!(nv.remap_required);
    }
}
