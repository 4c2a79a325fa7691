//! Per-value masking applied to raw source codes before remapping.
//!
//! Each source's own `nodata` and `ambiguous` codes are always honoured.
//! Anything else is a [`MaskPredicate`], so cross-references against other
//! layers or per-unit statistics can be swapped without touching the
//! compositor.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::registry::SourceDescriptor;
use crate::resolver::EffectiveYear;
use crate::unit::{CropCode, UNSET};
use crate::years::Year;

/// Numeric attribute of the current unit. Always `None` on the raster path.
pub type AttributeLookup<'a> = &'a dyn Fn(&str) -> Option<f64>;

/// What a predicate sees besides the raw code.
#[derive(Clone, Copy)]
pub struct MaskContext<'a> {
    pub source: &'a SourceDescriptor,
    pub effective: &'a EffectiveYear,
    /// Value of the predicate's auxiliary layer for the same unit, if it has one.
    pub aux: Option<CropCode>,
    pub attribute: AttributeLookup<'a>,
}

impl fmt::Debug for MaskContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskContext")
            .field("source", &self.source.name)
            .field("effective", self.effective)
            .field("aux", &self.aux)
            .finish_non_exhaustive()
    }
}

pub trait MaskPredicate: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn applies_to(&self, source: &str) -> bool;

    /// Registry name of the auxiliary layer this predicate reads.
    fn auxiliary(&self) -> Option<&str> {
        None
    }

    /// The code to keep (possibly replaced), or `None` to mask it out.
    fn apply(&self, ctx: &MaskContext<'_>, code: CropCode) -> Option<CropCode>;
}

pub type SharedMask = Arc<dyn MaskPredicate>;

/// Replace `from` with `to` when the auxiliary land-cover layer reports one
/// of `classes` for the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandCoverReclass {
    pub sources: Vec<String>,
    pub auxiliary: String,
    pub from: CropCode,
    pub to: CropCode,
    pub classes: Vec<CropCode>,
}

impl LandCoverReclass {
    /// Grassland/pasture (176) becomes other hay (37) over pasture or
    /// cultivated land cover (81/82).
    pub fn pasture_to_hay() -> Self {
        Self {
            sources: vec!["CDL".into(), "CDL_CA".into()],
            auxiliary: "NLCD".into(),
            from: 176,
            to: 37,
            classes: vec![81, 82],
        }
    }
}

impl MaskPredicate for LandCoverReclass {
    fn name(&self) -> &str {
        "land_cover_reclass"
    }

    fn applies_to(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s.eq_ignore_ascii_case(source))
    }

    fn auxiliary(&self) -> Option<&str> {
        Some(&self.auxiliary)
    }

    fn apply(&self, ctx: &MaskContext<'_>, code: CropCode) -> Option<CropCode> {
        match ctx.aux {
            Some(class) if code == self.from && self.classes.contains(&class) => Some(self.to),
            _ => Some(code),
        }
    }
}

/// Drop a source's value for a unit when too little of the unit was
/// observed. Reads `<PREFIX>_PIXEL_COUNT_<year>` and `<PREFIX>_PIXEL_TOTAL_<year>`
/// at the effective year; units without both attributes are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageThreshold {
    pub sources: Vec<String>,
    pub min_fraction: f64,
}

impl CoverageThreshold {
    pub fn landiq_half() -> Self {
        Self {
            sources: vec!["LANDIQ".into()],
            min_fraction: 0.5,
        }
    }

    pub fn count_field(prefix: &str, year: Year) -> String {
        format!("{prefix}_PIXEL_COUNT_{year}")
    }

    pub fn total_field(prefix: &str, year: Year) -> String {
        format!("{prefix}_PIXEL_TOTAL_{year}")
    }
}

impl MaskPredicate for CoverageThreshold {
    fn name(&self) -> &str {
        "coverage_threshold"
    }

    fn applies_to(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s.eq_ignore_ascii_case(source))
    }

    fn apply(&self, ctx: &MaskContext<'_>, code: CropCode) -> Option<CropCode> {
        let prefix = ctx.source.attribute_prefix();
        let year = ctx.effective.year;
        let count = (ctx.attribute)(&Self::count_field(&prefix, year));
        let total = (ctx.attribute)(&Self::total_field(&prefix, year));
        match (count, total) {
            (Some(_), Some(total)) if total <= 0.0 => None,
            (Some(count), Some(total)) if count / total < self.min_fraction => None,
            _ => Some(code),
        }
    }
}

pub fn builtin_masks() -> Vec<SharedMask> {
    vec![
        Arc::new(LandCoverReclass::pasture_to_hay()),
        Arc::new(CoverageThreshold::landiq_half()),
    ]
}

/// Run the descriptor's own masks and every applicable predicate over a raw
/// code. `aux` looks up a named auxiliary layer for the current unit.
pub fn apply_masks<F>(
    descriptor: &SourceDescriptor,
    effective: &EffectiveYear,
    masks: &[SharedMask],
    raw: CropCode,
    aux: F,
) -> Option<CropCode>
where
    F: FnMut(&str) -> Option<CropCode>,
{
    apply_masks_with(descriptor, effective, masks, raw, aux, &|_: &str| None)
}

/// [`apply_masks`] with access to the unit's numeric attributes.
pub fn apply_masks_with<F>(
    descriptor: &SourceDescriptor,
    effective: &EffectiveYear,
    masks: &[SharedMask],
    raw: CropCode,
    mut aux: F,
    attribute: AttributeLookup<'_>,
) -> Option<CropCode>
where
    F: FnMut(&str) -> Option<CropCode>,
{
    if descriptor.is_nodata(raw) {
        return None;
    }
    if effective.is_backdated() && descriptor.is_ambiguous(raw) {
        return None;
    }
    let mut code = raw;
    for mask in masks.iter().filter(|m| m.applies_to(&descriptor.name)) {
        let ctx = MaskContext {
            source: descriptor,
            effective,
            aux: mask.auxiliary().and_then(&mut aux),
            attribute,
        };
        code = mask.apply(&ctx, code)?;
        if code == UNSET {
            return None;
        }
    }
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceDescriptor;
    use crate::years::ValidYears;

    fn native(year: i32) -> EffectiveYear {
        SourceDescriptor::new("X", ValidYears::range(2008, 2024), 0)
            .scoped("NV")
            .effective_year(year)
            .unwrap()
    }

    #[test]
    fn nodata_is_masked() {
        let mut cdl = SourceDescriptor::new("CDL", ValidYears::range(2008, 2024), 3);
        cdl.nodata = vec![81];
        let e = native(2010);
        assert_eq!(apply_masks(&cdl, &e, &[], 81, |_| None), None);
        assert_eq!(apply_masks(&cdl, &e, &[], 0, |_| None), None);
        assert_eq!(apply_masks(&cdl, &e, &[], 1, |_| None), Some(1));
    }

    #[test]
    fn ambiguous_masked_only_when_backdated() {
        let mut liq = SourceDescriptor::new("LANDIQ", ValidYears::sparse([2014, 2016]), 1);
        liq.ambiguous = vec![82, 87];
        let scoped = liq.scoped("CA");
        let back = scoped.effective_year(2011).unwrap();
        assert_eq!(apply_masks(&liq, &back, &[], 82, |_| None), None);
        let gap = scoped.effective_year(2015).unwrap();
        assert_eq!(apply_masks(&liq, &gap, &[], 82, |_| None), Some(82));
        let native = scoped.effective_year(2014).unwrap();
        assert_eq!(apply_masks(&liq, &native, &[], 87, |_| None), Some(87));
    }

    #[test]
    fn land_cover_reclass_uses_aux_layer() {
        let cdl = SourceDescriptor::new("CDL", ValidYears::range(2008, 2024), 3);
        let masks = builtin_masks();
        let e = native(2012);
        assert_eq!(apply_masks(&cdl, &e, &masks, 176, |_| Some(81)), Some(37));
        assert_eq!(apply_masks(&cdl, &e, &masks, 176, |_| Some(71)), Some(176));
        assert_eq!(apply_masks(&cdl, &e, &masks, 176, |_| None), Some(176));
        assert_eq!(apply_masks(&cdl, &e, &masks, 1, |_| Some(82)), Some(1));
    }

    #[test]
    fn low_coverage_drops_the_value() {
        let liq = SourceDescriptor::new("LANDIQ", ValidYears::sparse([2014, 2016]), 1);
        let masks = builtin_masks();
        let e = liq.scoped("CA").effective_year(2016).unwrap();
        let stats = |count: f64, total: f64| {
            move |field: &str| match field {
                "LANDIQ_PIXEL_COUNT_2016" => Some(count),
                "LANDIQ_PIXEL_TOTAL_2016" => Some(total),
                _ => None,
            }
        };
        let half = stats(5.0, 10.0);
        assert_eq!(apply_masks_with(&liq, &e, &masks, 69, |_| None, &half), Some(69));
        let sparse = stats(4.0, 10.0);
        assert_eq!(apply_masks_with(&liq, &e, &masks, 69, |_| None, &sparse), None);
        let empty = stats(0.0, 0.0);
        assert_eq!(apply_masks_with(&liq, &e, &masks, 69, |_| None, &empty), None);
        // No statistics recorded: keep.
        assert_eq!(apply_masks(&liq, &e, &masks, 69, |_| None), Some(69));
    }

    #[test]
    fn coverage_uses_the_effective_year() {
        let liq = SourceDescriptor::new("LANDIQ", ValidYears::sparse([2014, 2016]), 1);
        let masks = builtin_masks();
        let e = liq.scoped("CA").effective_year(2015).unwrap();
        assert_eq!(e.year, 2014);
        let lookup = |field: &str| match field {
            "LANDIQ_PIXEL_COUNT_2014" => Some(1.0),
            "LANDIQ_PIXEL_TOTAL_2014" => Some(10.0),
            _ => Some(10.0),
        };
        assert_eq!(apply_masks_with(&liq, &e, &masks, 69, |_| None, &lookup), None);
    }

    #[test]
    fn reclass_ignores_other_sources() {
        let liq = SourceDescriptor::new("LANDIQ", ValidYears::range(2014, 2014), 1);
        let masks = builtin_masks();
        let e = native(2014);
        let mut asked = false;
        let out = apply_masks(&liq, &e, &masks, 176, |_| {
            asked = true;
            Some(81)
        });
        assert_eq!(out, Some(176));
        assert!(!asked);
    }
}
