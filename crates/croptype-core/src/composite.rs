//! Precedence compositing of candidate sources.
//!
//! For a unit and a requested year, every applicable source is resolved to an
//! effective year and consulted in precedence order. The first one with a raw
//! value that survives masking wins; its code is remapped when the effective
//! year requires it. The raster path does the same per cell of a tile.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::grid::CropGrid;
use crate::mask::{apply_masks, apply_masks_with};
use crate::provenance::Provenance;
use crate::provider::{FeatureStore, FetchCache, RasterProvider};
use crate::registry::{ScopedSource, SourceDescriptor, SourceRole};
use crate::resolver::EffectiveYear;
use crate::unit::{CropCode, Origin, OriginCounts, ResolvedValue, SpatialUnit, UnitRecord, UNSET};
use crate::years::Year;

/// A source that could not be read even after retries. The compositor falls
/// through to the next candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceUnavailable {
    pub unit: String,
    pub source: String,
    pub year: Year,
    pub error: String,
}

impl fmt::Display for SourceUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}: {}", self.unit, self.source, self.year, self.error)
    }
}

/// One source paired with the year it will be read at.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub source: ScopedSource<'a>,
    pub effective: EffectiveYear,
}

impl Candidate<'_> {
    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn origin(&self) -> Origin {
        if self.effective.substituted {
            Origin::Composited
        } else {
            Origin::Sourced
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance::source(self.name(), self.effective.year, self.effective.remap_required)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub value: ResolvedValue,
    pub warnings: Vec<SourceUnavailable>,
}

#[derive(Debug, Clone, Copy)]
pub struct Compositor<'a> {
    config: &'a EngineConfig,
}

impl<'a> Compositor<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Applicable sources for `region` and `year`, highest precedence first.
    pub fn candidates(&self, region: &str, year: Year) -> Vec<Candidate<'a>> {
        self.config
            .registry
            .sources_for(region, year)
            .into_iter()
            .filter_map(|source| {
                let effective = source.effective_year(year)?;
                Some(Candidate { source, effective })
            })
            .collect()
    }

    fn canonical(&self, candidate: &Candidate<'_>, code: CropCode) -> CropCode {
        if candidate.effective.remap_required {
            self.config.remap.remap(code)
        } else {
            code
        }
    }

    // ── Vector ───────────────────────────────────────────────────────────────

    /// Resolve one unit and year from per-source attributes in `store`.
    pub fn resolve_direct(
        &self,
        store: &dyn FeatureStore,
        unit: &SpatialUnit,
        year: Year,
    ) -> Resolution {
        let mut warnings = Vec::new();
        let attribute = |field: &str| match store.get_attribute(&unit.id, field) {
            Ok(value) => value.and_then(|v| v.as_f64()),
            Err(err) => {
                tracing::debug!(target: "croptype::composite", unit = %unit.id, field, error = %err, "attribute lookup failed");
                None
            }
        };
        for candidate in self.candidates(&unit.region, year) {
            let descriptor = candidate.source.descriptor;
            let field = descriptor.field_name(candidate.effective.year);
            let raw = match self
                .config
                .retry
                .run(&field, || store.raw_code(&unit.id, &field))
            {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warnings.push(self.unavailable(unit, &candidate, &err));
                    continue;
                }
            };
            let masked = apply_masks_with(
                descriptor,
                &candidate.effective,
                &self.config.masks,
                raw,
                |aux| self.aux_attribute(store, unit, aux, year),
                &attribute,
            );
            if let Some(code) = masked {
                let value = ResolvedValue::new(
                    self.canonical(&candidate, code),
                    candidate.origin(),
                    candidate.provenance(),
                );
                tracing::trace!(
                    target: "croptype::composite",
                    unit = %unit.id,
                    year,
                    source = candidate.name(),
                    raw,
                    code = value.code,
                    "resolved"
                );
                return Resolution { value, warnings };
            }
        }
        Resolution {
            value: ResolvedValue::unset(),
            warnings,
        }
    }

    /// Resolve every unset year of `record`. Set years are left untouched.
    pub fn resolve_record(
        &self,
        store: &dyn FeatureStore,
        record: &mut UnitRecord,
        years: &[Year],
    ) -> Vec<SourceUnavailable> {
        let mut warnings = Vec::new();
        for &year in years {
            if record.get(year).is_some() {
                continue;
            }
            let resolution = self.resolve_direct(store, &record.unit, year);
            warnings.extend(resolution.warnings);
            if !resolution.value.is_unset() {
                record.set(year, resolution.value);
            }
        }
        warnings
    }

    fn aux_attribute(
        &self,
        store: &dyn FeatureStore,
        unit: &SpatialUnit,
        aux: &str,
        year: Year,
    ) -> Option<CropCode> {
        let (descriptor, aux_year) = self.aux_layer(aux, &unit.region, year)?;
        match store.raw_code(&unit.id, &descriptor.field_name(aux_year)) {
            Ok(code) => code,
            Err(err) => {
                tracing::debug!(target: "croptype::composite", unit = %unit.id, aux, error = %err, "aux lookup failed");
                None
            }
        }
    }

    /// Registry entry of an auxiliary layer and the year to read it at.
    fn aux_layer(&self, aux: &str, region: &str, year: Year) -> Option<(&'a SourceDescriptor, Year)> {
        let descriptor = self.config.registry.get(aux)?;
        if descriptor.role != SourceRole::Auxiliary {
            tracing::debug!(target: "croptype::composite", aux, "mask layer is not declared auxiliary");
        }
        let effective = descriptor.scoped(region).effective_year(year)?;
        Some((descriptor, effective.year))
    }

    fn unavailable(&self, unit: &SpatialUnit, candidate: &Candidate<'_>, err: &FetchError) -> SourceUnavailable {
        tracing::warn!(
            target: "croptype::composite",
            unit = %unit.id,
            source = candidate.name(),
            year = candidate.effective.year,
            error = %err,
            "source unavailable"
        );
        SourceUnavailable {
            unit: unit.id.clone(),
            source: candidate.name().to_string(),
            year: candidate.effective.year,
            error: err.to_string(),
        }
    }

    // ── Raster ───────────────────────────────────────────────────────────────

    /// Composite every cell of `tile` for `year`. Cells outside the tile mask
    /// stay unset. Fails only when the tile mask itself cannot be read.
    pub fn composite_tile(
        &self,
        provider: &dyn RasterProvider,
        cache: &FetchCache,
        tile: &SpatialUnit,
        year: Year,
    ) -> Result<TileComposite, FetchError> {
        let mask = self
            .config
            .retry
            .run(&tile.id, || provider.mask(&tile.id))?
            .ok_or_else(|| FetchError::Permanent(format!("no mask for tile {}", tile.id)))?;
        if !mask.is_consistent() {
            return Err(FetchError::Permanent(format!("mask for tile {} is malformed", tile.id)));
        }

        let mut warnings = Vec::new();
        let mut layers: Vec<(Candidate<'a>, Arc<CropGrid>)> = Vec::new();
        for candidate in self.candidates(&tile.region, year) {
            match self.fetch_layer(provider, cache, candidate.name(), candidate.effective.year, &tile.id) {
                Ok(Some(grid)) if grid.same_shape(&mask) => layers.push((candidate, grid)),
                Ok(Some(grid)) => {
                    let err = FetchError::Permanent(format!(
                        "{}x{} layer does not match {}x{} mask",
                        grid.width, grid.height, mask.width, mask.height
                    ));
                    warnings.push(self.unavailable(tile, &candidate, &err));
                }
                Ok(None) => {}
                Err(err) => warnings.push(self.unavailable(tile, &candidate, &err)),
            }
        }

        let mut aux: HashMap<String, Option<Arc<CropGrid>>> = HashMap::new();
        for mask_layer in self.config.masks.iter() {
            let Some(name) = mask_layer.auxiliary() else {
                continue;
            };
            if aux.contains_key(name) {
                continue;
            }
            let grid = self
                .aux_layer(name, &tile.region, year)
                .and_then(|(descriptor, aux_year)| {
                    match self.fetch_layer(provider, cache, &descriptor.name, aux_year, &tile.id) {
                        Ok(grid) => grid.filter(|g| g.same_shape(&mask)),
                        Err(err) => {
                            tracing::debug!(target: "croptype::composite", tile = %tile.id, aux = name, error = %err, "aux layer unavailable");
                            None
                        }
                    }
                });
            aux.insert(name.to_string(), grid);
        }

        let mut grid = CropGrid::unset(mask.width, mask.height);
        let mut cell_layer: Vec<Option<u16>> = vec![None; mask.len()];
        let mut layer_cells = vec![0usize; layers.len()];
        let mut counts = OriginCounts::default();
        for idx in 0..mask.len() {
            if mask.cell(idx) == UNSET {
                continue;
            }
            let mut resolved = None;
            for (li, (candidate, layer)) in layers.iter().enumerate() {
                let raw = layer.cell(idx);
                let masked = apply_masks(
                    candidate.source.descriptor,
                    &candidate.effective,
                    &self.config.masks,
                    raw,
                    |name| aux.get(name).and_then(|g| g.as_ref()).map(|g| g.cell(idx)),
                );
                if let Some(code) = masked {
                    resolved = Some((li, self.canonical(candidate, code), candidate.origin()));
                    break;
                }
            }
            match resolved {
                Some((li, code, origin)) if code != UNSET => {
                    grid.data[idx] = code;
                    cell_layer[idx] = Some(li as u16);
                    layer_cells[li] += 1;
                    match origin {
                        Origin::Composited => counts.composited += 1,
                        _ => counts.sourced += 1,
                    }
                }
                _ => counts.unset += 1,
            }
        }

        let layers = layers
            .iter()
            .zip(layer_cells)
            .map(|((candidate, _), cells)| LayerSummary {
                source: candidate.name().to_string(),
                effective: candidate.effective,
                origin: candidate.origin(),
                provenance: candidate.provenance(),
                cells,
            })
            .collect();

        tracing::debug!(
            target: "croptype::composite",
            tile = %tile.id,
            year,
            sourced = counts.sourced,
            composited = counts.composited,
            unset = counts.unset,
            "tile composited"
        );

        Ok(TileComposite {
            tile: tile.id.clone(),
            year,
            grid,
            cell_layer,
            layers,
            counts,
            warnings,
        })
    }

    fn fetch_layer(
        &self,
        provider: &dyn RasterProvider,
        cache: &FetchCache,
        source: &str,
        year: Year,
        tile: &str,
    ) -> Result<Option<Arc<CropGrid>>, FetchError> {
        cache.get_or_fetch(source, year, tile, || {
            self.config
                .retry
                .run(source, || provider.fetch(source, year, tile))
        })
    }
}

/// One contributing source of a tile composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub source: String,
    pub effective: EffectiveYear,
    pub origin: Origin,
    pub provenance: Provenance,
    /// Cells this layer won.
    pub cells: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileComposite {
    pub tile: String,
    pub year: Year,
    pub grid: CropGrid,
    /// Index into `layers` of the winning source per cell.
    pub cell_layer: Vec<Option<u16>>,
    pub layers: Vec<LayerSummary>,
    pub counts: OriginCounts,
    pub warnings: Vec<SourceUnavailable>,
}

impl TileComposite {
    pub fn artifact_id(&self) -> String {
        format!("{}_{}", self.tile, self.year)
    }

    /// The resolved value of one cell, with the provenance of its layer.
    pub fn value_at(&self, idx: usize) -> ResolvedValue {
        match self.cell_layer.get(idx).copied().flatten() {
            Some(li) => {
                let layer = &self.layers[li as usize];
                ResolvedValue::new(self.grid.cell(idx), layer.origin, layer.provenance.clone())
            }
            None => ResolvedValue::unset(),
        }
    }

    pub fn remap_applied(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.cells > 0 && l.effective.remap_required)
    }

    /// Metadata attached to the artifact on ingestion.
    pub fn properties(&self, tool_name: &str, tool_version: &str) -> Map<String, Value> {
        let chain: Vec<String> = self.layers.iter().map(|l| l.provenance.to_string()).collect();
        let mut props = Map::new();
        props.insert("tile".into(), json!(self.tile));
        props.insert("year".into(), json!(self.year));
        props.insert("source_chain".into(), json!(chain));
        props.insert("remap_applied".into(), json!(self.remap_applied()));
        props.insert("cells_sourced".into(), json!(self.counts.sourced));
        props.insert("cells_composited".into(), json!(self.counts.composited));
        props.insert("cells_unset".into(), json!(self.counts.unset));
        props.insert(
            "date_resolved".into(),
            json!(Utc::now().format("%Y-%m-%d").to_string()),
        );
        props.insert("tool_name".into(), json!(tool_name));
        props.insert("tool_version".into(), json!(tool_version));
        props
    }
}
