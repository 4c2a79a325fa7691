//! Crop-type resolution engine.
//!
//! Resolves a crop-type code for every `(unit, year)` from a prioritized set
//! of classification sources, normalizes codes through the annual-crop remap
//! table, and fills the remaining gaps from neighbouring years. The tools in
//! `tools/` drive it over a feature store or a directory of raster tiles.

pub mod batch;
pub mod composite;
pub mod config;
pub mod error;
pub mod fill;
pub mod grid;
pub mod mask;
pub mod overrides;
pub mod provenance;
pub mod provider;
pub mod raster;
pub mod registry;
pub mod remap;
pub mod resolver;
pub mod sink;
pub mod store;
pub mod unit;
pub mod years;

pub use config::EngineConfig;
pub use unit::{CropCode, Origin, ResolvedValue, SpatialUnit, UnitRecord, UNSET};
pub use years::Year;
