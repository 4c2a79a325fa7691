//! JSON document feature store.
//!
//! ```json
//! { "features": [ { "id": "06_000123", "region": "CA", "subregion": "180200",
//!                   "properties": { "CROP_2016": 47, "CSRC_2016": "LANDIQ/2016" } } ] }
//! ```

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FetchError, StoreError};
use crate::provenance::{crop_field, source_field};
use crate::provider::FeatureStore;
use crate::unit::{CropCode, SpatialUnit};
use crate::years::Year;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subregion: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn unit(&self) -> SpatialUnit {
        SpatialUnit {
            id: self.id.clone(),
            region: self.region.clone(),
            subregion: self.subregion.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureDocument {
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Default)]
pub struct JsonFeatureStore {
    doc: FeatureDocument,
    index: HashMap<String, usize>,
    path: Option<PathBuf>,
}

impl JsonFeatureStore {
    pub fn new(doc: FeatureDocument) -> Result<Self, StoreError> {
        let mut index = HashMap::with_capacity(doc.features.len());
        for (i, feature) in doc.features.iter().enumerate() {
            if index.insert(feature.id.clone(), i).is_some() {
                return Err(StoreError::InvalidValue {
                    unit: feature.id.clone(),
                    field: "id".into(),
                    message: "duplicate feature id".into(),
                });
            }
        }
        Ok(Self {
            doc,
            index,
            path: None,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        Self::new(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut store = Self::from_json(&text)?;
        store.path = Some(path.to_path_buf());
        tracing::debug!(
            target: "croptype::store",
            path = %path.display(),
            features = store.len(),
            "loaded feature store"
        );
        Ok(store)
    }

    /// Write back to the file the store was loaded from.
    pub fn save(&self) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => Err(StoreError::NoBackingFile),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        let text = self.to_json_string()?;
        fs::write(path, text).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json_string(&self) -> Result<String, StoreError> {
        let mut text = serde_json::to_string_pretty(&self.doc)?;
        text.push('\n');
        Ok(text)
    }

    pub fn document(&self) -> &FeatureDocument {
        &self.doc
    }

    pub fn feature(&self, unit_id: &str) -> Option<&Feature> {
        self.index.get(unit_id).map(|&i| &self.doc.features[i])
    }

    pub fn len(&self) -> usize {
        self.doc.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.features.is_empty()
    }

    fn feature_mut(&mut self, unit_id: &str) -> Result<&mut Feature, StoreError> {
        let i = *self
            .index
            .get(unit_id)
            .ok_or_else(|| StoreError::UnknownFeature(unit_id.to_string()))?;
        Ok(&mut self.doc.features[i])
    }
}

impl FeatureStore for JsonFeatureStore {
    fn units(&self) -> Vec<SpatialUnit> {
        self.doc.features.iter().map(Feature::unit).collect()
    }

    fn get_attribute(&self, unit_id: &str, field: &str) -> Result<Option<Value>, FetchError> {
        let feature = self
            .feature(unit_id)
            .ok_or_else(|| FetchError::Permanent(format!("unknown feature {unit_id:?}")))?;
        Ok(feature.properties.get(field).filter(|v| !v.is_null()).cloned())
    }

    fn set_attribute(
        &mut self,
        unit_id: &str,
        year: Year,
        value: CropCode,
        provenance: &str,
    ) -> Result<(), StoreError> {
        let feature = self.feature_mut(unit_id)?;
        feature.properties.insert(crop_field(year), Value::from(value));
        feature
            .properties
            .insert(source_field(year), Value::from(provenance));
        Ok(())
    }
}
