//! Style layers as far as buckets are concerned.

use std::{
    collections::{BTreeMap, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
};

use serde::{Deserialize, Serialize, Serializer};

use crate::{
    error::ConfigError,
    layer_type::LayerType,
    style::{Calculator, PropertyFunction},
};

/// Stores all the styles for a specific layer.
#[derive(Serialize, Debug, Clone)]
pub struct StyleLayer {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: LayerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(serialize_with = "serialize_paint")]
    pub paint: BTreeMap<String, PropertyFunction>,
    /// Layout properties are passed through as they are, no bucket attribute reads them yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "source-layer")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_layer: Option<String>,
}

impl StyleLayer {
    pub fn new(id: impl Into<String>, type_: LayerType) -> Self {
        Self {
            id: id.into(),
            type_,
            maxzoom: None,
            minzoom: None,
            metadata: None,
            paint: BTreeMap::new(),
            layout: None,
            source: None,
            source_layer: None,
        }
    }

    pub fn with_paint(mut self, property: impl Into<String>, function: PropertyFunction) -> Self {
        self.paint.insert(property.into(), function);
        self
    }

    /// Resolves a paint property. Properties which are not declared fall back to the default of
    /// the layer type.
    pub fn calculator(&self, property: &str) -> Result<Arc<dyn Calculator>, ConfigError> {
        if let Some(function) = self.paint.get(property) {
            return Ok(Arc::new(function.clone()));
        }

        self.type_
            .paint_default(property)
            .map(|value| Arc::new(PropertyFunction::constant(value)) as Arc<dyn Calculator>)
            .ok_or_else(|| ConfigError::InvalidStyleValue {
                property: property.to_owned(),
                reason: format!("not a paint property of {} layers", self.type_),
            })
    }

    /// Replaces the declaration of a paint property. Buckets built for this layer need to be
    /// restyled afterwards.
    pub fn set_paint_property(&mut self, property: impl Into<String>, function: PropertyFunction) {
        self.paint.insert(property.into(), function);
    }

    pub fn is_visible_at(&self, zoom: f64) -> bool {
        self.minzoom.map_or(true, |minzoom| zoom >= minzoom as f64)
            && self.maxzoom.map_or(true, |maxzoom| zoom < maxzoom as f64)
    }
}

fn serialize_paint<S>(
    paint: &BTreeMap<String, PropertyFunction>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(paint.iter().map(|(name, function)| (name, function.to_json())))
}

#[derive(Deserialize)]
struct StyleLayerDef {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    maxzoom: Option<u8>,
    minzoom: Option<u8>,
    metadata: Option<HashMap<String, String>>,
    source: Option<String>,
    #[serde(rename = "source-layer")]
    source_layer: Option<String>,
    paint: Option<serde_json::Map<String, serde_json::Value>>,
    layout: Option<serde_json::Value>,
}

impl<'de> serde::Deserialize<'de> for StyleLayer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let def = StyleLayerDef::deserialize(deserializer)?;

        let type_: LayerType = def.type_.parse().map_err(serde::de::Error::custom)?;

        let paint = def
            .paint
            .unwrap_or_default()
            .iter()
            .map(|(name, value)| {
                PropertyFunction::from_json(name, value).map(|function| (name.clone(), function))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(serde::de::Error::custom)?;

        Ok(StyleLayer {
            id: def.id,
            type_,
            maxzoom: def.maxzoom,
            minzoom: def.minzoom,
            metadata: def.metadata,
            paint,
            layout: def.layout,
            source: def.source,
            source_layer: def.source_layer,
        })
    }
}

impl Eq for StyleLayer {}
impl PartialEq for StyleLayer {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl Hash for StyleLayer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}
