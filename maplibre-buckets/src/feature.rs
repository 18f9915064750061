//! The view of a decoded tile feature which buckets consume.

use geo_types::Coord;
use serde::{Deserialize, Serialize};

/// Feature properties, mapping names to primitive values.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Coordinates of a geometry in tile space (0 to extent).
pub type GeometryCoordinate = Coord<i32>;

/// Rings of a polygon, parts of a line or groups of points.
pub type GeometryCollection = Vec<Vec<GeometryCoordinate>>;

/// A decoded feature. Decoding itself happens upstream of buckets.
pub trait Feature {
    fn load_geometry(&self) -> GeometryCollection;

    fn properties(&self) -> &Properties;
}

/// A feature which owns its geometry and properties.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VectorFeature {
    pub geometry: GeometryCollection,
    #[serde(default)]
    pub properties: Properties,
}

impl VectorFeature {
    pub fn new(geometry: GeometryCollection, properties: Properties) -> Self {
        Self {
            geometry,
            properties,
        }
    }

    /// A feature with a single point.
    pub fn point(x: i32, y: i32) -> Self {
        Self::new(vec![vec![Coord { x, y }]], Properties::new())
    }

    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

impl Feature for VectorFeature {
    fn load_geometry(&self) -> GeometryCollection {
        self.geometry.clone()
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }
}
