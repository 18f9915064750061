//! Declarative vertex attributes and their resolution against style layers.
//!
//! Layer types declare their attributes as a table of [`AttributeSpec`]s. When a bucket is
//! created, every spec is resolved once per owning layer (or once overall if it is shared) into a
//! [`ResolvedAttribute`]. Style properties which do not vary by feature are folded into constants
//! at this point, so only feature-varying attributes are evaluated per vertex.

use std::{cell::RefCell, collections::BTreeSet, fmt, sync::Arc};

use crate::{
    buffer::AttributeType,
    error::ConfigError,
    feature::{GeometryCoordinate, Properties},
    style::{Calculator, StyleLayer},
};

/// Context of one generated vertex, passed to feature-varying attribute values.
#[derive(Debug, Clone, Copy)]
pub struct Vertex<'a> {
    pub geometry: GeometryCoordinate,
    pub extrude: [f64; 2],
    pub properties: &'a Properties,
}

pub type VertexFunction = Arc<dyn Fn(&Vertex<'_>) -> Vec<f64> + Send + Sync>;

pub type LayerFunction =
    Arc<dyn Fn(&AttributeContext<'_>) -> Result<AttributeValue, ConfigError> + Send + Sync>;

/// Where the value of an attribute comes from.
#[derive(Clone)]
pub enum AttributeSource {
    /// Same value for every vertex of every layer
    Constant(Vec<f64>),
    /// Computed for every vertex, independent of the style
    Vertex(VertexFunction),
    /// Resolved once per layer and zoom into either a constant or a per-vertex function
    Layer(LayerFunction),
}

impl fmt::Debug for AttributeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeSource::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            AttributeSource::Vertex(_) => f.write_str("Vertex(..)"),
            AttributeSource::Layer(_) => f.write_str("Layer(..)"),
        }
    }
}

/// The resolved value of an attribute.
#[derive(Clone)]
pub enum AttributeValue {
    Constant(Vec<f64>),
    PerVertex(VertexFunction),
}

impl AttributeValue {
    pub fn is_feature_constant(&self) -> bool {
        matches!(self, AttributeValue::Constant(_))
    }

    pub fn value_for(&self, vertex: &Vertex<'_>) -> Vec<f64> {
        match self {
            AttributeValue::Constant(value) => value.clone(),
            AttributeValue::PerVertex(function) => function(vertex),
        }
    }
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            AttributeValue::PerVertex(_) => f.write_str("PerVertex(..)"),
        }
    }
}

/// What a [`LayerFunction`] gets to see while resolving.
#[derive(Debug, Clone, Copy)]
pub struct AttributeContext<'a> {
    /// Name of the attribute being resolved
    pub attribute: &'a str,
    /// `None` for shared attributes
    pub layer: Option<&'a StyleLayer>,
    pub zoom: f64,
    pub device_pixel_ratio: f64,
    /// Style properties looked up so far
    read_properties: &'a RefCell<BTreeSet<String>>,
}

impl<'a> AttributeContext<'a> {
    /// Looks up a style property of the owning layer. Shared attributes have no owning layer and
    /// can not read style properties.
    pub fn calculator(&self, property: &str) -> Result<Arc<dyn Calculator>, ConfigError> {
        let calculator = self
            .layer
            .ok_or_else(|| ConfigError::SharedStyleAttribute {
                attribute: self.attribute.to_owned(),
            })?
            .calculator(property)?;
        self.read_properties.borrow_mut().insert(property.to_owned());
        Ok(calculator)
    }
}

/// Declaration of one vertex attribute of a layer type.
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub components: usize,
    pub attribute_type: AttributeType,
    pub value: AttributeSource,
    /// Attributes of the same group are stored in the same vertex buffer and are always
    /// regenerated together. Defaults to the attribute name.
    pub group: Option<&'static str>,
    /// Shared attributes are resolved once for all layers of a bucket instead of once per layer.
    pub shared: bool,
}

impl AttributeSpec {
    pub fn new(
        name: &'static str,
        components: usize,
        attribute_type: AttributeType,
        value: AttributeSource,
    ) -> Self {
        Self {
            name,
            components,
            attribute_type,
            value,
            group: None,
            shared: false,
        }
    }

    pub fn in_group(mut self, group: &'static str) -> Self {
        self.group = Some(group);
        self
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    pub fn group(&self) -> &'static str {
        self.group.unwrap_or(self.name)
    }
}

/// An attribute of one bucket, bound to its owning layer.
#[derive(Debug, Clone)]
pub struct ResolvedAttribute {
    pub name: &'static str,
    /// Name of the attribute within its vertex buffer, `<layer id>::<name>` unless shared
    pub buffer_name: String,
    pub components: usize,
    pub attribute_type: AttributeType,
    pub value: AttributeValue,
    pub group: &'static str,
    pub layer_id: Option<String>,
    /// Resolved from the style, so the value may change with the zoom
    pub from_style: bool,
    /// Paint properties of the owning layer the value is computed from
    pub style_properties: BTreeSet<String>,
}

impl ResolvedAttribute {
    pub fn is_feature_constant(&self) -> bool {
        self.value.is_feature_constant()
    }

    pub fn shader_name(&self) -> String {
        format!("a_{}", self.name)
    }

    /// Whether the attribute is drawn for the layer with `layer_id`.
    pub fn applies_to(&self, layer_id: &str) -> bool {
        self.layer_id.as_deref().map_or(true, |id| id == layer_id)
    }

    /// Whether changing `property` of the layer with `layer_id` can change the value.
    pub fn reads_property(&self, layer_id: &str, property: &str) -> bool {
        self.layer_id.as_deref() == Some(layer_id) && self.style_properties.contains(property)
    }
}

/// Resolves every spec for every layer it applies to, in declaration order.
pub fn resolve_attributes(
    specs: &[AttributeSpec],
    layers: &[StyleLayer],
    zoom: f64,
    device_pixel_ratio: f64,
) -> Result<Vec<ResolvedAttribute>, ConfigError> {
    let mut resolved = Vec::with_capacity(specs.len() * layers.len().max(1));

    for (i, spec) in specs.iter().enumerate() {
        if specs[..i].iter().any(|other| other.name == spec.name) {
            return Err(ConfigError::DuplicateAttribute {
                name: spec.name.to_owned(),
            });
        }
        if spec.components == 0 {
            return Err(ConfigError::ZeroComponents {
                name: spec.name.to_owned(),
            });
        }

        let owners: Vec<Option<&StyleLayer>> = if spec.shared {
            vec![None]
        } else {
            layers.iter().map(Some).collect()
        };

        for layer in owners {
            let read_properties = RefCell::new(BTreeSet::new());
            let value = match &spec.value {
                AttributeSource::Constant(value) => AttributeValue::Constant(value.clone()),
                AttributeSource::Vertex(function) => AttributeValue::PerVertex(function.clone()),
                AttributeSource::Layer(function) => function(&AttributeContext {
                    attribute: spec.name,
                    layer,
                    zoom,
                    device_pixel_ratio,
                    read_properties: &read_properties,
                })?,
            };
            let value = with_components(value, spec.components);

            resolved.push(ResolvedAttribute {
                name: spec.name,
                buffer_name: match layer {
                    Some(layer) => format!("{}::{}", layer.id, spec.name),
                    None => spec.name.to_owned(),
                },
                components: spec.components,
                attribute_type: spec.attribute_type,
                value,
                group: spec.group(),
                layer_id: layer.map(|layer| layer.id.clone()),
                from_style: matches!(spec.value, AttributeSource::Layer(_)),
                style_properties: read_properties.into_inner(),
            });
        }
    }

    Ok(resolved)
}

/// Pads values with zeros or truncates them to `components`, so every write covers the whole
/// attribute.
fn with_components(value: AttributeValue, components: usize) -> AttributeValue {
    match value {
        AttributeValue::Constant(mut value) => {
            value.resize(components, 0.0);
            AttributeValue::Constant(value)
        }
        AttributeValue::PerVertex(function) => {
            AttributeValue::PerVertex(Arc::new(move |vertex: &Vertex<'_>| {
                let mut value = function(vertex);
                value.resize(components, 0.0);
                value
            }))
        }
    }
}

/// An attribute value taken from a style property of the owning layer. Every component is
/// multiplied with `multiplier`, which allows packing fractional values into integer types.
pub fn style_attribute(property: &'static str, multiplier: f64) -> AttributeSource {
    AttributeSource::Layer(Arc::new(
        move |context: &AttributeContext<'_>| -> Result<AttributeValue, ConfigError> {
            let calculator = context.calculator(property)?;
            let evaluate = calculator.evaluate(context.zoom);

            let scaled = move |properties: &Properties| -> Vec<f64> {
                evaluate(properties)
                    .components()
                    .into_iter()
                    .map(|value| value * multiplier)
                    .collect()
            };

            if calculator.is_feature_constant() {
                Ok(AttributeValue::Constant(scaled(&Properties::new())))
            } else {
                Ok(AttributeValue::PerVertex(Arc::new(
                    move |vertex: &Vertex<'_>| scaled(vertex.properties),
                )))
            }
        },
    ))
}
