//! Layer types which can be turned into buckets.
//!
//! Every layer type knows which vertex attributes it needs and how to turn a feature into
//! vertices and primitives. Both are bundled in a [`LayerProgram`] which is what a bucket is
//! built from.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    attribute::{AttributeSpec, Vertex},
    error::{BucketError, ConfigError},
    feature::Feature,
    style::StyleValue,
};

mod circle;
mod fill;
mod line;
mod tessellation;

/// Receives the output of a vertex generator.
pub trait BucketWriter {
    /// Writes one vertex and returns its index.
    fn add_vertex(&mut self, vertex: Vertex<'_>) -> usize;

    /// Adds one primitive made of previously returned vertex indices.
    fn add_element(&mut self, vertices: &[usize]);
}

/// Turns one feature into vertices and elements.
pub type Generator = fn(&dyn Feature, &mut dyn BucketWriter) -> Result<(), BucketError>;

/// The primitive type of indexed draw calls.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrawMode {
    #[serde(rename = "TRIANGLES")]
    Triangles,
}

impl DrawMode {
    pub fn vertices_per_element(&self) -> usize {
        match self {
            DrawMode::Triangles => 3,
        }
    }
}

/// Everything a bucket needs to know about the layers it is built for.
#[derive(Clone)]
pub struct LayerProgram {
    pub attributes: Vec<AttributeSpec>,
    pub generator: Generator,
    pub shader: &'static str,
    pub mode: DrawMode,
    pub disable_stencil_test: bool,
}

impl fmt::Debug for LayerProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerProgram")
            .field("attributes", &self.attributes)
            .field("shader", &self.shader)
            .field("mode", &self.mode)
            .field("disable_stencil_test", &self.disable_stencil_test)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum LayerType {
    Circle,
    Fill,
    Line,
}

impl LayerType {
    pub fn name(&self) -> &'static str {
        match self {
            LayerType::Circle => "circle",
            LayerType::Fill => "fill",
            LayerType::Line => "line",
        }
    }

    pub fn program(&self) -> LayerProgram {
        LayerProgram {
            attributes: self.attribute_specs(),
            generator: self.generator(),
            shader: self.shader(),
            mode: self.mode(),
            disable_stencil_test: self.disable_stencil_test(),
        }
    }

    pub fn attribute_specs(&self) -> Vec<AttributeSpec> {
        match self {
            LayerType::Circle => circle::attribute_specs(),
            LayerType::Fill => fill::attribute_specs(),
            LayerType::Line => line::attribute_specs(),
        }
    }

    /// Runs the generator of this layer type for one feature.
    pub fn generate_vertices_and_indices(
        &self,
        feature: &dyn Feature,
        writer: &mut dyn BucketWriter,
    ) -> Result<(), BucketError> {
        (self.generator())(feature, writer)
    }

    fn generator(&self) -> Generator {
        match self {
            LayerType::Circle => circle::generate,
            LayerType::Fill => fill::generate,
            LayerType::Line => line::generate,
        }
    }

    pub fn shader(&self) -> &'static str {
        match self {
            LayerType::Circle => "circleShader",
            LayerType::Fill => "fillShader",
            LayerType::Line => "lineShader",
        }
    }

    pub fn mode(&self) -> DrawMode {
        DrawMode::Triangles
    }

    pub fn disable_stencil_test(&self) -> bool {
        match self {
            LayerType::Circle | LayerType::Line => true,
            LayerType::Fill => false,
        }
    }

    /// Value of a paint property which a layer does not declare.
    pub fn paint_default(&self, property: &str) -> Option<StyleValue> {
        let black = StyleValue::Color([0.0, 0.0, 0.0, 1.0]);
        let value = match (self, property) {
            (LayerType::Circle, "circle-radius") => StyleValue::Number(5.0),
            (LayerType::Circle, "circle-color") => black,
            (LayerType::Circle, "circle-blur") => StyleValue::Number(0.0),
            (LayerType::Circle, "circle-opacity") => StyleValue::Number(1.0),
            (LayerType::Fill, "fill-color") => black,
            (LayerType::Fill, "fill-opacity") => StyleValue::Number(1.0),
            (LayerType::Line, "line-color") => black,
            (LayerType::Line, "line-width") => StyleValue::Number(1.0),
            (LayerType::Line, "line-opacity") => StyleValue::Number(1.0),
            _ => return None,
        };
        Some(value)
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LayerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "circle" => Ok(LayerType::Circle),
            "fill" => Ok(LayerType::Fill),
            "line" => Ok(LayerType::Line),
            _ => Err(ConfigError::UnsupportedLayerType(s.to_owned())),
        }
    }
}

impl TryFrom<String> for LayerType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LayerType> for String {
    fn from(value: LayerType) -> Self {
        value.name().to_owned()
    }
}
