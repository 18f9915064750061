//! Style values of layers as consumed by buckets.
//!
//! Buckets only see style properties through the [`Calculator`] trait: a calculator knows whether
//! it depends on feature properties and can be specialized to a zoom level, which yields a
//! [`FeatureEvaluator`] for feature properties.

use std::{fmt, sync::Arc};

use crate::{error::ConfigError, feature::Properties};

mod function;
pub mod layer;

pub use function::{FunctionKind, PropertyFunction, Stops};
pub use layer::StyleLayer;

/// Evaluates a style property for the properties of one feature.
pub type FeatureEvaluator = Arc<dyn Fn(&Properties) -> StyleValue + Send + Sync>;

/// A style property which is a function of zoom and possibly of feature properties.
pub trait Calculator: Send + Sync {
    /// Whether the value is the same for every feature.
    fn is_feature_constant(&self) -> bool;

    fn evaluate(&self, zoom: f64) -> FeatureEvaluator;
}

/// A resolved style value.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleValue {
    Number(f64),
    /// Non-premultiplied RGBA color with components between 0 and 1
    Color([f64; 4]),
    Array(Vec<f64>),
}

impl StyleValue {
    /// The value as a vector of components.
    pub fn components(&self) -> Vec<f64> {
        match self {
            StyleValue::Number(value) => vec![*value],
            StyleValue::Color(color) => color.to_vec(),
            StyleValue::Array(values) => values.clone(),
        }
    }

    /// The first component. Useful for scalar properties.
    pub fn scalar(&self) -> f64 {
        match self {
            StyleValue::Number(value) => *value,
            StyleValue::Color(color) => color[0],
            StyleValue::Array(values) => values.first().copied().unwrap_or_default(),
        }
    }

    pub fn from_json(property: &str, value: &serde_json::Value) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidStyleValue {
            property: property.to_owned(),
            reason: reason.to_owned(),
        };

        match value {
            serde_json::Value::Number(number) => number
                .as_f64()
                .map(StyleValue::Number)
                .ok_or_else(|| invalid("number is not representable")),
            serde_json::Value::String(color) => csscolorparser::parse(color)
                .map(|color| StyleValue::Color([color.r, color.g, color.b, color.a]))
                .map_err(|e| invalid(&e.to_string())),
            serde_json::Value::Array(values) => values
                .iter()
                .map(|value| value.as_f64())
                .collect::<Option<Vec<_>>>()
                .map(StyleValue::Array)
                .ok_or_else(|| invalid("arrays must only contain numbers")),
            _ => Err(invalid("expected a number, color or array of numbers")),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StyleValue::Number(value) => serde_json::json!(value),
            StyleValue::Color([r, g, b, a]) => serde_json::Value::String(format!(
                "rgba({}, {}, {}, {})",
                (r * 255.0).round(),
                (g * 255.0).round(),
                (b * 255.0).round(),
                a
            )),
            StyleValue::Array(values) => serde_json::json!(values),
        }
    }

    /// Interpolates between `self` and `other`. Values of different shape are not interpolated,
    /// `self` is kept instead.
    pub fn interpolate(&self, other: &StyleValue, t: f64) -> StyleValue {
        let lerp = |a: f64, b: f64| a + (b - a) * t;
        match (self, other) {
            (StyleValue::Number(a), StyleValue::Number(b)) => StyleValue::Number(lerp(*a, *b)),
            (StyleValue::Color(a), StyleValue::Color(b)) => StyleValue::Color([
                lerp(a[0], b[0]),
                lerp(a[1], b[1]),
                lerp(a[2], b[2]),
                lerp(a[3], b[3]),
            ]),
            (StyleValue::Array(a), StyleValue::Array(b)) if a.len() == b.len() => {
                StyleValue::Array(a.iter().zip(b).map(|(a, b)| lerp(*a, *b)).collect())
            }
            _ => self.clone(),
        }
    }
}

impl fmt::Display for StyleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
