//! Zoom and property functions of style properties.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    error::ConfigError,
    feature::Properties,
    style::{Calculator, FeatureEvaluator, StyleValue},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FunctionKind {
    /// Interpolates between stops, exponentially if `base` is not 1
    Exponential,
    /// Takes the output of the last stop below the input
    Interval,
    /// Takes the output of the stop equal to the input
    Categorical,
}

impl FunctionKind {
    fn name(&self) -> &'static str {
        match self {
            FunctionKind::Exponential => "exponential",
            FunctionKind::Interval => "interval",
            FunctionKind::Categorical => "categorical",
        }
    }
}

/// Input/output pairs of a function, ordered by input.
#[derive(Debug, Clone, PartialEq)]
pub struct Stops {
    pub kind: FunctionKind,
    pub base: f64,
    pub stops: Vec<(Value, StyleValue)>,
}

impl Stops {
    pub fn evaluate(&self, input: Option<&Value>) -> Option<StyleValue> {
        let input = input?;
        match self.kind {
            FunctionKind::Categorical => self
                .stops
                .iter()
                .find(|(stop, _)| match (stop.as_f64(), input.as_f64()) {
                    (Some(stop), Some(input)) => stop == input,
                    _ => stop == input,
                })
                .map(|(_, output)| output.clone()),
            FunctionKind::Interval => {
                let input = input.as_f64()?;
                let index = self.upper_index(input);
                Some(self.stops[index.saturating_sub(1)].1.clone())
            }
            FunctionKind::Exponential => {
                let input = input.as_f64()?;
                Some(self.interpolate(input))
            }
        }
    }

    pub fn evaluate_number(&self, input: f64) -> Option<StyleValue> {
        self.evaluate(Some(&Value::from(input)))
    }

    /// Index of the first stop whose input is greater than `input`.
    fn upper_index(&self, input: f64) -> usize {
        self.stops
            .iter()
            .position(|(stop, _)| stop.as_f64().map_or(false, |stop| stop > input))
            .unwrap_or(self.stops.len())
    }

    fn interpolate(&self, input: f64) -> StyleValue {
        let upper = self.upper_index(input);
        if upper == 0 {
            return self.stops[0].1.clone();
        }
        if upper == self.stops.len() {
            return self.stops[upper - 1].1.clone();
        }

        let (lower_input, lower_output) = &self.stops[upper - 1];
        let (upper_input, upper_output) = &self.stops[upper];
        let lower_input = lower_input.as_f64().unwrap_or_default();
        let upper_input = upper_input.as_f64().unwrap_or_default();

        let t = interpolation_factor(input, self.base, lower_input, upper_input);
        lower_output.interpolate(upper_output, t)
    }

    fn from_json(
        property: &str,
        object: &serde_json::Map<String, Value>,
        default_kind: Option<FunctionKind>,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidStyleValue {
            property: property.to_owned(),
            reason: reason.to_owned(),
        };

        let stops: Vec<(Value, StyleValue)> = match (object.get("stops"), object.get("domain")) {
            (Some(Value::Array(stops)), _) => stops
                .iter()
                .map(|stop| match stop.as_array().map(Vec::as_slice) {
                    Some([input, output]) => {
                        Ok((input.clone(), StyleValue::from_json(property, output)?))
                    }
                    _ => Err(invalid("stops must be pairs of input and output")),
                })
                .collect::<Result<_, _>>()?,
            (None, Some(Value::Array(domain))) => {
                let range = object
                    .get("range")
                    .and_then(Value::as_array)
                    .ok_or_else(|| invalid("a domain requires a range"))?;
                if range.len() != domain.len() {
                    return Err(invalid("domain and range differ in length"));
                }
                domain
                    .iter()
                    .zip(range)
                    .map(|(input, output)| {
                        Ok((input.clone(), StyleValue::from_json(property, output)?))
                    })
                    .collect::<Result<_, ConfigError>>()?
            }
            _ => return Err(invalid("functions require stops or a domain and range")),
        };

        if stops.is_empty() {
            return Err(invalid("functions require at least one stop"));
        }

        let kind = match object.get("type").and_then(Value::as_str) {
            Some("exponential") => FunctionKind::Exponential,
            Some("interval") => FunctionKind::Interval,
            Some("categorical") => FunctionKind::Categorical,
            Some(other) => return Err(invalid(&format!("unknown function type {other}"))),
            None => default_kind.unwrap_or(if stops[0].0.is_string() {
                FunctionKind::Categorical
            } else {
                FunctionKind::Exponential
            }),
        };

        if kind != FunctionKind::Categorical && stops.iter().any(|(input, _)| !input.is_number()) {
            return Err(invalid("stop inputs must be numbers"));
        }

        let base = match object.get("base") {
            Some(base) => base.as_f64().ok_or_else(|| invalid("base must be a number"))?,
            None => 1.0,
        };

        Ok(Self { kind, base, stops })
    }

    fn to_json(&self) -> serde_json::Map<String, Value> {
        let mut object = serde_json::Map::new();
        object.insert("type".to_owned(), Value::from(self.kind.name()));
        object.insert("base".to_owned(), Value::from(self.base));
        object.insert(
            "stops".to_owned(),
            Value::Array(
                self.stops
                    .iter()
                    .map(|(input, output)| Value::Array(vec![input.clone(), output.to_json()]))
                    .collect(),
            ),
        );
        object
    }
}

fn interpolation_factor(input: f64, base: f64, lower: f64, upper: f64) -> f64 {
    let difference = upper - lower;
    let progress = input - lower;

    if difference == 0.0 {
        0.0
    } else if base == 1.0 {
        progress / difference
    } else {
        (base.powf(progress) - 1.0) / (base.powf(difference) - 1.0)
    }
}

/// The declared value of a paint or layout property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyFunction {
    Constant(StyleValue),
    /// Depends on zoom only
    Zoom(Stops),
    /// Depends on one feature property
    Property {
        property: String,
        stops: Stops,
        default: Option<StyleValue>,
    },
}

impl PropertyFunction {
    pub fn constant(value: StyleValue) -> Self {
        PropertyFunction::Constant(value)
    }

    /// Parses a style property. `name` is only used for error reporting.
    pub fn from_json(name: &str, value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(object) = value else {
            return Ok(PropertyFunction::Constant(StyleValue::from_json(name, value)?));
        };

        match object.get("property") {
            Some(Value::String(property)) => Ok(PropertyFunction::Property {
                property: property.clone(),
                stops: Stops::from_json(name, object, None)?,
                default: object
                    .get("default")
                    .map(|default| StyleValue::from_json(name, default))
                    .transpose()?,
            }),
            Some(_) => Err(ConfigError::InvalidStyleValue {
                property: name.to_owned(),
                reason: "property must be a string".to_owned(),
            }),
            None => Ok(PropertyFunction::Zoom(Stops::from_json(
                name,
                object,
                Some(FunctionKind::Exponential),
            )?)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PropertyFunction::Constant(value) => value.to_json(),
            PropertyFunction::Zoom(stops) => Value::Object(stops.to_json()),
            PropertyFunction::Property {
                property,
                stops,
                default,
            } => {
                let mut object = stops.to_json();
                object.insert("property".to_owned(), Value::from(property.as_str()));
                if let Some(default) = default {
                    object.insert("default".to_owned(), default.to_json());
                }
                Value::Object(object)
            }
        }
    }
}

impl Calculator for PropertyFunction {
    fn is_feature_constant(&self) -> bool {
        !matches!(self, PropertyFunction::Property { .. })
    }

    fn evaluate(&self, zoom: f64) -> FeatureEvaluator {
        match self {
            PropertyFunction::Constant(value) => {
                let value = value.clone();
                Arc::new(move |_: &Properties| value.clone())
            }
            PropertyFunction::Zoom(stops) => {
                let value = stops
                    .evaluate_number(zoom)
                    .unwrap_or_else(|| stops.stops[0].1.clone());
                Arc::new(move |_: &Properties| value.clone())
            }
            PropertyFunction::Property {
                property,
                stops,
                default,
            } => {
                let property = property.clone();
                let stops = stops.clone();
                let fallback = default.clone().unwrap_or_else(|| stops.stops[0].1.clone());
                Arc::new(move |properties: &Properties| {
                    stops
                        .evaluate(properties.get(&property))
                        .unwrap_or_else(|| fallback.clone())
                })
            }
        }
    }
}
