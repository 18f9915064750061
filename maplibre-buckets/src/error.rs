//! Errors which can happen while laying out buffers and generating buckets.

use lyon::tessellation::TessellationError;
use thiserror::Error;

/// A malformed attribute or style declaration. These are detected when a
/// [`crate::buffer::TypedBuffer`] or [`crate::bucket::Bucket`] is constructed and are never
/// recoverable for that configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("a vertex buffer requires at least one attribute")]
    NoAttributes,
    #[error("attribute {name} must have at least one component")]
    ZeroComponents { name: String },
    #[error("attribute {name} is declared more than once")]
    DuplicateAttribute { name: String },
    #[error("unknown attribute component type {0}")]
    UnknownAttributeType(String),
    #[error("layer type {0} is not supported by buckets")]
    UnsupportedLayerType(String),
    #[error("bucket has no layer with id {0}")]
    UnknownLayer(String),
    #[error("shared attribute {attribute} can not read a per-layer style value")]
    SharedStyleAttribute { attribute: String },
    #[error("invalid value for style property {property}: {reason}")]
    InvalidStyleValue { property: String, reason: String },
}

#[derive(Error, Debug)]
pub enum BucketError {
    /// The attribute or style configuration is malformed
    #[error("bucket configuration is invalid")]
    Config(#[from] ConfigError),
    /// A single feature emits more vertices than one element group can address
    #[error("feature {feature_index} emits {vertex_count} vertices which exceeds the index limit")]
    FeatureTooLarge {
        feature_index: usize,
        vertex_count: usize,
    },
    /// Tessellating fill or line geometry failed
    #[error("tessellation of feature geometry failed")]
    Tessellation(#[from] TessellationError),
    /// Encoding or decoding a serialized bucket failed
    #[error("serializing bucket failed")]
    Serialization(#[from] serde_json::Error),
    /// The backing storage was already handed across the transfer boundary
    #[error("bucket buffers were released and can not be serialized again")]
    Released,
}
