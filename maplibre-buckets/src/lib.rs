//! # maplibre-buckets
//!
//! Packs the features of a map tile into vertex and index buffers which can be handed to a
//! graphics device.
//!
//! Buckets are built on a worker thread from features and style layers. Attributes which are the
//! same for every feature are never written to buffers, attributes which vary per feature are
//! written into one [`buffer::TypedBuffer`] per attribute group. A built bucket is moved to the
//! render thread as a [`transfer::SerializedBucket`], uploaded through a
//! [`render::GraphicsContext`] and drawn with one draw call per [`element_groups::ElementGroup`].
//!
//! ### Example
//!
//! ```
//! use maplibre_buckets::{
//!     bucket::{Bucket, BucketOptions},
//!     feature::VectorFeature,
//!     layer_type::LayerType,
//!     style::StyleLayer,
//! };
//!
//! let layers: Vec<StyleLayer> = serde_json::from_str(
//!     r##"[{"id": "poi", "type": "circle", "paint": {"circle-color": "#ff0000"}}]"##,
//! )
//! .unwrap();
//! let mut bucket = Bucket::new(LayerType::Circle, layers, BucketOptions::default()).unwrap();
//! bucket.queue_feature(VectorFeature::point(10, 20));
//!
//! let serialized = bucket.into_transferable().unwrap();
//! assert_eq!(serialized.vertex_length, 4);
//! ```

pub mod attribute;
pub mod bucket;
pub mod buffer;
pub mod element_groups;
pub mod error;
pub mod feature;
pub mod layer_type;
pub mod render;
pub mod style;
pub mod transfer;

pub use bucket::{Bucket, BucketOptions, BucketState};
pub use error::{BucketError, ConfigError};
pub use render::{GraphicsContext, RenderBucket};
pub use transfer::SerializedBucket;
