//! Transfer of buckets from the thread which builds them to the thread which draws them.
//!
//! [`Bucket::serialize`] copies the buffers of a bucket, [`Bucket::into_transferable`] consumes
//! the bucket and moves its byte stores instead. On the receiving side,
//! [`Bucket::from_serialized`] reconstructs a bucket which can be uploaded and drawn.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    bucket::{Bucket, BucketOptions, BucketState},
    buffer::TypedBufferSnapshot,
    element_groups::ElementGroup,
    error::{BucketError, ConfigError},
    layer_type::LayerType,
    style::StyleLayer,
};

/// Wire format of a bucket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SerializedBucket {
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub layer_ids: Vec<String>,
    pub element_groups: Vec<ElementGroup>,
    pub vertex_length: usize,
    pub element_length: usize,
    pub element_buffer: TypedBufferSnapshot,
    /// Keyed by attribute group
    pub vertex_buffers: BTreeMap<String, TypedBufferSnapshot>,
}

impl SerializedBucket {
    pub fn to_json(&self) -> Result<String, BucketError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, BucketError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Bytes held by all snapshots, including unused capacity.
    pub fn byte_length(&self) -> usize {
        self.element_buffer.raw_bytes.len()
            + self
                .vertex_buffers
                .values()
                .map(|snapshot| snapshot.raw_bytes.len())
                .sum::<usize>()
    }
}

impl Bucket {
    /// Brings the buffers up to date and copies them into a [`SerializedBucket`].
    pub fn serialize(&mut self) -> Result<SerializedBucket, BucketError> {
        if self.is_released() {
            return Err(BucketError::Released);
        }
        self.ensure_built()?;

        Ok(SerializedBucket {
            layer_type: self.layer_type,
            layer_ids: self.layer_ids(),
            element_groups: self.element_groups.clone(),
            vertex_length: self.vertex_length,
            element_length: self.element_length,
            element_buffer: self.element_buffer.serialize(),
            vertex_buffers: self
                .vertex_buffers
                .iter()
                .map(|(group, buffer)| (group.clone(), buffer.serialize()))
                .collect(),
        })
    }

    /// Brings the buffers up to date and moves them into a [`SerializedBucket`] without copying.
    pub fn into_transferable(mut self) -> Result<SerializedBucket, BucketError> {
        if self.is_released() {
            return Err(BucketError::Released);
        }
        self.ensure_built()?;

        let layer_ids = self.layer_ids();
        Ok(SerializedBucket {
            layer_type: self.layer_type,
            layer_ids,
            element_groups: self.element_groups,
            vertex_length: self.vertex_length,
            element_length: self.element_length,
            element_buffer: self.element_buffer.into_snapshot(),
            vertex_buffers: self
                .vertex_buffers
                .into_iter()
                .map(|(group, buffer)| (group, buffer.into_snapshot()))
                .collect(),
        })
    }

    /// Hands out the byte stores of all buffers, the element buffer first. The bucket must not be
    /// written afterwards.
    pub fn release_transferables(&mut self) -> Vec<Vec<u8>> {
        let mut transferables = Vec::with_capacity(self.vertex_buffers.len() + 1);
        transferables.push(self.element_buffer.release());
        transferables.extend(self.vertex_buffers.values_mut().map(|buffer| buffer.release()));
        transferables
    }

    /// Reconstructs a bucket on the receiving side. `layers` is searched for the layers the bucket
    /// was built for, their attributes are resolved again. No features are retained, so the
    /// bucket can be drawn but not regenerated.
    pub fn from_serialized(
        serialized: SerializedBucket,
        layers: &[StyleLayer],
        options: BucketOptions,
    ) -> Result<Bucket, BucketError> {
        let bucket_layers = serialized
            .layer_ids
            .iter()
            .map(|id| {
                layers
                    .iter()
                    .find(|layer| &layer.id == id)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownLayer(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut bucket = Bucket::new(serialized.layer_type, bucket_layers, options)?;

        let mut expected = bucket.groups();
        expected.sort_unstable();
        let received: Vec<&str> = serialized.vertex_buffers.keys().map(String::as_str).collect();
        assert_eq!(
            expected, received,
            "serialized vertex buffers do not match the attribute groups of the style"
        );

        bucket.element_buffer = serialized.element_buffer.restore();
        bucket.vertex_buffers = serialized
            .vertex_buffers
            .into_iter()
            .map(|(group, snapshot)| (group, snapshot.restore()))
            .collect();
        bucket.element_groups = serialized.element_groups;
        bucket.vertex_length = serialized.vertex_length;
        bucket.element_length = serialized.element_length;
        bucket.state = BucketState::Populated;
        bucket.geometry_dirty = false;

        Ok(bucket)
    }
}
