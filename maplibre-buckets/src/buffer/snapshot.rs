//! Transfer-safe representation of a [`TypedBuffer`].

use serde::{Deserialize, Serialize};

use crate::buffer::{AttributeLayout, BufferKind, BufferLayout, TypedBuffer};

/// Everything needed to reconstruct a [`TypedBuffer`] on the other side of a transfer boundary.
/// The layout is carried as-is and not recomputed when restoring.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypedBufferSnapshot {
    pub kind: BufferKind,
    pub attributes: Vec<AttributeLayout>,
    pub element_stride: usize,
    pub capacity_bytes: usize,
    pub write_cursor: usize,
    /// The whole byte store. Only the first `write_cursor * element_stride` bytes are meaningful.
    pub raw_bytes: Vec<u8>,
}

impl TypedBufferSnapshot {
    /// The bytes which hold written elements.
    pub fn used_bytes(&self) -> &[u8] {
        &self.raw_bytes[..self.write_cursor * self.element_stride]
    }

    pub fn restore(self) -> TypedBuffer {
        TypedBuffer::restore_from(self)
    }
}

impl TypedBuffer {
    /// Copies the buffer into a snapshot.
    pub fn serialize(&self) -> TypedBufferSnapshot {
        assert!(
            !self.is_released(),
            "buffer storage was released and must not be used anymore"
        );
        TypedBufferSnapshot {
            kind: self.kind(),
            attributes: self.attributes().to_vec(),
            element_stride: self.element_stride(),
            capacity_bytes: self.size(),
            write_cursor: self.len(),
            raw_bytes: self.bytes().to_vec(),
        }
    }

    /// Moves the buffer into a snapshot without copying the byte store.
    pub fn into_snapshot(mut self) -> TypedBufferSnapshot {
        let capacity_bytes = self.size();
        let write_cursor = self.len();
        let raw_bytes = self.release();
        let layout = self.layout().clone();
        TypedBufferSnapshot {
            kind: layout.kind,
            attributes: layout.attributes,
            element_stride: layout.element_stride,
            capacity_bytes,
            write_cursor,
            raw_bytes,
        }
    }

    pub fn restore_from(snapshot: TypedBufferSnapshot) -> TypedBuffer {
        assert_eq!(
            snapshot.raw_bytes.len(),
            snapshot.capacity_bytes,
            "snapshot byte store does not match its capacity"
        );
        assert!(
            snapshot.write_cursor * snapshot.element_stride <= snapshot.capacity_bytes,
            "snapshot write cursor is out of bounds"
        );

        TypedBuffer::from_parts(
            BufferLayout {
                kind: snapshot.kind,
                attributes: snapshot.attributes,
                element_stride: snapshot.element_stride,
            },
            snapshot.raw_bytes,
            snapshot.write_cursor,
        )
    }
}
