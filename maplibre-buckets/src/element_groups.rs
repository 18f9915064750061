//! Partitioning of generated vertices and elements into index-addressable groups.

use serde::{Deserialize, Serialize};

/// Vertices are addressed by unsigned 16 bit indices, which limits one indexed draw call to
/// 65535 vertices. Features are therefore divided into groups which are drawn separately.
pub const ELEMENT_GROUP_VERTEX_LENGTH: usize = 65535;

/// A contiguous range of vertices and elements. Indices stored in the element buffer for this
/// group are relative to `vertex_index`.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementGroup {
    pub vertex_index: usize,
    pub element_index: usize,
    pub vertex_length: usize,
    pub element_length: usize,
}

impl ElementGroup {
    fn starting_at(vertex_index: usize, element_index: usize) -> Self {
        Self {
            vertex_index,
            element_index,
            vertex_length: 0,
            element_length: 0,
        }
    }

    pub fn vertex_end(&self) -> usize {
        self.vertex_index + self.vertex_length
    }

    pub fn element_end(&self) -> usize {
        self.element_index + self.element_length
    }
}

/// Observes the vertices and elements of features in generation order and closes a group before
/// it would exceed the limit. Groups are only ever split between features.
#[derive(Debug)]
pub struct ElementGroupTracker {
    limit: usize,
    groups: Vec<ElementGroup>,
    current: ElementGroup,
}

impl ElementGroupTracker {
    pub fn new() -> Self {
        Self::with_limit(ELEMENT_GROUP_VERTEX_LENGTH)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            groups: Vec::new(),
            current: ElementGroup::default(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Places a whole feature. Returns the group it ended up in.
    ///
    /// A feature which alone exceeds the limit can not be placed without splitting it; callers
    /// must reject such features before.
    pub fn push_feature(&mut self, vertex_count: usize, element_count: usize) -> &ElementGroup {
        assert!(
            vertex_count <= self.limit,
            "a single feature exceeds the element group limit"
        );

        if self.current.vertex_length + vertex_count > self.limit {
            self.close();
        }

        self.current.vertex_length += vertex_count;
        self.current.element_length += element_count;
        &self.current
    }

    /// Closes the open group, even if it is empty, and returns all groups.
    pub fn finish(mut self) -> Vec<ElementGroup> {
        self.groups.push(self.current);
        self.groups
    }

    fn close(&mut self) {
        let closed = self.current;
        log::trace!(
            "closing element group with {} vertices and {} elements",
            closed.vertex_length,
            closed.element_length
        );
        self.groups.push(closed);
        self.current = ElementGroup::starting_at(closed.vertex_end(), closed.element_end());
    }
}

impl Default for ElementGroupTracker {
    fn default() -> Self {
        Self::new()
    }
}
