//! Buckets own the generated buffers of one or more layers of one tile.
//!
//! Features are queued first and turned into buffers by a generation pass. Every feature is run
//! through the generator of the layer type, which reports vertices and primitives back to the
//! bucket. Vertex attributes which vary by feature are written into one vertex buffer per
//! attribute group, primitives go into the element buffer. Attributes which are constant for all
//! features are never written, they are bound as constants when drawing.
//!
//! A populated bucket can be partially regenerated: [`Bucket::request_rebuild`] marks attribute
//! groups as stale and [`Bucket::rebuild_stale`] replays the generator for those groups only.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::{
    attribute::{resolve_attributes, AttributeValue, ResolvedAttribute, Vertex},
    buffer::{
        AttributeDescriptor, BufferKind, TypedBuffer, ELEMENT_ATTRIBUTE_NAME,
        ELEMENT_ATTRIBUTE_TYPE, SIZE_DEFAULT,
    },
    element_groups::{ElementGroup, ElementGroupTracker},
    error::{BucketError, ConfigError},
    feature::Feature,
    layer_type::{BucketWriter, DrawMode, LayerProgram, LayerType},
    style::{PropertyFunction, StyleLayer},
};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(default)]
pub struct BucketOptions {
    pub zoom: f64,
    pub device_pixel_ratio: f64,
    /// Initial size of every buffer in bytes
    pub initial_buffer_size: usize,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            zoom: 0.0,
            device_pixel_ratio: 1.0,
            initial_buffer_size: SIZE_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketState {
    /// No buffers have been generated yet
    Empty,
    /// Buffers match the queued features and the style
    Populated,
    /// Buffers are complete, but the named attribute groups hold outdated values
    Stale(BTreeSet<String>),
}

pub struct Bucket {
    pub(crate) layer_type: LayerType,
    pub(crate) program: LayerProgram,
    pub(crate) layers: Vec<StyleLayer>,
    pub(crate) options: BucketOptions,
    pub(crate) attributes: Vec<ResolvedAttribute>,
    pub(crate) features: Vec<Box<dyn Feature + Send>>,
    pub(crate) state: BucketState,
    /// Features were queued after the last generation pass
    pub(crate) geometry_dirty: bool,
    pub(crate) element_buffer: TypedBuffer,
    /// One buffer per attribute group with feature-varying attributes
    pub(crate) vertex_buffers: BTreeMap<String, TypedBuffer>,
    pub(crate) element_groups: Vec<ElementGroup>,
    pub(crate) vertex_length: usize,
    pub(crate) element_length: usize,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("layer_type", &self.layer_type)
            .field("layer_ids", &self.layer_ids())
            .field("state", &self.state)
            .field("features", &self.features.len())
            .field("vertex_buffers", &self.vertex_buffers)
            .field("element_groups", &self.element_groups)
            .field("vertex_length", &self.vertex_length)
            .field("element_length", &self.element_length)
            .finish_non_exhaustive()
    }
}

impl Bucket {
    pub fn new(
        layer_type: LayerType,
        layers: Vec<StyleLayer>,
        options: BucketOptions,
    ) -> Result<Self, ConfigError> {
        Self::with_program(layer_type, layer_type.program(), layers, options)
    }

    /// Creates a bucket which generates its buffers with a custom program instead of the one of
    /// its layer type.
    pub fn with_program(
        layer_type: LayerType,
        program: LayerProgram,
        layers: Vec<StyleLayer>,
        options: BucketOptions,
    ) -> Result<Self, ConfigError> {
        if let Some(layer) = layers.iter().find(|layer| layer.type_ != layer_type) {
            return Err(ConfigError::UnsupportedLayerType(format!(
                "{} in a {} bucket",
                layer.type_, layer_type
            )));
        }

        let attributes = resolve_attributes(
            &program.attributes,
            &layers,
            options.zoom,
            options.device_pixel_ratio,
        )?;
        let vertex_buffers = create_vertex_buffers(&attributes, options.initial_buffer_size)?;
        let element_buffer = create_element_buffer(program.mode, options.initial_buffer_size)?;

        Ok(Self {
            layer_type,
            program,
            layers,
            options,
            attributes,
            features: Vec::new(),
            state: BucketState::Empty,
            geometry_dirty: false,
            element_buffer,
            vertex_buffers,
            element_groups: Vec::new(),
            vertex_length: 0,
            element_length: 0,
        })
    }

    pub fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    pub fn program(&self) -> &LayerProgram {
        &self.program
    }

    pub fn layers(&self) -> &[StyleLayer] {
        &self.layers
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.layers.iter().map(|layer| layer.id.clone()).collect()
    }

    pub fn options(&self) -> &BucketOptions {
        &self.options
    }

    pub fn attributes(&self) -> &[ResolvedAttribute] {
        &self.attributes
    }

    pub fn state(&self) -> &BucketState {
        &self.state
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn element_buffer(&self) -> &TypedBuffer {
        &self.element_buffer
    }

    pub fn vertex_buffers(&self) -> &BTreeMap<String, TypedBuffer> {
        &self.vertex_buffers
    }

    pub fn vertex_buffer(&self, group: &str) -> Option<&TypedBuffer> {
        self.vertex_buffers.get(group)
    }

    pub fn element_groups(&self) -> &[ElementGroup] {
        &self.element_groups
    }

    pub fn vertex_length(&self) -> usize {
        self.vertex_length
    }

    pub fn element_length(&self) -> usize {
        self.element_length
    }

    pub fn is_empty(&self) -> bool {
        self.element_length == 0
    }

    /// Attribute groups with at least one feature-varying attribute, in declaration order.
    pub fn groups(&self) -> Vec<&'static str> {
        varying_groups(&self.attributes)
    }

    /// Evaluates an attribute for a vertex. Shared attributes are found with `layer_id` set to
    /// `None` or to any layer of the bucket.
    pub fn attribute_value(
        &self,
        name: &str,
        layer_id: Option<&str>,
        vertex: &Vertex<'_>,
    ) -> Option<Vec<f64>> {
        self.attributes
            .iter()
            .find(|attribute| {
                attribute.name == name
                    && layer_id.map_or(attribute.layer_id.is_none(), |id| attribute.applies_to(id))
            })
            .map(|attribute| attribute.value.value_for(vertex))
    }

    /// Queues a feature for the next generation pass. Buffers are not touched until then.
    pub fn queue_feature(&mut self, feature: impl Feature + Send + 'static) {
        self.features.push(Box::new(feature));
        self.geometry_dirty = true;
    }

    pub fn remove_feature(&mut self, index: usize) -> Box<dyn Feature + Send> {
        self.geometry_dirty = true;
        self.features.remove(index)
    }

    /// Regenerates all buffers from the queued features.
    ///
    /// If the pass fails, the bucket is reset to [`BucketState::Empty`]. Queued features are kept.
    #[tracing::instrument(skip_all)]
    pub fn build(&mut self) -> Result<(), BucketError> {
        let result = self.generate();
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn generate(&mut self) -> Result<(), BucketError> {
        self.element_buffer.clear();
        for buffer in self.vertex_buffers.values_mut() {
            buffer.clear();
        }

        let generator = self.program.generator;
        let vertices_per_element = self.program.mode.vertices_per_element();
        let mut tracker = ElementGroupTracker::new();
        let mut writer = VertexWriter::new(
            &self.attributes,
            &mut self.vertex_buffers,
            None,
            vertices_per_element,
        );

        for (feature_index, feature) in self.features.iter().enumerate() {
            writer.begin_feature();
            generator(feature.as_ref(), &mut writer)?;

            let vertex_count = writer.feature_vertex_count();
            if vertex_count > tracker.limit() {
                return Err(BucketError::FeatureTooLarge {
                    feature_index,
                    vertex_count,
                });
            }

            let group = tracker.push_feature(vertex_count, writer.elements.len());
            let base = group.vertex_index;
            for element in &writer.elements {
                let relative: Vec<f64> = element.iter().map(|index| (index - base) as f64).collect();
                self.element_buffer.append(relative);
            }
        }

        let vertex_length = writer.next_vertex;

        self.element_groups = tracker.finish();
        self.vertex_length = vertex_length;
        self.element_length = self.element_buffer.len();
        self.state = BucketState::Populated;
        self.geometry_dirty = false;

        log::debug!(
            "built {} bucket for {:?} with {} vertices and {} elements in {} groups",
            self.layer_type,
            self.layer_ids(),
            self.vertex_length,
            self.element_length,
            self.element_groups.len()
        );

        Ok(())
    }

    /// Regenerates the named attribute groups. Geometry and elements are kept, unless features
    /// were queued since the last pass, in which case everything is rebuilt.
    ///
    /// Naming no groups is a no-op. Unknown groups are ignored.
    #[tracing::instrument(skip_all)]
    pub fn rebuild_groups(&mut self, groups: &[&str]) -> Result<(), BucketError> {
        if groups.is_empty() {
            return Ok(());
        }
        if self.geometry_dirty || self.state == BucketState::Empty {
            return self.build();
        }

        let known = self.groups();
        let requested: BTreeSet<String> = groups
            .iter()
            .filter(|group| {
                let is_known = known.contains(*group);
                if !is_known {
                    log::warn!("ignoring unknown attribute group {group}");
                }
                is_known
            })
            .map(|group| group.to_string())
            .collect();
        if requested.is_empty() {
            return Ok(());
        }

        let result = self.replay(&requested);
        if result.is_err() {
            self.reset();
            return result;
        }

        if let BucketState::Stale(stale) = &mut self.state {
            stale.retain(|group| !requested.contains(group));
            if stale.is_empty() {
                self.state = BucketState::Populated;
            }
        }

        log::debug!("rebuilt attribute groups {:?}", requested);
        Ok(())
    }

    fn replay(&mut self, groups: &BTreeSet<String>) -> Result<(), BucketError> {
        for group in groups {
            if let Some(buffer) = self.vertex_buffers.get_mut(group) {
                buffer.clear();
            }
        }

        let generator = self.program.generator;
        let mut writer = VertexWriter::new(
            &self.attributes,
            &mut self.vertex_buffers,
            Some(groups),
            self.program.mode.vertices_per_element(),
        );
        for feature in &self.features {
            writer.begin_feature();
            generator(feature.as_ref(), &mut writer)?;
        }

        assert_eq!(
            writer.next_vertex, self.vertex_length,
            "rebuilding attribute groups changed the number of vertices"
        );
        Ok(())
    }

    /// Marks attribute groups as outdated. They are regenerated by [`Bucket::rebuild_stale`] or
    /// before the bucket is serialized.
    pub fn request_rebuild(&mut self, groups: &[&str]) {
        let known = self.groups();
        for group in groups {
            if !known.contains(group) {
                log::warn!("ignoring rebuild request for unknown attribute group {group}");
                continue;
            }
            if self.state == BucketState::Populated {
                self.state = BucketState::Stale(BTreeSet::new());
            }
            if let BucketState::Stale(stale) = &mut self.state {
                stale.insert(group.to_string());
            }
        }
    }

    pub fn rebuild_stale(&mut self) -> Result<(), BucketError> {
        let BucketState::Stale(stale) = &self.state else {
            return Ok(());
        };
        let stale: Vec<String> = stale.iter().cloned().collect();
        let groups: Vec<&str> = stale.iter().map(String::as_str).collect();
        self.rebuild_groups(&groups)
    }

    /// Brings the buffers up to date with the queued features and the style.
    pub fn ensure_built(&mut self) -> Result<(), BucketError> {
        if self.state == BucketState::Empty || self.geometry_dirty {
            self.build()
        } else {
            self.rebuild_stale()
        }
    }

    /// Resolves all attributes again, after the zoom or the style of every layer changed. Every
    /// attribute group with a feature-varying value taken from the style is marked stale.
    pub fn restyle(&mut self) -> Result<(), ConfigError> {
        self.restyle_where(|attribute| attribute.from_style)
    }

    /// Resolves all attributes again. Vertex buffers keep their contents if their layout is
    /// unchanged and none of their attributes is `affected`, otherwise their group is marked
    /// stale.
    fn restyle_where(
        &mut self,
        affected: impl Fn(&ResolvedAttribute) -> bool,
    ) -> Result<(), ConfigError> {
        let attributes = resolve_attributes(
            &self.program.attributes,
            &self.layers,
            self.options.zoom,
            self.options.device_pixel_ratio,
        )?;
        let mut vertex_buffers =
            create_vertex_buffers(&attributes, self.options.initial_buffer_size)?;

        let mut stale = BTreeSet::new();
        for (group, buffer) in vertex_buffers.iter_mut() {
            let previous = self
                .vertex_buffers
                .remove(group)
                .filter(|previous| previous.layout() == buffer.layout());
            let Some(previous) = previous else {
                stale.insert(group.clone());
                continue;
            };
            *buffer = previous;

            if attributes.iter().any(|attribute| {
                attribute.group == group.as_str()
                    && !attribute.is_feature_constant()
                    && affected(attribute)
            }) {
                stale.insert(group.clone());
            }
        }
        self.vertex_buffers = vertex_buffers;
        self.attributes = attributes;

        if self.state == BucketState::Empty {
            return Ok(());
        }
        if let BucketState::Stale(groups) = &self.state {
            stale.extend(
                groups
                    .iter()
                    .filter(|group| self.vertex_buffers.contains_key(*group))
                    .cloned(),
            );
        }
        if !stale.is_empty() {
            log::debug!("restyling marked attribute groups {:?} stale", stale);
        }
        self.state = if stale.is_empty() {
            BucketState::Populated
        } else {
            BucketState::Stale(stale)
        };
        Ok(())
    }

    pub fn set_paint_property(
        &mut self,
        layer_id: &str,
        property: &str,
        function: PropertyFunction,
    ) -> Result<(), ConfigError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id == layer_id)
            .ok_or_else(|| ConfigError::UnknownLayer(layer_id.to_owned()))?
            .set_paint_property(property, function);
        self.restyle_where(|attribute| attribute.reads_property(layer_id, property))
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<(), ConfigError> {
        self.options.zoom = zoom;
        self.restyle()
    }

    /// Whether the byte stores were handed out.
    pub fn is_released(&self) -> bool {
        self.element_buffer.is_released()
    }

    fn reset(&mut self) {
        if !self.is_released() {
            self.element_buffer.clear();
            for buffer in self.vertex_buffers.values_mut() {
                buffer.clear();
            }
        }
        self.element_groups.clear();
        self.vertex_length = 0;
        self.element_length = 0;
        self.state = BucketState::Empty;
        self.geometry_dirty = true;
    }
}

pub(crate) fn varying_groups(attributes: &[ResolvedAttribute]) -> Vec<&'static str> {
    let mut groups = Vec::new();
    for attribute in attributes {
        if !attribute.is_feature_constant() && !groups.contains(&attribute.group) {
            groups.push(attribute.group);
        }
    }
    groups
}

pub(crate) fn create_vertex_buffers(
    attributes: &[ResolvedAttribute],
    size: usize,
) -> Result<BTreeMap<String, TypedBuffer>, ConfigError> {
    varying_groups(attributes)
        .into_iter()
        .map(|group| {
            let descriptors: Vec<AttributeDescriptor> = attributes
                .iter()
                .filter(|attribute| !attribute.is_feature_constant() && attribute.group == group)
                .map(|attribute| {
                    AttributeDescriptor::new(
                        attribute.buffer_name.clone(),
                        attribute.components,
                        attribute.attribute_type,
                    )
                })
                .collect();
            let buffer = TypedBuffer::with_size(BufferKind::Vertex, &descriptors, size)?;
            Ok((group.to_owned(), buffer))
        })
        .collect()
}

fn create_element_buffer(mode: DrawMode, size: usize) -> Result<TypedBuffer, ConfigError> {
    TypedBuffer::with_size(
        BufferKind::Element,
        &[AttributeDescriptor::new(
            ELEMENT_ATTRIBUTE_NAME,
            mode.vertices_per_element(),
            ELEMENT_ATTRIBUTE_TYPE,
        )],
        size,
    )
}

/// Writes the vertices of one generation pass. Elements are collected per feature, since their
/// indices can only be made relative once the element group of the feature is known.
struct VertexWriter<'a> {
    attributes: &'a [ResolvedAttribute],
    buffers: &'a mut BTreeMap<String, TypedBuffer>,
    /// Groups to write, all if `None`
    groups: Option<&'a BTreeSet<String>>,
    vertices_per_element: usize,
    next_vertex: usize,
    feature_start: usize,
    elements: Vec<Vec<usize>>,
}

impl<'a> VertexWriter<'a> {
    fn new(
        attributes: &'a [ResolvedAttribute],
        buffers: &'a mut BTreeMap<String, TypedBuffer>,
        groups: Option<&'a BTreeSet<String>>,
        vertices_per_element: usize,
    ) -> Self {
        Self {
            attributes,
            buffers,
            groups,
            vertices_per_element,
            next_vertex: 0,
            feature_start: 0,
            elements: Vec::new(),
        }
    }

    fn begin_feature(&mut self) {
        self.feature_start = self.next_vertex;
        self.elements.clear();
    }

    fn feature_vertex_count(&self) -> usize {
        self.next_vertex - self.feature_start
    }
}

impl BucketWriter for VertexWriter<'_> {
    fn add_vertex(&mut self, vertex: Vertex<'_>) -> usize {
        let index = self.next_vertex;

        for attribute in self.attributes {
            let AttributeValue::PerVertex(function) = &attribute.value else {
                continue;
            };
            if let Some(groups) = self.groups {
                if !groups.contains(attribute.group) {
                    continue;
                }
            }

            let buffer = self
                .buffers
                .get_mut(attribute.group)
                .unwrap_or_else(|| panic!("no vertex buffer for group {}", attribute.group));
            buffer.set_attribute(index, &attribute.buffer_name, &function(&vertex));
        }

        self.next_vertex += 1;
        index
    }

    fn add_element(&mut self, vertices: &[usize]) {
        assert_eq!(
            vertices.len(),
            self.vertices_per_element,
            "primitive has the wrong number of vertices"
        );
        assert!(
            vertices
                .iter()
                .all(|index| (self.feature_start..self.next_vertex).contains(index)),
            "primitive references vertices of another feature"
        );
        self.elements.push(vertices.to_vec());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use serde_json::json;

    use super::*;
    use crate::{
        attribute::{AttributeContext, AttributeSource, AttributeSpec},
        buffer::AttributeType,
        element_groups::ELEMENT_GROUP_VERTEX_LENGTH,
        feature::{GeometryCoordinate, Properties, VectorFeature},
    };

    /// Emits one vertex and one degenerate triangle per point.
    pub(crate) fn generate_points(
        feature: &dyn Feature,
        writer: &mut dyn BucketWriter,
    ) -> Result<(), BucketError> {
        for point in feature.load_geometry().iter().flatten() {
            let index = writer.add_vertex(Vertex {
                geometry: *point,
                extrude: [0.0, 0.0],
                properties: feature.properties(),
            });
            writer.add_element(&[index, index, index]);
        }
        Ok(())
    }

    pub(crate) fn point_program(attributes: Vec<AttributeSpec>) -> LayerProgram {
        LayerProgram {
            attributes,
            generator: generate_points,
            shader: "pointShader",
            mode: DrawMode::Triangles,
            disable_stencil_test: true,
        }
    }

    fn position() -> AttributeSpec {
        AttributeSpec::new(
            "pos",
            2,
            AttributeType::Short,
            AttributeSource::Vertex(Arc::new(|vertex: &Vertex<'_>| {
                vec![vertex.geometry.x as f64, vertex.geometry.y as f64]
            })),
        )
        .shared()
    }

    fn counting_vertex_attribute(name: &'static str, counter: Arc<AtomicUsize>) -> AttributeSpec {
        AttributeSpec::new(
            name,
            1,
            AttributeType::UnsignedByte,
            AttributeSource::Vertex(Arc::new(move |_: &Vertex<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                vec![1.0]
            })),
        )
    }

    pub(crate) fn circle_layers() -> Vec<StyleLayer> {
        serde_json::from_value(json!([
            {"id": "map", "type": "circle", "paint": {"circle-color": "#ff0000"}},
            {
                "id": "box",
                "type": "circle",
                "paint": {
                    "circle-color": {
                        "property": "boxiness",
                        "domain": [0, 1],
                        "range": ["#ff0000", "#0000ff"]
                    }
                }
            }
        ]))
        .unwrap()
    }

    pub(crate) fn boxy_point(x: i32, y: i32, boxiness: f64) -> VectorFeature {
        VectorFeature::point(x, y).with_property("boxiness", boxiness)
    }

    fn color(bucket: &Bucket, layer_id: &str, vertex: usize) -> Vec<f64> {
        bucket
            .vertex_buffer("color")
            .unwrap()
            .get_attribute(vertex, &format!("{layer_id}::color"))
    }

    #[test]
    fn test_constant_and_varying_attributes() {
        let program = point_program(vec![
            position(),
            AttributeSpec::new(
                "color",
                4,
                AttributeType::UnsignedByte,
                AttributeSource::Constant(vec![255.0, 0.0, 0.0, 255.0]),
            ),
        ]);
        let mut bucket = Bucket::with_program(
            LayerType::Circle,
            program,
            vec![StyleLayer::new("points", LayerType::Circle)],
            BucketOptions::default(),
        )
        .unwrap();
        for (x, y) in [(1, 2), (3, 4), (5, 6)] {
            bucket.queue_feature(VectorFeature::point(x, y));
        }

        bucket.build().unwrap();

        assert_eq!(bucket.groups(), vec!["pos"]);
        assert_eq!(bucket.vertex_buffers().len(), 1);
        let positions = bucket.vertex_buffer("pos").unwrap();
        assert_eq!(positions.len(), 3);
        assert!(positions.attribute("color").is_none());
        assert!(positions.attribute("points::color").is_none());
        assert_eq!(positions.get_attribute(0, "pos"), vec![1.0, 2.0]);
        assert_eq!(positions.get_attribute(2, "pos"), vec![5.0, 6.0]);
        assert_eq!(
            bucket.element_groups(),
            &[ElementGroup {
                vertex_index: 0,
                element_index: 0,
                vertex_length: 3,
                element_length: 3,
            }]
        );
        assert_eq!(
            bucket.attribute_value(
                "color",
                Some("points"),
                &Vertex {
                    geometry: GeometryCoordinate { x: 0, y: 0 },
                    extrude: [0.0, 0.0],
                    properties: &Properties::new(),
                }
            ),
            Some(vec![255.0, 0.0, 0.0, 255.0])
        );
    }

    #[test]
    fn test_split_into_element_groups() {
        let mut bucket = Bucket::new(
            LayerType::Circle,
            circle_layers(),
            BucketOptions::default(),
        )
        .unwrap();
        for i in 0..20_000 {
            bucket.queue_feature(boxy_point(i % 4096, i / 4096, 0.5));
        }

        bucket.build().unwrap();

        assert_eq!(bucket.vertex_length(), 80_000);
        assert_eq!(bucket.element_length(), 40_000);
        let groups = bucket.element_groups();
        assert!(groups.len() >= 2);

        let mut vertex_index = 0;
        let mut element_index = 0;
        for group in groups {
            assert_eq!(group.vertex_index, vertex_index);
            assert_eq!(group.element_index, element_index);
            assert!(group.vertex_length <= ELEMENT_GROUP_VERTEX_LENGTH);
            assert_eq!(group.vertex_index % 4, 0);
            assert_eq!(group.vertex_length % 4, 0);
            vertex_index = group.vertex_end();
            element_index = group.element_end();
        }
        assert_eq!(vertex_index, 80_000);
        assert_eq!(element_index, 40_000);

        // Indices restart at every group.
        let second = groups[1];
        assert_eq!(second.vertex_index, 65_532);
        assert_eq!(
            bucket
                .element_buffer()
                .get_attribute(second.element_index, ELEMENT_ATTRIBUTE_NAME),
            vec![0.0, 1.0, 2.0]
        );
        assert_eq!(
            bucket
                .element_buffer()
                .get_attribute(second.element_index - 1, ELEMENT_ATTRIBUTE_NAME),
            vec![65_528.0, 65_531.0, 65_530.0]
        );
    }

    #[test]
    fn test_feature_constant_attribute_is_resolved_once() {
        let resolutions = Arc::new(AtomicUsize::new(0));
        let evaluations = Arc::new(AtomicUsize::new(0));
        let counter = resolutions.clone();
        let program = point_program(vec![
            position(),
            AttributeSpec::new(
                "opacity",
                1,
                AttributeType::UnsignedByte,
                AttributeSource::Layer(Arc::new(
                    move |_: &AttributeContext<'_>| -> Result<AttributeValue, ConfigError> {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(AttributeValue::Constant(vec![255.0]))
                    },
                )),
            ),
            counting_vertex_attribute("size", evaluations.clone()),
        ]);
        let mut bucket = Bucket::with_program(
            LayerType::Circle,
            program,
            vec![StyleLayer::new("points", LayerType::Circle)],
            BucketOptions::default(),
        )
        .unwrap();
        for i in 0..100 {
            bucket.queue_feature(VectorFeature::point(i, i));
        }

        bucket.build().unwrap();

        assert_eq!(resolutions.load(Ordering::SeqCst), 1);
        assert_eq!(evaluations.load(Ordering::SeqCst), 100);
        assert!(bucket.vertex_buffer("opacity").is_none());
    }

    #[test]
    fn test_reject_oversized_feature() {
        fn generate_many(
            feature: &dyn Feature,
            writer: &mut dyn BucketWriter,
        ) -> Result<(), BucketError> {
            let count = feature.properties()["vertices"].as_u64().unwrap() as usize;
            for _ in 0..count {
                let index = writer.add_vertex(Vertex {
                    geometry: GeometryCoordinate { x: 0, y: 0 },
                    extrude: [0.0, 0.0],
                    properties: feature.properties(),
                });
                writer.add_element(&[index, index, index]);
            }
            Ok(())
        }

        let mut program = point_program(vec![position()]);
        program.generator = generate_many;
        let mut bucket = Bucket::with_program(
            LayerType::Circle,
            program,
            vec![],
            BucketOptions::default(),
        )
        .unwrap();
        bucket.queue_feature(VectorFeature::default().with_property("vertices", 10));
        bucket.queue_feature(VectorFeature::default().with_property("vertices", 70_000));

        let error = bucket.build().unwrap_err();

        assert!(matches!(
            error,
            BucketError::FeatureTooLarge {
                feature_index: 1,
                vertex_count: 70_000
            }
        ));
        assert_eq!(bucket.state(), &BucketState::Empty);
        assert_eq!(bucket.feature_count(), 2);
        assert!(bucket.element_groups().is_empty());

        bucket.remove_feature(1);
        bucket.build().unwrap();
        assert_eq!(bucket.vertex_length(), 10);
    }

    #[test]
    fn test_rebuild_requested_groups_only() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let program = point_program(vec![
            position(),
            counting_vertex_attribute("a", a.clone()),
            counting_vertex_attribute("b", b.clone()),
        ]);
        let mut bucket = Bucket::with_program(
            LayerType::Circle,
            program,
            vec![StyleLayer::new("points", LayerType::Circle)],
            BucketOptions::default(),
        )
        .unwrap();
        for i in 0..10 {
            bucket.queue_feature(VectorFeature::point(i, i));
        }
        bucket.build().unwrap();
        assert_eq!(bucket.groups(), vec!["pos", "a", "b"]);

        bucket.rebuild_groups(&[]).unwrap();
        bucket.rebuild_stale().unwrap();
        assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (10, 10));

        bucket.request_rebuild(&["b", "unknown"]);
        assert_eq!(
            bucket.state(),
            &BucketState::Stale(BTreeSet::from(["b".to_owned()]))
        );

        bucket.rebuild_stale().unwrap();
        assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (10, 20));
        assert_eq!(bucket.state(), &BucketState::Populated);
        assert_eq!(bucket.vertex_buffer("b").unwrap().len(), 10);
    }

    #[test]
    fn test_queue_after_build_forces_full_pass() {
        let mut bucket = Bucket::new(
            LayerType::Circle,
            circle_layers(),
            BucketOptions::default(),
        )
        .unwrap();
        bucket.queue_feature(boxy_point(1, 1, 0.0));
        bucket.build().unwrap();

        bucket.queue_feature(boxy_point(2, 2, 1.0));
        bucket.rebuild_groups(&["color"]).unwrap();

        assert_eq!(bucket.vertex_length(), 8);
        assert_eq!(bucket.element_length(), 4);
        assert_eq!(color(&bucket, "box", 4), vec![0.0, 0.0, 255.0, 255.0]);
    }

    #[test]
    fn test_groups_follow_style() {
        let bucket = Bucket::new(
            LayerType::Circle,
            circle_layers()[..1].to_vec(),
            BucketOptions::default(),
        )
        .unwrap();
        assert_eq!(bucket.groups(), vec!["pos"]);

        let bucket = Bucket::new(
            LayerType::Circle,
            circle_layers(),
            BucketOptions::default(),
        )
        .unwrap();
        assert_eq!(bucket.groups(), vec!["pos", "color"]);
        assert_eq!(
            bucket
                .vertex_buffer("color")
                .unwrap()
                .attributes()
                .iter()
                .map(|attribute| attribute.name.as_str())
                .collect::<Vec<_>>(),
            vec!["box::color"]
        );
    }

    #[test]
    fn test_set_paint_property_restyles() {
        let mut bucket = Bucket::new(
            LayerType::Circle,
            circle_layers(),
            BucketOptions::default(),
        )
        .unwrap();
        bucket.queue_feature(boxy_point(1, 1, 0.5));
        bucket.build().unwrap();
        assert_eq!(color(&bucket, "box", 0), vec![127.0, 0.0, 127.0, 255.0]);

        bucket
            .set_paint_property(
                "map",
                "circle-color",
                PropertyFunction::from_json(
                    "circle-color",
                    &json!({"property": "boxiness", "domain": [0, 1], "range": ["#00ff00", "#0000ff"]}),
                )
                .unwrap(),
            )
            .unwrap();
        assert_eq!(
            bucket.state(),
            &BucketState::Stale(BTreeSet::from(["color".to_owned()]))
        );
        assert_eq!(bucket.vertex_buffer("pos").unwrap().len(), 4);

        bucket.rebuild_stale().unwrap();

        assert_eq!(bucket.state(), &BucketState::Populated);
        assert_eq!(color(&bucket, "map", 0), vec![0.0, 127.0, 127.0, 255.0]);
        assert_eq!(color(&bucket, "box", 0), vec![127.0, 0.0, 127.0, 255.0]);
        assert_eq!(bucket.vertex_length(), 4);

        assert_eq!(
            bucket
                .set_paint_property(
                    "missing",
                    "circle-color",
                    PropertyFunction::from_json("circle-color", &json!("#000")).unwrap()
                )
                .unwrap_err(),
            ConfigError::UnknownLayer("missing".to_owned())
        );
    }

    #[test]
    fn test_restyle_keeps_unaffected_groups() {
        let mut bucket = Bucket::new(
            LayerType::Circle,
            circle_layers(),
            BucketOptions::default(),
        )
        .unwrap();
        bucket.queue_feature(boxy_point(1, 1, 0.5));
        bucket.build().unwrap();
        let positions = bucket.vertex_buffer("pos").unwrap().get_attribute(2, "pos");

        bucket
            .set_paint_property(
                "box",
                "circle-opacity",
                PropertyFunction::from_json("circle-opacity", &json!(0.5)).unwrap(),
            )
            .unwrap();

        assert_eq!(bucket.state(), &BucketState::Populated);
        assert_eq!(bucket.vertex_buffer("pos").unwrap().len(), 4);
        assert_eq!(bucket.vertex_buffer("pos").unwrap().get_attribute(2, "pos"), positions);
        assert_eq!(color(&bucket, "box", 0), vec![127.0, 0.0, 127.0, 255.0]);
        assert_eq!(
            bucket.attribute_value(
                "opacity",
                Some("box"),
                &Vertex {
                    geometry: GeometryCoordinate { x: 0, y: 0 },
                    extrude: [0.0, 0.0],
                    properties: &Properties::new(),
                }
            ),
            Some(vec![127.5])
        );

        bucket
            .set_paint_property(
                "box",
                "circle-color",
                PropertyFunction::from_json(
                    "circle-color",
                    &json!({"property": "boxiness", "domain": [0, 1], "range": ["#000000", "#ffffff"]}),
                )
                .unwrap(),
            )
            .unwrap();
        assert_eq!(
            bucket.state(),
            &BucketState::Stale(BTreeSet::from(["color".to_owned()]))
        );
        bucket.rebuild_stale().unwrap();
        assert_eq!(color(&bucket, "box", 0), vec![127.0, 127.0, 127.0, 255.0]);

        bucket.set_zoom(10.0).unwrap();
        assert_eq!(
            bucket.state(),
            &BucketState::Stale(BTreeSet::from(["color".to_owned()]))
        );
    }

    #[test]
    fn test_short_values_do_not_leak_between_passes() {
        let layers: Vec<StyleLayer> = serde_json::from_value(json!([{
            "id": "kinds",
            "type": "circle",
            "paint": {
                "circle-color": {"property": "kind", "stops": [["a", "#ff0000"]], "default": 0}
            }
        }]))
        .unwrap();
        let mut bucket = Bucket::new(LayerType::Circle, layers, BucketOptions::default()).unwrap();
        bucket.queue_feature(VectorFeature::point(1, 1).with_property("kind", "a"));
        bucket.queue_feature(VectorFeature::point(2, 2).with_property("kind", "b"));
        bucket.build().unwrap();
        assert_eq!(color(&bucket, "kinds", 0), vec![255.0, 0.0, 0.0, 255.0]);
        assert_eq!(color(&bucket, "kinds", 4), vec![0.0, 0.0, 0.0, 0.0]);

        bucket.remove_feature(0);
        bucket.build().unwrap();

        assert_eq!(bucket.vertex_length(), 4);
        assert_eq!(color(&bucket, "kinds", 0), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mixed_layer_types() {
        let layers = vec![
            StyleLayer::new("circles", LayerType::Circle),
            StyleLayer::new("lines", LayerType::Line),
        ];

        assert!(matches!(
            Bucket::new(LayerType::Circle, layers, BucketOptions::default()),
            Err(ConfigError::UnsupportedLayerType(_))
        ));
    }

    #[test]
    fn test_fill_and_line_buckets() {
        let square = VectorFeature::new(
            vec![vec![
                GeometryCoordinate { x: 0, y: 0 },
                GeometryCoordinate { x: 10, y: 0 },
                GeometryCoordinate { x: 10, y: 10 },
                GeometryCoordinate { x: 0, y: 10 },
            ]],
            Properties::new(),
        );

        for layer_type in [LayerType::Fill, LayerType::Line] {
            let mut bucket = Bucket::new(
                layer_type,
                vec![StyleLayer::new("shape", layer_type)],
                BucketOptions::default(),
            )
            .unwrap();
            bucket.queue_feature(square.clone());
            bucket.build().unwrap();

            assert!(bucket.vertex_length() >= 4);
            assert_eq!(bucket.element_groups().len(), 1);
            assert_eq!(bucket.element_groups()[0].vertex_length, bucket.vertex_length());
        }
    }
}
