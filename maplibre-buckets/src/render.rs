//! Uploading buckets to a graphics device and issuing their draw calls.

use std::collections::BTreeMap;

use crate::{
    attribute::{AttributeValue, ResolvedAttribute},
    bucket::Bucket,
    buffer::{AttributeLayout, BufferKind, BufferLayout, TypedBuffer},
    element_groups::ElementGroup,
    error::BucketError,
    layer_type::{DrawMode, LayerType},
};

/// The operations of a graphics device which are needed to draw buckets.
pub trait GraphicsContext {
    /// Handle of an uploaded buffer
    type Buffer;

    /// Uploads an immutable copy of `data`.
    fn upload(&mut self, kind: BufferKind, data: &[u8]) -> Self::Buffer;

    fn delete_buffer(&mut self, buffer: Self::Buffer);

    /// Slot of the attribute `name` in `shader`, `None` if the shader does not declare it.
    fn attribute_location(&self, shader: &str, name: &str) -> Option<u32>;

    /// Binds a value which is the same for every vertex.
    fn set_constant_attribute(&mut self, location: u32, value: &[f64]);

    fn bind_element_buffer(&mut self, buffer: &Self::Buffer);

    /// Binds one attribute of a vertex buffer, starting at the vertex `vertex_offset`.
    fn bind_vertex_attribute(
        &mut self,
        buffer: &Self::Buffer,
        location: u32,
        attribute: &AttributeLayout,
        stride: usize,
        vertex_offset: usize,
    );

    fn set_stencil_test(&mut self, enabled: bool);

    fn draw_indexed(&mut self, mode: DrawMode, index_count: usize, index_byte_offset: usize);
}

/// A buffer which lives on the graphics device.
#[derive(Debug)]
pub struct UploadedBuffer<B> {
    pub buffer: B,
    pub layout: BufferLayout,
    /// Number of elements
    pub length: usize,
}

impl<B> UploadedBuffer<B> {
    fn upload<C>(context: &mut C, buffer: &TypedBuffer) -> Self
    where
        C: GraphicsContext<Buffer = B>,
    {
        Self {
            buffer: context.upload(buffer.kind(), buffer.used_bytes()),
            layout: buffer.layout().clone(),
            length: buffer.len(),
        }
    }
}

/// A bucket whose buffers were uploaded. It can only be drawn.
#[derive(Debug)]
pub struct RenderBucket<B> {
    layer_type: LayerType,
    layer_ids: Vec<String>,
    shader: &'static str,
    mode: DrawMode,
    disable_stencil_test: bool,
    attributes: Vec<ResolvedAttribute>,
    element_buffer: UploadedBuffer<B>,
    vertex_buffers: BTreeMap<String, UploadedBuffer<B>>,
    element_groups: Vec<ElementGroup>,
    element_length: usize,
}

impl Bucket {
    /// Brings the buffers up to date and uploads them. The CPU side storage is dropped
    /// afterwards.
    #[tracing::instrument(skip_all)]
    pub fn upload<C: GraphicsContext>(
        mut self,
        context: &mut C,
    ) -> Result<RenderBucket<C::Buffer>, BucketError> {
        if self.is_released() {
            return Err(BucketError::Released);
        }
        self.ensure_built()?;

        let element_buffer = UploadedBuffer::upload(context, &self.element_buffer);
        let vertex_buffers = self
            .vertex_buffers
            .iter()
            .map(|(group, buffer)| (group.clone(), UploadedBuffer::upload(context, buffer)))
            .collect();

        log::debug!(
            "uploaded {} bucket for {:?} with {} vertex buffers",
            self.layer_type,
            self.layer_ids(),
            self.vertex_buffers.len()
        );

        Ok(RenderBucket {
            layer_type: self.layer_type,
            layer_ids: self.layer_ids(),
            shader: self.program.shader,
            mode: self.program.mode,
            disable_stencil_test: self.program.disable_stencil_test,
            attributes: self.attributes,
            element_buffer,
            vertex_buffers,
            element_groups: self.element_groups,
            element_length: self.element_length,
        })
    }
}

impl<B> RenderBucket<B> {
    pub fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    pub fn layer_ids(&self) -> &[String] {
        &self.layer_ids
    }

    pub fn element_groups(&self) -> &[ElementGroup] {
        &self.element_groups
    }

    pub fn is_empty(&self) -> bool {
        self.element_length == 0
    }

    /// Draws the layer `layer_id`, one draw call per element group.
    ///
    /// # Panics
    ///
    /// If the bucket does not contain the layer or the shader lacks one of the attributes.
    pub fn draw<C>(&self, context: &mut C, layer_id: &str)
    where
        C: GraphicsContext<Buffer = B>,
    {
        assert!(
            self.layer_ids.iter().any(|id| id == layer_id),
            "bucket has no layer {layer_id}"
        );
        if self.is_empty() {
            return;
        }

        context.set_stencil_test(!self.disable_stencil_test);

        for attribute in self
            .attributes
            .iter()
            .filter(|attribute| attribute.applies_to(layer_id))
        {
            if let AttributeValue::Constant(value) = &attribute.value {
                let location = self.location(context, attribute);
                context.set_constant_attribute(location, value);
            }
        }

        let index_stride = self.element_buffer.layout.element_stride;
        let vertices_per_element = self.mode.vertices_per_element();

        for group in &self.element_groups {
            context.bind_element_buffer(&self.element_buffer.buffer);

            for uploaded in self.vertex_buffers.values() {
                for layout in &uploaded.layout.attributes {
                    let Some(attribute) = self
                        .attributes
                        .iter()
                        .find(|attribute| attribute.buffer_name == layout.name)
                    else {
                        continue;
                    };
                    if !attribute.applies_to(layer_id) {
                        continue;
                    }

                    let location = self.location(context, attribute);
                    context.bind_vertex_attribute(
                        &uploaded.buffer,
                        location,
                        layout,
                        uploaded.layout.element_stride,
                        group.vertex_index,
                    );
                }
            }

            context.draw_indexed(
                self.mode,
                group.element_length * vertices_per_element,
                group.element_index * index_stride,
            );
        }
    }

    /// Deletes all uploaded buffers.
    pub fn destroy<C>(self, context: &mut C)
    where
        C: GraphicsContext<Buffer = B>,
    {
        context.delete_buffer(self.element_buffer.buffer);
        for uploaded in self.vertex_buffers.into_values() {
            context.delete_buffer(uploaded.buffer);
        }
    }

    fn location<C: GraphicsContext>(&self, context: &C, attribute: &ResolvedAttribute) -> u32 {
        let name = attribute.shader_name();
        context
            .attribute_location(self.shader, &name)
            .unwrap_or_else(|| panic!("shader {} has no attribute {name}", self.shader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bucket::{
            tests::{boxy_point, circle_layers},
            BucketOptions,
        },
        layer_type::LayerType,
        transfer::SerializedBucket,
    };

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Upload(BufferKind, usize),
        Delete(usize),
        Constant(u32, Vec<f64>),
        BindElements(usize),
        BindAttribute {
            buffer: usize,
            location: u32,
            name: String,
            stride: usize,
            vertex_offset: usize,
        },
        StencilTest(bool),
        Draw(usize, usize),
    }

    /// Records every call. Buffers are numbered in upload order.
    struct RecordingContext {
        calls: Vec<Call>,
        uploaded: usize,
        locations: Vec<&'static str>,
    }

    impl RecordingContext {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                uploaded: 0,
                locations: vec!["a_pos", "a_size", "a_blur", "a_color", "a_opacity"],
            }
        }

        fn draws(&self) -> Vec<&Call> {
            self.calls
                .iter()
                .filter(|call| matches!(call, Call::Draw(..)))
                .collect()
        }
    }

    impl GraphicsContext for RecordingContext {
        type Buffer = usize;

        fn upload(&mut self, kind: BufferKind, data: &[u8]) -> usize {
            self.calls.push(Call::Upload(kind, data.len()));
            self.uploaded += 1;
            self.uploaded - 1
        }

        fn delete_buffer(&mut self, buffer: usize) {
            self.calls.push(Call::Delete(buffer));
        }

        fn attribute_location(&self, shader: &str, name: &str) -> Option<u32> {
            assert_eq!(shader, "circleShader");
            self.locations
                .iter()
                .position(|location| *location == name)
                .map(|position| position as u32)
        }

        fn set_constant_attribute(&mut self, location: u32, value: &[f64]) {
            self.calls.push(Call::Constant(location, value.to_vec()));
        }

        fn bind_element_buffer(&mut self, buffer: &usize) {
            self.calls.push(Call::BindElements(*buffer));
        }

        fn bind_vertex_attribute(
            &mut self,
            buffer: &usize,
            location: u32,
            attribute: &AttributeLayout,
            stride: usize,
            vertex_offset: usize,
        ) {
            self.calls.push(Call::BindAttribute {
                buffer: *buffer,
                location,
                name: attribute.name.clone(),
                stride,
                vertex_offset,
            });
        }

        fn set_stencil_test(&mut self, enabled: bool) {
            self.calls.push(Call::StencilTest(enabled));
        }

        fn draw_indexed(&mut self, mode: DrawMode, index_count: usize, index_byte_offset: usize) {
            assert_eq!(mode, DrawMode::Triangles);
            self.calls.push(Call::Draw(index_count, index_byte_offset));
        }
    }

    fn circle_bucket(features: i32) -> Bucket {
        let mut bucket = Bucket::new(
            LayerType::Circle,
            circle_layers(),
            BucketOptions::default(),
        )
        .unwrap();
        for i in 0..features {
            bucket.queue_feature(boxy_point(i % 4096, i / 4096, 1.0));
        }
        bucket
    }

    #[test]
    fn test_upload_used_bytes() {
        let mut context = RecordingContext::new();

        let render_bucket = circle_bucket(2).upload(&mut context).unwrap();

        // Elements are 3 indices of 2 bytes, `box::color` is padded to 4 bytes and `pos` holds
        // 2 shorts.
        assert_eq!(
            context.calls,
            vec![
                Call::Upload(BufferKind::Element, 4 * 6),
                Call::Upload(BufferKind::Vertex, 8 * 4),
                Call::Upload(BufferKind::Vertex, 8 * 4),
            ]
        );
        assert_eq!(render_bucket.layer_ids(), &["map", "box"]);
        assert_eq!(render_bucket.element_groups().len(), 1);
    }

    #[test]
    fn test_draw_layer() {
        let mut context = RecordingContext::new();
        let render_bucket = circle_bucket(2).upload(&mut context).unwrap();
        context.calls.clear();

        render_bucket.draw(&mut context, "box");

        assert_eq!(
            context.calls,
            vec![
                Call::StencilTest(false),
                Call::Constant(1, vec![50.0]),
                Call::Constant(2, vec![2.0]),
                Call::Constant(4, vec![255.0]),
                Call::BindElements(0),
                Call::BindAttribute {
                    buffer: 1,
                    location: 3,
                    name: "box::color".to_owned(),
                    stride: 4,
                    vertex_offset: 0,
                },
                Call::BindAttribute {
                    buffer: 2,
                    location: 0,
                    name: "pos".to_owned(),
                    stride: 4,
                    vertex_offset: 0,
                },
                Call::Draw(12, 0),
            ]
        );
    }

    #[test]
    fn test_draw_constant_layer() {
        let mut context = RecordingContext::new();
        let render_bucket = circle_bucket(2).upload(&mut context).unwrap();
        context.calls.clear();

        render_bucket.draw(&mut context, "map");

        assert!(context
            .calls
            .contains(&Call::Constant(3, vec![255.0, 0.0, 0.0, 255.0])));
        assert!(!context.calls.iter().any(
            |call| matches!(call, Call::BindAttribute { name, .. } if name == "box::color")
        ));
    }

    #[test]
    fn test_one_draw_call_per_group() {
        let mut context = RecordingContext::new();
        let render_bucket = circle_bucket(20_000).upload(&mut context).unwrap();
        let groups = render_bucket.element_groups().to_vec();
        context.calls.clear();

        render_bucket.draw(&mut context, "box");

        let draws = context.draws();
        assert_eq!(draws.len(), groups.len());
        assert_eq!(*draws[0], Call::Draw(groups[0].element_length * 3, 0));
        assert_eq!(
            *draws[1],
            Call::Draw(groups[1].element_length * 3, groups[1].element_index * 6)
        );
        assert!(context.calls.contains(&Call::BindAttribute {
            buffer: 2,
            location: 0,
            name: "pos".to_owned(),
            stride: 4,
            vertex_offset: 65_532,
        }));
    }

    #[test]
    fn test_empty_bucket_draws_nothing() {
        let mut context = RecordingContext::new();
        let render_bucket = circle_bucket(0).upload(&mut context).unwrap();
        context.calls.clear();

        render_bucket.draw(&mut context, "map");

        assert!(render_bucket.is_empty());
        assert!(context.calls.is_empty());
    }

    #[test]
    #[should_panic(expected = "has no attribute a_opacity")]
    fn test_missing_shader_attribute() {
        let mut context = RecordingContext::new();
        context.locations.retain(|location| *location != "a_opacity");
        let render_bucket = circle_bucket(1).upload(&mut context).unwrap();

        render_bucket.draw(&mut context, "map");
    }

    #[test]
    fn test_destroy() {
        let mut context = RecordingContext::new();
        let render_bucket = circle_bucket(1).upload(&mut context).unwrap();
        context.calls.clear();

        render_bucket.destroy(&mut context);

        assert_eq!(
            context.calls,
            vec![Call::Delete(0), Call::Delete(1), Call::Delete(2)]
        );
    }

    #[test]
    fn test_upload_transferred_bucket() {
        let json = circle_bucket(3).into_transferable().unwrap().to_json().unwrap();
        let serialized = SerializedBucket::from_json(&json).unwrap();
        let bucket =
            Bucket::from_serialized(serialized, &circle_layers(), BucketOptions::default())
                .unwrap();
        let mut context = RecordingContext::new();

        let render_bucket = bucket.upload(&mut context).unwrap();
        render_bucket.draw(&mut context, "box");

        assert_eq!(context.draws(), vec![&Call::Draw(18, 0)]);
    }
}
