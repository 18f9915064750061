//! A growable byte buffer with named, typed attributes per element.
//!
//! A [`TypedBuffer`] owns one contiguous byte store which holds `write_cursor` elements of
//! `element_stride` bytes each. Every element consists of one or more attributes, each made of
//! `components` values of one [`AttributeType`]. The layout is computed once when the buffer is
//! created and never changes afterwards, so graphics bindings can rely on the stride and offsets.

use std::{collections::BTreeMap, fmt, str::FromStr};

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub mod snapshot;

pub use snapshot::TypedBufferSnapshot;

/// Default size of a newly created byte store.
pub const SIZE_DEFAULT: usize = 8192;

/// Every byte store size is a multiple of this.
pub const SIZE_ALIGNMENT: usize = 2;

/// Offsets of attributes within a vertex are aligned to this.
pub const VERTEX_ATTRIBUTE_ALIGNMENT: usize = 4;

/// Factor by which the byte store grows once it is full.
pub const GROWTH_FACTOR: f64 = 1.5;

/// Name of the implicit attribute of element buffers.
pub const ELEMENT_ATTRIBUTE_NAME: &str = "vertices";

/// Component type of the indices in element buffers.
pub const ELEMENT_ATTRIBUTE_TYPE: AttributeType = AttributeType::UnsignedShort;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferKind {
    #[serde(rename = "ARRAY_BUFFER")]
    Vertex,
    #[serde(rename = "ELEMENT_ARRAY_BUFFER")]
    Element,
}

/// The component types which can be stored in a [`TypedBuffer`].
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum AttributeType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
}

impl AttributeType {
    /// Size of one component in bytes.
    pub const fn size(&self) -> usize {
        match self {
            AttributeType::Byte | AttributeType::UnsignedByte => 1,
            AttributeType::Short | AttributeType::UnsignedShort => 2,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            AttributeType::Byte => "BYTE",
            AttributeType::UnsignedByte => "UNSIGNED_BYTE",
            AttributeType::Short => "SHORT",
            AttributeType::UnsignedShort => "UNSIGNED_SHORT",
        }
    }

    fn write(&self, target: &mut [u8], value: f64) {
        // Values are truncated and wrapped like a store into a typed array.
        let value = value.trunc() as i64;
        match self {
            AttributeType::Byte => write_pod(target, value as i8),
            AttributeType::UnsignedByte => write_pod(target, value as u8),
            AttributeType::Short => write_pod(target, value as i16),
            AttributeType::UnsignedShort => write_pod(target, value as u16),
        }
    }

    fn read(&self, source: &[u8]) -> f64 {
        match self {
            AttributeType::Byte => bytemuck::pod_read_unaligned::<i8>(source) as f64,
            AttributeType::UnsignedByte => bytemuck::pod_read_unaligned::<u8>(source) as f64,
            AttributeType::Short => bytemuck::pod_read_unaligned::<i16>(source) as f64,
            AttributeType::UnsignedShort => bytemuck::pod_read_unaligned::<u16>(source) as f64,
        }
    }
}

fn write_pod<T: Pod>(target: &mut [u8], value: T) {
    target.copy_from_slice(bytemuck::bytes_of(&value));
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttributeType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BYTE" => Ok(AttributeType::Byte),
            "UNSIGNED_BYTE" => Ok(AttributeType::UnsignedByte),
            "SHORT" => Ok(AttributeType::Short),
            "UNSIGNED_SHORT" => Ok(AttributeType::UnsignedShort),
            _ => Err(ConfigError::UnknownAttributeType(s.to_owned())),
        }
    }
}

impl TryFrom<String> for AttributeType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AttributeType> for String {
    fn from(value: AttributeType) -> Self {
        value.name().to_owned()
    }
}

/// Declares an attribute before it has been laid out.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub components: usize,
    pub attribute_type: AttributeType,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, components: usize, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            components,
            attribute_type,
        }
    }
}

/// An attribute after layout: where its components live within one element.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AttributeLayout {
    pub name: String,
    pub components: usize,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    #[serde(rename = "byteOffset")]
    pub offset: usize,
}

impl AttributeLayout {
    /// Size of all components in bytes.
    pub fn size(&self) -> usize {
        self.attribute_type.size() * self.components
    }
}

/// The immutable part of a [`TypedBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    pub kind: BufferKind,
    pub attributes: Vec<AttributeLayout>,
    pub element_stride: usize,
}

impl BufferLayout {
    /// Lays out `attributes` in declaration order. Attributes of vertex buffers start at offsets
    /// aligned to [`VERTEX_ATTRIBUTE_ALIGNMENT`], element buffers are packed tightly.
    pub fn new(kind: BufferKind, attributes: &[AttributeDescriptor]) -> Result<Self, ConfigError> {
        if attributes.is_empty() {
            return Err(ConfigError::NoAttributes);
        }

        let alignment = match kind {
            BufferKind::Vertex => VERTEX_ATTRIBUTE_ALIGNMENT,
            BufferKind::Element => 1,
        };

        let mut layouts: Vec<AttributeLayout> = Vec::with_capacity(attributes.len());
        let mut element_stride = 0;
        for descriptor in attributes {
            if descriptor.components == 0 {
                return Err(ConfigError::ZeroComponents {
                    name: descriptor.name.clone(),
                });
            }
            if layouts.iter().any(|layout| layout.name == descriptor.name) {
                return Err(ConfigError::DuplicateAttribute {
                    name: descriptor.name.clone(),
                });
            }

            let layout = AttributeLayout {
                name: descriptor.name.clone(),
                components: descriptor.components,
                attribute_type: descriptor.attribute_type,
                offset: element_stride,
            };
            element_stride = align(layout.offset + layout.size(), alignment);
            layouts.push(layout);
        }

        Ok(Self {
            kind,
            attributes: layouts,
            element_stride,
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeLayout> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    /// Byte offset of the element at `index`.
    pub fn index_offset(&self, index: usize) -> usize {
        index * self.element_stride
    }
}

/// Values for one element, either by attribute name or as bare components if the buffer has a
/// single attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Attributes(BTreeMap<String, Vec<f64>>),
    Components(Vec<f64>),
}

impl From<Vec<f64>> for ElementValue {
    fn from(components: Vec<f64>) -> Self {
        ElementValue::Components(components)
    }
}

impl<const N: usize> From<[f64; N]> for ElementValue {
    fn from(components: [f64; N]) -> Self {
        ElementValue::Components(components.to_vec())
    }
}

impl From<BTreeMap<String, Vec<f64>>> for ElementValue {
    fn from(attributes: BTreeMap<String, Vec<f64>>) -> Self {
        ElementValue::Attributes(attributes)
    }
}

impl<const N: usize> From<[(&str, Vec<f64>); N]> for ElementValue {
    fn from(attributes: [(&str, Vec<f64>); N]) -> Self {
        ElementValue::Attributes(
            attributes
                .into_iter()
                .map(|(name, components)| (name.to_owned(), components))
                .collect(),
        )
    }
}

/// A growable binary buffer. See the [module documentation](self).
pub struct TypedBuffer {
    layout: BufferLayout,
    bytes: Vec<u8>,
    /// Next free element index
    write_cursor: usize,
    /// Set once the byte store was handed out. Writes afterwards are a programming error.
    released: bool,
}

impl TypedBuffer {
    pub fn new(kind: BufferKind, attributes: &[AttributeDescriptor]) -> Result<Self, ConfigError> {
        Self::with_size(kind, attributes, SIZE_DEFAULT)
    }

    pub fn with_size(
        kind: BufferKind,
        attributes: &[AttributeDescriptor],
        size: usize,
    ) -> Result<Self, ConfigError> {
        let layout = BufferLayout::new(kind, attributes)?;
        Ok(Self {
            layout,
            bytes: vec![0; align(size.max(SIZE_ALIGNMENT), SIZE_ALIGNMENT)],
            write_cursor: 0,
            released: false,
        })
    }

    /// Creates an element buffer whose elements reference `vertices_per_element` vertices.
    pub fn new_element(vertices_per_element: usize) -> Result<Self, ConfigError> {
        Self::new(
            BufferKind::Element,
            &[AttributeDescriptor::new(
                ELEMENT_ATTRIBUTE_NAME,
                vertices_per_element,
                ELEMENT_ATTRIBUTE_TYPE,
            )],
        )
    }

    pub(crate) fn from_parts(layout: BufferLayout, bytes: Vec<u8>, write_cursor: usize) -> Self {
        Self {
            layout,
            bytes,
            write_cursor,
            released: false,
        }
    }

    pub fn kind(&self) -> BufferKind {
        self.layout.kind
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn attributes(&self) -> &[AttributeLayout] {
        &self.layout.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeLayout> {
        self.layout.attribute(name)
    }

    pub fn element_stride(&self) -> usize {
        self.layout.element_stride
    }

    /// Capacity of the byte store in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Number of elements which have been written.
    pub fn len(&self) -> usize {
        self.write_cursor
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == 0
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The bytes which hold written elements.
    pub fn used_bytes(&self) -> &[u8] {
        &self.bytes[..self.layout.index_offset(self.write_cursor)]
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Forgets all elements without shrinking the byte store.
    pub fn clear(&mut self) {
        self.assert_writable();
        self.write_cursor = 0;
    }

    /// Writes `element` at the next free index and returns that index.
    pub fn append(&mut self, element: impl Into<ElementValue>) -> usize {
        let index = self.write_cursor;
        self.set(index, element);
        index
    }

    pub fn set(&mut self, index: usize, element: impl Into<ElementValue>) {
        match element.into() {
            ElementValue::Attributes(attributes) => {
                for (name, components) in &attributes {
                    self.set_attribute(index, name, components);
                }
            }
            ElementValue::Components(components) => {
                assert_eq!(
                    self.layout.attributes.len(),
                    1,
                    "bare components can only be written to a buffer with a single attribute"
                );
                let name = self.layout.attributes[0].name.clone();
                self.set_attribute(index, &name, &components);
            }
        }
    }

    /// Writes the components of one attribute of the element at `index`. Missing trailing
    /// components are left untouched, surplus components are ignored.
    pub fn set_attribute(&mut self, index: usize, name: &str, components: &[f64]) {
        self.assert_writable();
        self.make_room(index);

        let attribute = self
            .layout
            .attribute(name)
            .unwrap_or_else(|| panic!("buffer has no attribute named {name}"));
        let component_size = attribute.attribute_type.size();
        let start = self.layout.index_offset(index) + attribute.offset;

        for (component, value) in components.iter().take(attribute.components).enumerate() {
            let offset = start + component * component_size;
            attribute
                .attribute_type
                .write(&mut self.bytes[offset..offset + component_size], *value);
        }

        self.write_cursor = self.write_cursor.max(index + 1);
    }

    /// Reads back every attribute of the element at `index`.
    pub fn get(&self, index: usize) -> BTreeMap<String, Vec<f64>> {
        self.layout
            .attributes
            .iter()
            .map(|attribute| (attribute.name.clone(), self.read_attribute(index, attribute)))
            .collect()
    }

    pub fn get_attribute(&self, index: usize, name: &str) -> Vec<f64> {
        let attribute = self
            .layout
            .attribute(name)
            .unwrap_or_else(|| panic!("buffer has no attribute named {name}"));
        self.read_attribute(index, attribute)
    }

    fn read_attribute(&self, index: usize, attribute: &AttributeLayout) -> Vec<f64> {
        assert!(
            self.layout.index_offset(index + 1) <= self.bytes.len(),
            "element {index} is out of bounds"
        );
        let component_size = attribute.attribute_type.size();
        let start = self.layout.index_offset(index) + attribute.offset;
        (0..attribute.components)
            .map(|component| {
                let offset = start + component * component_size;
                attribute
                    .attribute_type
                    .read(&self.bytes[offset..offset + component_size])
            })
            .collect()
    }

    /// Byte offset of one component of an attribute at a particular element index.
    pub fn attribute_offset(&self, index: usize, name: &str, component: usize) -> usize {
        let attribute = self
            .layout
            .attribute(name)
            .unwrap_or_else(|| panic!("buffer has no attribute named {name}"));
        self.layout.index_offset(index) + attribute.offset + attribute.attribute_type.size() * component
    }

    /// Hands out the byte store. The buffer keeps its layout but must not be written anymore.
    pub fn release(&mut self) -> Vec<u8> {
        self.assert_writable();
        self.released = true;
        std::mem::take(&mut self.bytes)
    }

    /// Grows the byte store until the element at `index` fits. Existing bytes are copied, the
    /// store never shrinks.
    fn make_room(&mut self, index: usize) {
        let required = self.layout.index_offset(index + 1);
        if required <= self.bytes.len() {
            return;
        }

        let mut size = self.bytes.len().max(SIZE_ALIGNMENT);
        while size < required {
            size = align((size as f64 * GROWTH_FACTOR).ceil() as usize, SIZE_ALIGNMENT);
        }
        log::trace!(
            "growing {:?} buffer from {} to {} bytes",
            self.layout.kind,
            self.bytes.len(),
            size
        );
        self.bytes.resize(size, 0);

        assert!(
            self.layout.index_offset(index + 1) <= self.bytes.len(),
            "buffer capacity overrun after growing"
        );
    }

    fn assert_writable(&self) {
        assert!(
            !self.released,
            "buffer storage was released and must not be used anymore"
        );
    }
}

impl fmt::Debug for TypedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("kind", &self.layout.kind)
            .field("attributes", &self.layout.attributes)
            .field("element_stride", &self.layout.element_stride)
            .field("size", &self.bytes.len())
            .field("write_cursor", &self.write_cursor)
            .field("released", &self.released)
            .finish()
    }
}

/// Rounds `value` up to the next multiple of `alignment`.
pub(crate) fn align(value: usize, alignment: usize) -> usize {
    let remainder = value % alignment;
    if remainder == 0 {
        value
    } else {
        value + (alignment - remainder)
    }
}
