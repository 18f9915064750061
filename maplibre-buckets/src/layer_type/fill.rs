use std::sync::Arc;

use crate::{
    attribute::{style_attribute, AttributeSource, AttributeSpec, Vertex},
    buffer::AttributeType,
    error::BucketError,
    feature::Feature,
    layer_type::{tessellation, BucketWriter},
};

pub fn generate(feature: &dyn Feature, writer: &mut dyn BucketWriter) -> Result<(), BucketError> {
    let buffer = tessellation::tessellate_fill(feature)?;
    tessellation::write_triangles(&buffer, feature, writer);
    Ok(())
}

pub fn attribute_specs() -> Vec<AttributeSpec> {
    vec![
        AttributeSpec::new(
            "pos",
            2,
            AttributeType::Short,
            AttributeSource::Vertex(Arc::new(|vertex: &Vertex<'_>| {
                vec![vertex.geometry.x as f64, vertex.geometry.y as f64]
            })),
        )
        .shared(),
        AttributeSpec::new(
            "color",
            4,
            AttributeType::UnsignedByte,
            style_attribute("fill-color", 255.0),
        ),
        AttributeSpec::new(
            "opacity",
            1,
            AttributeType::UnsignedByte,
            style_attribute("fill-opacity", 255.0),
        ),
    ]
}
