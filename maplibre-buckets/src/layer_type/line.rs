use std::sync::Arc;

use crate::{
    attribute::{style_attribute, AttributeSource, AttributeSpec, Vertex},
    buffer::AttributeType,
    error::BucketError,
    feature::Feature,
    layer_type::{tessellation, BucketWriter},
};

/// Stroke normals are unit vectors, scaled to fit a signed byte.
const EXTRUDE_SCALE: f64 = 63.0;

pub fn generate(feature: &dyn Feature, writer: &mut dyn BucketWriter) -> Result<(), BucketError> {
    let buffer = tessellation::tessellate_strokes(feature)?;
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
            "extrude",
            2,
            AttributeType::Byte,
            AttributeSource::Vertex(Arc::new(|vertex: &Vertex<'_>| {
                vec![
                    (vertex.extrude[0] * EXTRUDE_SCALE).round(),
                    (vertex.extrude[1] * EXTRUDE_SCALE).round(),
                ]
            })),
        )
        .shared(),
        AttributeSpec::new(
            "color",
            4,
            AttributeType::UnsignedByte,
            style_attribute("line-color", 255.0),
        ),
        AttributeSpec::new(
            "opacity",
            1,
            AttributeType::UnsignedByte,
            style_attribute("line-opacity", 255.0),
        ),
        AttributeSpec::new(
            "width",
            1,
            AttributeType::UnsignedByte,
            style_attribute("line-width", 2.0),
        )
        .in_group("width"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        feature::{GeometryCoordinate, Properties, VectorFeature},
        layer_type::tests::RecordingWriter,
    };

    #[test]
    fn test_generate_straight_line() {
        let feature = VectorFeature::new(
            vec![vec![
                GeometryCoordinate { x: 0, y: 0 },
                GeometryCoordinate { x: 100, y: 0 },
            ]],
            Properties::new(),
        );
        let mut writer = RecordingWriter::default();

        generate(&feature, &mut writer).unwrap();

        assert_eq!(writer.vertices.len(), 4);
        assert_eq!(writer.elements.len(), 2);
        for (position, extrude) in &writer.vertices {
            assert_eq!(position[1], 0);
            assert!(extrude[0].abs() < 1e-6);
            assert!((extrude[1].abs() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_extrude_fits_signed_byte() {
        let specs = attribute_specs();
        let AttributeSource::Vertex(extrude) = &specs[1].value else {
            panic!("extrude is computed per vertex");
        };
        let properties = Properties::new();

        let value = extrude(&Vertex {
            geometry: GeometryCoordinate { x: 0, y: 0 },
            extrude: [-1.0, 0.5],
            properties: &properties,
        });

        assert_eq!(value, vec![-63.0, 32.0]);
    }
}
