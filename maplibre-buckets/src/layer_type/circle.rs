//! Circles are drawn as extruded squares, the circle itself is cut out in the shader.

use std::sync::Arc;

use crate::{
    attribute::{
        style_attribute, AttributeContext, AttributeSource, AttributeSpec, AttributeValue, Vertex,
    },
    buffer::AttributeType,
    error::{BucketError, ConfigError},
    feature::{Feature, Properties},
    layer_type::BucketWriter,
};

const EXTRUDES: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

const BLUR_MULTIPLIER: f64 = 10.0;

/// Emits four vertices and two triangles per point. Only the first geometry of a feature is
/// used.
pub fn generate(feature: &dyn Feature, writer: &mut dyn BucketWriter) -> Result<(), BucketError> {
    let geometry = feature.load_geometry();
    let Some(points) = geometry.first() else {
        return Ok(());
    };

    for point in points {
        let mut indices = [0; 4];
        for (index, extrude) in indices.iter_mut().zip(EXTRUDES) {
            *index = writer.add_vertex(Vertex {
                geometry: *point,
                extrude,
                properties: feature.properties(),
            });
        }

        writer.add_element(&[indices[0], indices[1], indices[2]]);
        writer.add_element(&[indices[0], indices[3], indices[2]]);
    }

    Ok(())
}

pub fn attribute_specs() -> Vec<AttributeSpec> {
    vec![
        AttributeSpec::new(
            "pos",
            2,
            AttributeType::Short,
            AttributeSource::Vertex(Arc::new(|vertex: &Vertex<'_>| {
                // The extrusion is packed into the lowest bit of each coordinate.
                vec![
                    vertex.geometry.x as f64 * 2.0 + (vertex.extrude[0] + 1.0) / 2.0,
                    vertex.geometry.y as f64 * 2.0 + (vertex.extrude[1] + 1.0) / 2.0,
                ]
            })),
        )
        .shared(),
        AttributeSpec::new(
            "size",
            1,
            AttributeType::UnsignedByte,
            style_attribute("circle-radius", 10.0),
        )
        .in_group("antialiasing"),
        AttributeSpec::new(
            "blur",
            1,
            AttributeType::UnsignedByte,
            antialiased_blur(),
        )
        .in_group("antialiasing"),
        AttributeSpec::new(
            "color",
            4,
            AttributeType::UnsignedByte,
            style_attribute("circle-color", 255.0),
        ),
        AttributeSpec::new(
            "opacity",
            1,
            AttributeType::UnsignedByte,
            style_attribute("circle-opacity", 255.0),
        ),
    ]
}

/// Blur of at least one device pixel, so circle edges are always antialiased.
fn antialiased_blur() -> AttributeSource {
    AttributeSource::Layer(Arc::new(
        |context: &AttributeContext<'_>| -> Result<AttributeValue, ConfigError> {
            let blur = context.calculator("circle-blur")?;
            let radius = context.calculator("circle-radius")?;
            let min_blur = 1.0 / context.device_pixel_ratio;

            let blur_at = blur.evaluate(context.zoom);
            let radius_at = radius.evaluate(context.zoom);
            let apply = move |properties: &Properties| -> Vec<f64> {
                let min = min_blur / radius_at(properties).scalar();
                vec![min.max(blur_at(properties).scalar()) * BLUR_MULTIPLIER]
            };

            if blur.is_feature_constant() && radius.is_feature_constant() {
                Ok(AttributeValue::Constant(apply(&Properties::new())))
            } else {
                Ok(AttributeValue::PerVertex(Arc::new(
                    move |vertex: &Vertex<'_>| apply(vertex.properties),
                )))
            }
        },
    ))
}
