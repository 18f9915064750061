//! Tessellation of lines and polygons with lyon.

use lyon::{
    geom,
    path::{path::Builder, Path},
    tessellation::{
        BuffersBuilder, FillOptions, FillRule, FillTessellator, FillVertex, FillVertexConstructor,
        StrokeOptions, StrokeTessellator, StrokeVertex, StrokeVertexConstructor, VertexBuffers,
    },
};

use crate::{
    attribute::Vertex,
    error::BucketError,
    feature::{Feature, GeometryCoordinate},
    layer_type::BucketWriter,
};

const DEFAULT_TOLERANCE: f32 = 0.02;

/// Vertex buffers index data type.
type IndexDataType = u32;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TessellatedVertex {
    pub position: [f32; 2],
    pub normal: [f32; 2],
}

/// Constructor for Fill and Stroke vertices.
struct VertexConstructor {}

impl FillVertexConstructor<TessellatedVertex> for VertexConstructor {
    fn new_vertex(&mut self, vertex: FillVertex) -> TessellatedVertex {
        TessellatedVertex {
            position: vertex.position().to_array(),
            normal: [0.0, 0.0],
        }
    }
}

impl StrokeVertexConstructor<TessellatedVertex> for VertexConstructor {
    fn new_vertex(&mut self, vertex: StrokeVertex) -> TessellatedVertex {
        TessellatedVertex {
            position: vertex.position_on_path().to_array(),
            normal: vertex.normal().to_array(),
        }
    }
}

fn build_path(rings: &[Vec<GeometryCoordinate>], close: bool) -> Path {
    let mut builder: Builder = Path::builder();
    for ring in rings {
        let Some((first, rest)) = ring.split_first() else {
            continue;
        };
        builder.begin(geom::point(first.x as f32, first.y as f32));
        for coordinate in rest {
            builder.line_to(geom::point(coordinate.x as f32, coordinate.y as f32));
        }
        builder.end(close);
    }
    builder.build()
}

/// Fills all rings of a feature as one polygon with holes.
pub fn tessellate_fill(
    feature: &dyn Feature,
) -> Result<VertexBuffers<TessellatedVertex, IndexDataType>, BucketError> {
    let path = build_path(&feature.load_geometry(), true);
    let mut buffer = VertexBuffers::new();

    FillTessellator::new().tessellate_path(
        &path,
        &FillOptions::tolerance(DEFAULT_TOLERANCE).with_fill_rule(FillRule::NonZero),
        &mut BuffersBuilder::new(&mut buffer, VertexConstructor {}),
    )?;

    Ok(buffer)
}

/// Strokes every part of a feature as an open line.
pub fn tessellate_strokes(
    feature: &dyn Feature,
) -> Result<VertexBuffers<TessellatedVertex, IndexDataType>, BucketError> {
    let path = build_path(&feature.load_geometry(), false);
    let mut buffer = VertexBuffers::new();

    StrokeTessellator::new().tessellate_path(
        &path,
        &StrokeOptions::tolerance(DEFAULT_TOLERANCE),
        &mut BuffersBuilder::new(&mut buffer, VertexConstructor {}),
    )?;

    Ok(buffer)
}

/// Passes tessellated triangles on to a bucket writer.
pub fn write_triangles(
    buffer: &VertexBuffers<TessellatedVertex, IndexDataType>,
    feature: &dyn Feature,
    writer: &mut dyn BucketWriter,
) {
    let properties = feature.properties();
    let indices: Vec<usize> = buffer
        .vertices
        .iter()
        .map(|vertex| {
            writer.add_vertex(Vertex {
                geometry: GeometryCoordinate {
                    x: vertex.position[0].round() as i32,
                    y: vertex.position[1].round() as i32,
                },
                extrude: [vertex.normal[0] as f64, vertex.normal[1] as f64],
                properties,
            })
        })
        .collect();

    for triangle in buffer.indices.chunks_exact(3) {
        writer.add_element(&[
            indices[triangle[0] as usize],
            indices[triangle[1] as usize],
            indices[triangle[2] as usize],
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Properties, VectorFeature};

    fn square() -> VectorFeature {
        VectorFeature::new(
            vec![vec![
                GeometryCoordinate { x: 0, y: 0 },
                GeometryCoordinate { x: 10, y: 0 },
                GeometryCoordinate { x: 10, y: 10 },
                GeometryCoordinate { x: 0, y: 10 },
            ]],
            Properties::new(),
        )
    }

    #[test]
    fn test_fill_square() {
        let buffer = tessellate_fill(&square()).unwrap();

        assert_eq!(buffer.vertices.len(), 4);
        assert_eq!(buffer.indices.len(), 6);
    }

    #[test]
    fn test_stroke_has_normals() {
        let buffer = tessellate_strokes(&square()).unwrap();

        assert!(!buffer.indices.is_empty());
        assert_eq!(buffer.indices.len() % 3, 0);
        assert!(buffer
            .vertices
            .iter()
            .all(|vertex| vertex.normal != [0.0, 0.0]));
    }

    #[test]
    fn test_empty_geometry() {
        let buffer = tessellate_fill(&VectorFeature::default()).unwrap();

        assert!(buffer.vertices.is_empty());
        assert!(buffer.indices.is_empty());
    }
}
