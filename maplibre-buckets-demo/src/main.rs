use std::{collections::BTreeMap, error::Error, fs, path::PathBuf, sync::mpsc, thread};

use clap::Parser;
use maplibre_buckets::{
    buffer::{AttributeLayout, BufferKind},
    feature::VectorFeature,
    layer_type::{DrawMode, LayerType},
    style::StyleLayer,
    Bucket, BucketError, BucketOptions, GraphicsContext, SerializedBucket,
};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "maplibre-buckets-demo")]
#[command(about = "Builds buckets for a style and replays their draw calls")]
struct Args {
    /// Style with a `layers` array
    #[arg(long)]
    style: PathBuf,

    /// Features keyed by source layer
    #[arg(long)]
    features: PathBuf,

    #[arg(long, default_value_t = 0.0)]
    zoom: f64,

    #[arg(long, default_value_t = 1.0)]
    pixel_ratio: f64,

    /// Print every serialized bucket as JSON
    #[arg(long)]
    dump: bool,
}

#[derive(Deserialize)]
struct Style {
    layers: Vec<StyleLayer>,
}

/// Layers of one type reading the same source layer are drawn from one bucket.
type BucketKey = (LayerType, String);

fn source_layer(layer: &StyleLayer) -> String {
    layer
        .source_layer
        .clone()
        .unwrap_or_else(|| layer.id.clone())
}

/// Logs every call instead of talking to a device.
#[derive(Default)]
struct LoggingContext {
    next_buffer: u32,
}

const SHADER_ATTRIBUTES: [&str; 7] = [
    "a_pos",
    "a_extrude",
    "a_size",
    "a_blur",
    "a_color",
    "a_opacity",
    "a_width",
];

impl GraphicsContext for LoggingContext {
    type Buffer = u32;

    fn upload(&mut self, kind: BufferKind, data: &[u8]) -> u32 {
        let buffer = self.next_buffer;
        self.next_buffer += 1;
        log::info!("upload {kind:?} buffer {buffer} with {} bytes", data.len());
        buffer
    }

    fn delete_buffer(&mut self, buffer: u32) {
        log::debug!("delete buffer {buffer}");
    }

    fn attribute_location(&self, _shader: &str, name: &str) -> Option<u32> {
        SHADER_ATTRIBUTES
            .iter()
            .position(|attribute| *attribute == name)
            .map(|location| location as u32)
    }

    fn set_constant_attribute(&mut self, location: u32, value: &[f64]) {
        log::info!("constant attribute {location} = {value:?}");
    }

    fn bind_element_buffer(&mut self, buffer: &u32) {
        log::debug!("bind element buffer {buffer}");
    }

    fn bind_vertex_attribute(
        &mut self,
        buffer: &u32,
        location: u32,
        attribute: &AttributeLayout,
        stride: usize,
        vertex_offset: usize,
    ) {
        log::info!(
            "bind {} of buffer {buffer} to {location} (stride {stride}, first vertex {vertex_offset})",
            attribute.name
        );
    }

    fn set_stencil_test(&mut self, enabled: bool) {
        log::debug!("stencil test {enabled}");
    }

    fn draw_indexed(&mut self, mode: DrawMode, index_count: usize, index_byte_offset: usize) {
        log::info!("draw {mode:?} with {index_count} indices at byte {index_byte_offset}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args = Args::parse();

    let style: Style = serde_json::from_str(&fs::read_to_string(&args.style)?)?;
    let features: BTreeMap<String, Vec<VectorFeature>> =
        serde_json::from_str(&fs::read_to_string(&args.features)?)?;
    let options = BucketOptions {
        zoom: args.zoom,
        device_pixel_ratio: args.pixel_ratio,
        ..BucketOptions::default()
    };

    let mut buckets: BTreeMap<BucketKey, Vec<StyleLayer>> = BTreeMap::new();
    for layer in &style.layers {
        if !layer.is_visible_at(args.zoom) {
            log::info!("skipping layer {} which is not visible at zoom {}", layer.id, args.zoom);
            continue;
        }
        buckets
            .entry((layer.type_, source_layer(layer)))
            .or_default()
            .push(layer.clone());
    }

    let (sender, receiver) = mpsc::channel::<(BucketKey, Result<SerializedBucket, BucketError>)>();
    let mut workers = Vec::with_capacity(buckets.len());
    for ((layer_type, source), layers) in buckets {
        let features = features.get(&source).cloned().unwrap_or_default();
        let sender = sender.clone();
        workers.push(thread::spawn(move || {
            let result = Bucket::new(layer_type, layers, options)
                .map_err(BucketError::from)
                .and_then(|mut bucket| {
                    for feature in features {
                        bucket.queue_feature(feature);
                    }
                    bucket.into_transferable()
                });
            if let Err(e) = sender.send(((layer_type, source), result)) {
                log::error!("sending bucket failed: {e}");
            }
        }));
    }
    drop(sender);

    let mut context = LoggingContext::default();
    for ((layer_type, source), result) in receiver {
        let serialized = match result {
            Ok(serialized) => serialized,
            Err(e) => {
                log::error!("building {layer_type} bucket for {source} failed: {e}");
                continue;
            }
        };
        if args.dump {
            println!("{}", serialized.to_json()?);
        }

        log::info!(
            "received {layer_type} bucket for {source} with {} vertices in {} groups ({} bytes)",
            serialized.vertex_length,
            serialized.element_groups.len(),
            serialized.byte_length()
        );

        let layer_ids = serialized.layer_ids.clone();
        let bucket = Bucket::from_serialized(serialized, &style.layers, options)?;
        let render_bucket = bucket.upload(&mut context)?;
        for layer_id in &layer_ids {
            render_bucket.draw(&mut context, layer_id);
        }
        render_bucket.destroy(&mut context);
    }

    for worker in workers {
        if worker.join().is_err() {
            log::error!("bucket worker panicked");
        }
    }

    Ok(())
}
