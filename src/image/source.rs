use std::sync::Arc;

use anyhow::anyhow;

use crate::core::Hash32;
use crate::engine::Evaluator;
use crate::error::GraphResult;
use crate::graph::{Direction, NodeBuilder, PlugId, PlugRef};
use crate::image::{ImageBuffer, ImagePlug, current_channel, current_tile, flat_sample_offsets};
use crate::node::ComputeNode;
use crate::value::Value;

/// Serves an in-memory [`ImageBuffer`] tile by tile.
pub struct BufferSource {
    image: PlugId,
    out: ImagePlug,
}

impl BufferSource {
    pub fn new(b: &mut NodeBuilder<'_>) -> GraphResult<Self> {
        Ok(Self {
            image: b.add_atomic_input("image", ImageBuffer::default())?,
            out: ImagePlug::add(b, "out", Direction::Out)?,
        })
    }

    pub fn image_plug(&self) -> PlugId {
        self.image
    }

    pub fn out(&self) -> &ImagePlug {
        &self.out
    }
}

impl ComputeNode for BufferSource {
    fn type_name(&self) -> &'static str {
        "BufferSource"
    }

    fn affects(&self, plug: &PlugRef<'_>, outputs: &mut Vec<PlugId>) {
        if plug.id() == self.image {
            outputs.extend(self.out.children());
        }
    }

    fn hash(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
        let mut h = ev.seeded_hasher(output)?;
        h.append_hash(ev.hash(self.image)?);

        if output == self.out.sample_offsets_plug() || output == self.out.channel_data_plug() {
            let origin = current_tile(ev.context())?;
            h.append_i64(origin.x as i64).append_i64(origin.y as i64);
        }
        if output == self.out.channel_data_plug() {
            h.append_str(&current_channel(ev.context())?);
        }

        Ok(h.finish_hash())
    }

    fn compute(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Value> {
        let image: Arc<ImageBuffer> = ev.get_as(self.image)?;
        let out = &self.out;

        let value = if output == out.format_plug() {
            Value::Box2i(image.display_window())
        } else if output == out.data_window_plug() {
            Value::Box2i(image.data_window())
        } else if output == out.channel_names_plug() {
            Value::from(image.channel_names())
        } else if output == out.deep_plug() {
            Value::Bool(image.is_deep())
        } else if output == out.sample_offsets_plug() {
            let origin = current_tile(ev.context())?;
            if image.is_deep() {
                Value::from(image.tile_sample_offsets(origin))
            } else {
                Value::IntVector(flat_sample_offsets())
            }
        } else if output == out.channel_data_plug() {
            let origin = current_tile(ev.context())?;
            let channel = current_channel(ev.context())?;
            let data = image
                .tile_channel_data(&channel, origin)
                .ok_or_else(|| anyhow!("the image has no channel '{channel}'"))?;
            Value::from(data)
        } else {
            return Err(anyhow!("plug {output:?} is not computed by this node"));
        };

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::engine::Engine;
    use crate::error::EvalError;
    use crate::image::TILE_SIZE;
    use crate::value::{Box2i, V2i};

    #[test]
    fn test_serves_tiles() {
        let engine = Engine::default();
        let source = engine.add_node("image", BufferSource::new).unwrap();

        let window = Box2i::from_size(70, 2);
        let red: Vec<f32> = (0..140).map(|i| i as f32).collect();
        let image = ImageBuffer::flat(window, window, [("R", red)]).unwrap();
        engine.set_value(source.image_plug(), image).unwrap();

        engine.evaluate(&Context::new(), |ev| {
            let out = source.out();
            assert_eq!(out.data_window(ev).unwrap(), window);
            assert_eq!(*out.channel_names(ev).unwrap(), vec!["R".to_string()]);
            assert!(!out.deep(ev).unwrap());

            let second = out.channel_data(ev, "R", V2i::new(64, 0)).unwrap();
            assert_eq!(second.len(), (TILE_SIZE * TILE_SIZE) as usize);
            assert_eq!(second[0], 64.0);
            assert_eq!(second[TILE_SIZE as usize], 134.0);
            assert_eq!(second[6], 0.0);

            let a = out.channel_data_hash(ev, "R", V2i::new(0, 0)).unwrap();
            let b = out.channel_data_hash(ev, "R", V2i::new(64, 0)).unwrap();
            assert_ne!(a, b);
        });
    }

    #[test]
    fn test_missing_channel_is_an_error() {
        let engine = Engine::default();
        let source = engine.add_node("image", BufferSource::new).unwrap();

        let result = engine.evaluate(&Context::new(), |ev| {
            source.out().channel_data(ev, "Z", V2i::new(0, 0))
        });
        assert!(matches!(result, Err(EvalError::Compute(_))));
    }
}
