use std::sync::Arc;

use anyhow::anyhow;

use crate::core::Hash32;
use crate::engine::Evaluator;
use crate::error::GraphResult;
use crate::graph::{Direction, NodeBuilder, PlugId, PlugRef};
use crate::image::{ImagePlug, TILE_SIZE, current_channel, current_tile, flat_sample_offsets};
use crate::node::ComputeNode;
use crate::value::Value;

/// Merges the samples of a deep image into a flat image.
///
/// Samples are composited front to back with the `A` channel as coverage.
/// Without an `A` channel the samples of a pixel are summed. A flat input
/// passes through untouched.
pub struct Flatten {
    in_plug: ImagePlug,
    out: ImagePlug,
}

impl Flatten {
    pub fn new(b: &mut NodeBuilder<'_>) -> GraphResult<Self> {
        let in_plug = ImagePlug::add(b, "in", Direction::In)?;
        let out = ImagePlug::add(b, "out", Direction::Out)?;

        b.connect(in_plug.format_plug(), out.format_plug())?;
        b.connect(in_plug.data_window_plug(), out.data_window_plug())?;
        b.connect(in_plug.channel_names_plug(), out.channel_names_plug())?;

        Ok(Self { in_plug, out })
    }

    pub fn in_plug(&self) -> &ImagePlug {
        &self.in_plug
    }

    pub fn out(&self) -> &ImagePlug {
        &self.out
    }

    fn has_alpha(&self, ev: &Evaluator<'_>) -> anyhow::Result<bool> {
        Ok(self.in_plug.channel_names(ev)?.iter().any(|c| c == "A"))
    }

    fn composite(&self, ev: &Evaluator<'_>, channel: &str) -> anyhow::Result<Vec<f32>> {
        let origin = current_tile(ev.context())?;
        let offsets = self.in_plug.sample_offsets(ev, origin)?;
        let samples = self.in_plug.channel_data(ev, channel, origin)?;
        let alpha = match self.has_alpha(ev)? {
            true => Some(self.in_plug.channel_data(ev, "A", origin)?),
            false => None,
        };

        let mut flat = Vec::with_capacity((TILE_SIZE * TILE_SIZE) as usize);
        let mut start = 0usize;
        for end in offsets.iter().map(|o| *o as usize) {
            let pixel = samples
                .get(start..end)
                .ok_or_else(|| anyhow!("tile {origin:?} has fewer samples than its offsets claim"))?;

            let value = match &alpha {
                Some(alpha) => {
                    let coverage = alpha.get(start..end).unwrap_or_default();
                    let mut transmission = 1.0f32;
                    let mut acc = 0.0f32;
                    for (value, a) in pixel.iter().zip(coverage) {
                        acc += transmission * *value;
                        transmission *= 1.0 - *a;
                    }
                    acc
                }
                None => pixel.iter().sum::<f32>(),
            };

            flat.push(value);
            start = end;
        }

        Ok(flat)
    }
}

impl ComputeNode for Flatten {
    fn type_name(&self) -> &'static str {
        "Flatten"
    }

    fn affects(&self, plug: &PlugRef<'_>, outputs: &mut Vec<PlugId>) {
        let id = plug.id();
        if id == self.in_plug.deep_plug()
            || id == self.in_plug.sample_offsets_plug()
            || id == self.in_plug.channel_data_plug()
            || id == self.in_plug.channel_names_plug()
        {
            outputs.push(self.out.channel_data_plug());
        }
    }

    fn hash(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
        let mut h = ev.seeded_hasher(output)?;
        if output != self.out.channel_data_plug() {
            // `deep` and `sampleOffsets` are constant.
            return Ok(h.finish_hash());
        }

        if !self.in_plug.deep(ev)? {
            return Ok(ev.hash(self.in_plug.channel_data_plug())?);
        }

        let origin = current_tile(ev.context())?;
        let channel = current_channel(ev.context())?;
        h.append_i64(origin.x as i64)
            .append_i64(origin.y as i64)
            .append_str(&channel)
            .append_hash(self.in_plug.sample_offsets_hash(ev, origin)?)
            .append_hash(self.in_plug.channel_data_hash(ev, &channel, origin)?);

        let alpha = self.has_alpha(ev)?;
        h.append_bool(alpha);
        if alpha {
            h.append_hash(self.in_plug.channel_data_hash(ev, "A", origin)?);
        }

        Ok(h.finish_hash())
    }

    fn compute(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Value> {
        if output == self.out.deep_plug() {
            return Ok(Value::Bool(false));
        }
        if output == self.out.sample_offsets_plug() {
            return Ok(Value::IntVector(flat_sample_offsets()));
        }
        if output != self.out.channel_data_plug() {
            return Err(anyhow!("plug {output:?} is not computed by this node"));
        }

        if !self.in_plug.deep(ev)? {
            return Ok(ev.get(self.in_plug.channel_data_plug())?);
        }

        let channel = current_channel(ev.context())?;
        Ok(Value::FloatVector(Arc::new(self.composite(ev, &channel)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::engine::Engine;
    use crate::graph::NodeHandle;
    use crate::image::{BufferSource, ImageBuffer};
    use crate::value::{Box2i, V2i};

    fn flatten(engine: &Engine, image: ImageBuffer) -> (NodeHandle<BufferSource>, NodeHandle<Flatten>) {
        let source = engine.add_node("image", BufferSource::new).unwrap();
        engine.set_value(source.image_plug(), image).unwrap();
        let flatten = engine.add_node("flatten", Flatten::new).unwrap();
        engine
            .connect(source.out().root(), flatten.in_plug().root())
            .unwrap();
        (source, flatten)
    }

    #[test]
    fn test_composites_front_to_back() {
        let engine = Engine::default();
        let window = Box2i::from_size(2, 1);
        let image = ImageBuffer::deep(
            window,
            window,
            vec![2, 0],
            [("R", vec![0.5, 1.0]), ("A", vec![0.5, 1.0])],
        )
        .unwrap();
        let (_, flatten) = flatten(&engine, image);

        engine.evaluate(&Context::new(), |ev| {
            let out = flatten.out();
            assert!(!out.deep(ev).unwrap());

            let red = out.channel_data(ev, "R", V2i::new(0, 0)).unwrap();
            assert_eq!(red.len(), (TILE_SIZE * TILE_SIZE) as usize);
            assert!((red[0] - 1.0).abs() < 1e-6);
            assert_eq!(red[1], 0.0);

            let alpha = out.channel_data(ev, "A", V2i::new(0, 0)).unwrap();
            assert!((alpha[0] - 1.0).abs() < 1e-6);
            assert_eq!(*out.sample_offsets(ev, V2i::new(0, 0)).unwrap(), *flat_sample_offsets());
        });
    }

    #[test]
    fn test_sums_without_alpha() {
        let engine = Engine::default();
        let window = Box2i::from_size(1, 1);
        let image = ImageBuffer::deep(window, window, vec![3], [("Z", vec![1.0, 2.0, 3.0])]).unwrap();
        let (_, flatten) = flatten(&engine, image);

        let z = engine.evaluate(&Context::new(), |ev| {
            flatten.out().channel_data(ev, "Z", V2i::new(0, 0)).unwrap()
        });
        assert_eq!(z[0], 6.0);
    }

    #[test]
    fn test_flat_input_passes_through() {
        let engine = Engine::default();
        let window = Box2i::from_size(1, 1);
        let image = ImageBuffer::flat(window, window, [("R", vec![0.25])]).unwrap();
        let (source, flatten) = flatten(&engine, image);

        engine.evaluate(&Context::new(), |ev| {
            let origin = V2i::new(0, 0);
            assert_eq!(
                source.out().channel_data_hash(ev, "R", origin).unwrap(),
                flatten.out().channel_data_hash(ev, "R", origin).unwrap()
            );
            assert_eq!(flatten.out().channel_data(ev, "R", origin).unwrap()[0], 0.25);
            assert_eq!(flatten.out().data_window(ev).unwrap(), window);
        });
    }
}
