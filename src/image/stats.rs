use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use rayon::prelude::*;

use crate::core::{Blake3Hasher, Hash32};
use crate::engine::Evaluator;
use crate::error::GraphResult;
use crate::graph::{Direction, NodeBuilder, PlugId, PlugRef};
use crate::image::{Flatten, ImagePlug, tile_bound, tile_index, tiles_in};
use crate::node::{CachePolicy, ComputeNode};
use crate::value::{Box2i, V2i, Value, ValueType};

/// Statistics of one channel over an area.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelStats {
    pub min: f32,
    pub max: f32,
    pub average: f32,
}

impl ChannelStats {
    pub const ZERO: ChannelStats = ChannelStats {
        min: 0.0,
        max: 0.0,
        average: 0.0,
    };

    fn hash_into(&self, h: &mut Blake3Hasher) {
        h.append_f32(self.min)
            .append_f32(self.max)
            .append_f32(self.average);
    }
}

/// What [`ImageStats`] reports for a requested channel the image lacks.
#[derive(Clone, Debug, PartialEq)]
pub struct MissingChannelPolicy {
    pub fallback: ChannelStats,
    pub per_channel: BTreeMap<String, ChannelStats>,
}

impl MissingChannelPolicy {
    pub fn with_channel(mut self, channel: impl Into<String>, stats: ChannelStats) -> Self {
        self.per_channel.insert(channel.into(), stats);
        self
    }

    pub fn stats_for(&self, channel: &str) -> ChannelStats {
        self.per_channel
            .get(channel)
            .copied()
            .unwrap_or(self.fallback)
    }

    fn hash_into(&self, h: &mut Blake3Hasher) {
        self.fallback.hash_into(h);
        h.append_u64(self.per_channel.len() as u64);
        for (channel, stats) in &self.per_channel {
            h.append_str(channel);
            stats.hash_into(h);
        }
    }
}

impl Default for MissingChannelPolicy {
    fn default() -> Self {
        Self {
            fallback: ChannelStats {
                min: 0.0,
                max: 1.0,
                average: 0.0,
            },
            per_channel: BTreeMap::new(),
        }
    }
}

/// Running min/max/sum over the pixels of one channel.
#[derive(Clone, Copy)]
struct Accumulator {
    min: f32,
    max: f32,
    sum: f64,
    count: u64,
}

impl Accumulator {
    const EMPTY: Accumulator = Accumulator {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
        sum: 0.0,
        count: 0,
    };

    fn add(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value as f64;
        self.count += 1;
    }

    fn merge(self, other: Accumulator) -> Accumulator {
        Accumulator {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
            count: self.count + other.count,
        }
    }

    fn finish(self) -> ChannelStats {
        if self.count == 0 {
            return ChannelStats::ZERO;
        }

        ChannelStats {
            min: self.min,
            max: self.max,
            average: (self.sum / self.count as f64) as f32,
        }
    }
}

/// What one colour slot of the output reports.
enum Slot {
    /// No channel requested.
    Unused,
    Missing(ChannelStats),
    Channel(String),
}

/// Minimum, maximum and average of up to four channels over an area.
///
/// The input is flattened by an internal [`Flatten`] node first, so deep
/// images are measured after compositing. All three colour outputs are read
/// out of one hidden `__stats` plug, computed in a single parallel pass over
/// the tiles of the area.
pub struct ImageStats {
    in_plug: ImagePlug,
    channels: PlugId,
    area: PlugId,
    average: PlugId,
    min: PlugId,
    max: PlugId,
    flattened: ImagePlug,
    stats: PlugId,
    /// Colour children of `min`, `max` and `average`, in `__stats` order.
    outputs: [[PlugId; 4]; 3],
    policy: MissingChannelPolicy,
}

impl ImageStats {
    pub fn new(b: &mut NodeBuilder<'_>) -> GraphResult<Self> {
        Self::with_policy(MissingChannelPolicy::default())(b)
    }

    pub fn with_policy(
        policy: MissingChannelPolicy,
    ) -> impl FnOnce(&mut NodeBuilder<'_>) -> GraphResult<Self> {
        move |b: &mut NodeBuilder<'_>| {
            let in_plug = ImagePlug::add(b, "in", Direction::In)?;
            let channels = b.add_input(
                "channels",
                vec!["R".to_string(), "G".to_string(), "B".to_string(), "A".to_string()],
            )?;
            let area = b.add_input("area", Box2i::default())?;
            let average = b.add_output("average", ValueType::Color4f)?;
            let min = b.add_output("min", ValueType::Color4f)?;
            let max = b.add_output("max", ValueType::Color4f)?;

            let flattened = ImagePlug::add(b, "__flattenedIn", Direction::In)?;
            let stats = b.add_output("__stats", ValueType::FloatVector)?;

            let flatten = b.add_node("__flatten", Flatten::new)?;
            b.connect(in_plug.root(), flatten.in_plug().root())?;
            b.connect(flatten.out().root(), flattened.root())?;

            let outputs = [
                color_children(b, min)?,
                color_children(b, max)?,
                color_children(b, average)?,
            ];

            Ok(Self {
                in_plug,
                channels,
                area,
                average,
                min,
                max,
                flattened,
                stats,
                outputs,
                policy,
            })
        }
    }

    pub fn in_plug(&self) -> &ImagePlug {
        &self.in_plug
    }

    pub fn channels_plug(&self) -> PlugId {
        self.channels
    }

    pub fn area_plug(&self) -> PlugId {
        self.area
    }

    pub fn average_plug(&self) -> PlugId {
        self.average
    }

    pub fn min_plug(&self) -> PlugId {
        self.min
    }

    pub fn max_plug(&self) -> PlugId {
        self.max
    }

    pub fn policy(&self) -> &MissingChannelPolicy {
        &self.policy
    }

    /// Position of a colour child within `__stats`.
    fn stats_index(&self, output: PlugId) -> Option<usize> {
        self.outputs.iter().enumerate().find_map(|(block, children)| {
            children
                .iter()
                .position(|child| *child == output)
                .map(|component| block * 4 + component)
        })
    }

    fn slots(&self, ev: &Evaluator<'_>) -> anyhow::Result<[Slot; 4]> {
        let requested: Arc<Vec<String>> = ev.get_as(self.channels)?;
        let present = self.flattened.channel_names(ev)?;

        Ok(std::array::from_fn(|i| match requested.get(i) {
            None => Slot::Unused,
            Some(name) if name.is_empty() => Slot::Unused,
            Some(name) if present.contains(name) => Slot::Channel(name.clone()),
            Some(name) => Slot::Missing(self.policy.stats_for(name)),
        }))
    }

    /// `area` clipped to the data window.
    fn resolved_area(&self, ev: &Evaluator<'_>) -> anyhow::Result<Box2i> {
        let area: Box2i = ev.get_as(self.area)?;
        if area.is_inverted() {
            bail!(
                "area (({}, {}), ({}, {})) is inverted",
                area.min.x,
                area.min.y,
                area.max.x,
                area.max.y
            );
        }

        Ok(area.intersection(&self.flattened.data_window(ev)?))
    }

    fn hash_stats(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
        let mut h = ev.seeded_hasher(output)?;
        self.policy.hash_into(&mut h);

        let area = self.resolved_area(ev)?;
        h.append_i64(area.min.x as i64)
            .append_i64(area.min.y as i64)
            .append_i64(area.max.x as i64)
            .append_i64(area.max.y as i64);

        let slots = self.slots(ev)?;
        let tiles = tiles_in(&area);
        for slot in &slots {
            match slot {
                Slot::Unused => {
                    h.append_u64(0);
                }
                Slot::Missing(stats) => {
                    h.append_u64(1);
                    stats.hash_into(&mut h);
                }
                Slot::Channel(channel) => {
                    h.append_u64(2).append_str(channel);
                    for origin in &tiles {
                        h.append_hash(self.flattened.channel_data_hash(ev, channel, *origin)?);
                    }
                }
            }
        }

        Ok(h.finish_hash())
    }

    fn compute_stats(&self, ev: &Evaluator<'_>) -> anyhow::Result<Vec<f32>> {
        let area = self.resolved_area(ev)?;
        let slots = self.slots(ev)?;
        let channels: Vec<(usize, &str)> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Channel(channel) => Some((i, channel.as_str())),
                _ => None,
            })
            .collect();

        let tiles = tiles_in(&area);
        tracing::debug!(tiles = tiles.len(), channels = channels.len(), "measuring image");

        let totals = tiles
            .par_iter()
            .map(|origin| -> anyhow::Result<[Accumulator; 4]> {
                ev.check_cancellation()?;

                let mut acc = [Accumulator::EMPTY; 4];
                let region = tile_bound(*origin).intersection(&area);
                for (slot, channel) in &channels {
                    let data = self.flattened.channel_data(ev, channel, *origin)?;
                    for y in region.min.y..region.max.y {
                        for x in region.min.x..region.max.x {
                            let index = tile_index(*origin, V2i::new(x, y));
                            let value = data.get(index).copied().ok_or_else(|| {
                                anyhow!(
                                    "channel '{channel}' of tile ({}, {}) holds {} samples, wanted index {index}",
                                    origin.x,
                                    origin.y,
                                    data.len()
                                )
                            })?;
                            acc[*slot].add(value);
                        }
                    }
                }
                Ok(acc)
            })
            .try_reduce(
                || [Accumulator::EMPTY; 4],
                |a, b| Ok(std::array::from_fn(|i| a[i].merge(b[i]))),
            )?;

        let stats: [ChannelStats; 4] = std::array::from_fn(|i| match &slots[i] {
            Slot::Unused => ChannelStats::ZERO,
            Slot::Missing(stats) => *stats,
            Slot::Channel(_) => totals[i].finish(),
        });

        let mut out = Vec::with_capacity(12);
        out.extend(stats.iter().map(|s| s.min));
        out.extend(stats.iter().map(|s| s.max));
        out.extend(stats.iter().map(|s| s.average));
        Ok(out)
    }
}

fn color_children(b: &NodeBuilder<'_>, plug: PlugId) -> GraphResult<[PlugId; 4]> {
    let children = b.graph().plug(plug)?.children();
    Ok(std::array::from_fn(|i| children[i]))
}

impl ComputeNode for ImageStats {
    fn type_name(&self) -> &'static str {
        "ImageStats"
    }

    fn affects(&self, plug: &PlugRef<'_>, outputs: &mut Vec<PlugId>) {
        let id = plug.id();

        if id == self.stats {
            outputs.extend(self.outputs.iter().flatten());
            return;
        }

        let flattened = [
            self.flattened.data_window_plug(),
            self.flattened.channel_names_plug(),
            self.flattened.channel_data_plug(),
        ];
        if id == self.channels || plug.is_descendant_of(self.area) || flattened.contains(&id) {
            outputs.push(self.stats);
        }
    }

    fn hash(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
        if output == self.stats {
            return self.hash_stats(output, ev);
        }

        let mut h = ev.seeded_hasher(output)?;
        h.append_hash(ev.hash(self.stats)?);
        Ok(h.finish_hash())
    }

    fn compute(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Value> {
        if output == self.stats {
            return Ok(Value::from(self.compute_stats(ev)?));
        }

        let index = self
            .stats_index(output)
            .ok_or_else(|| anyhow!("plug {output:?} is not computed by this node"))?;
        let stats: Arc<Vec<f32>> = ev.get_as(self.stats)?;
        let value = stats
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("statistics hold {} values, wanted index {index}", stats.len()))?;
        Ok(Value::Float(value))
    }

    fn cache_policy(&self, output: PlugId) -> CachePolicy {
        if output == self.stats {
            CachePolicy::Cached
        } else {
            CachePolicy::Uncached
        }
    }
}
