//! Lazy, tiled image evaluation.
//!
//! Image data is evaluated one 64×64 tile and one channel at a time: the
//! tile origin and channel name travel in the context, so a node only
//! computes the tiles it is asked for. Format, data window, channel names
//! and the deep flag are global to the image and evaluated without those
//! variables.

mod buffer;
mod flatten;
mod source;
mod stats;

use std::sync::{Arc, LazyLock};

use anyhow::bail;

pub use crate::image::buffer::ImageBuffer;
pub use crate::image::flatten::Flatten;
pub use crate::image::source::BufferSource;
pub use crate::image::stats::{ChannelStats, ImageStats, MissingChannelPolicy};

use crate::context::Context;
use crate::core::Hash32;
use crate::engine::Evaluator;
use crate::error::{EvalResult, GraphResult};
use crate::graph::{Direction, NodeBuilder, PlugId, PlugRef};
use crate::value::{Box2i, V2i, Value, ValueType};

/// Width and height of a tile in pixels.
pub const TILE_SIZE: i32 = 64;

pub const TILE_ORIGIN: &str = "image:tileOrigin";
pub const CHANNEL_NAME: &str = "image:channelName";

/// Origin of the tile containing `p`.
pub fn tile_origin(p: V2i) -> V2i {
    V2i::new(
        p.x.div_euclid(TILE_SIZE) * TILE_SIZE,
        p.y.div_euclid(TILE_SIZE) * TILE_SIZE,
    )
}

pub fn tile_bound(origin: V2i) -> Box2i {
    Box2i::new(origin, V2i::new(origin.x + TILE_SIZE, origin.y + TILE_SIZE))
}

/// Origins of every tile overlapping `area`, row by row.
pub fn tiles_in(area: &Box2i) -> Vec<V2i> {
    if area.is_empty() {
        return Vec::new();
    }

    let first = tile_origin(area.min);
    let mut tiles = Vec::new();
    for y in (first.y..area.max.y).step_by(TILE_SIZE as usize) {
        for x in (first.x..area.max.x).step_by(TILE_SIZE as usize) {
            tiles.push(V2i::new(x, y));
        }
    }
    tiles
}

/// `context` scoped to one tile, and to one channel of it when `channel`
/// is given.
pub fn tile_context(context: &Context, origin: V2i, channel: Option<&str>) -> Context {
    let context = context.with(TILE_ORIGIN, origin);
    match channel {
        Some(channel) => context.with(CHANNEL_NAME, channel),
        None => context.without(CHANNEL_NAME),
    }
}

/// `context` with the per-tile variables removed.
pub fn global_context(context: &Context) -> Context {
    context.without(TILE_ORIGIN).without(CHANNEL_NAME)
}

/// The tile being evaluated, for use inside node hooks.
pub fn current_tile(context: &Context) -> anyhow::Result<V2i> {
    match context.get(TILE_ORIGIN) {
        Some(Value::V2i(origin)) => Ok(*origin),
        Some(other) => bail!("{TILE_ORIGIN} holds a {} instead of a tile origin", other.value_type()),
        None => bail!("{TILE_ORIGIN} is not set; tile plugs need a tile origin"),
    }
}

/// The channel being evaluated, for use inside node hooks.
pub fn current_channel(context: &Context) -> anyhow::Result<Arc<str>> {
    match context.get(CHANNEL_NAME) {
        Some(Value::String(channel)) => Ok(channel.clone()),
        Some(other) => bail!("{CHANNEL_NAME} holds a {} instead of a channel name", other.value_type()),
        None => bail!("{CHANNEL_NAME} is not set; channel data needs a channel"),
    }
}

/// Index of pixel `p` within the tile at `origin`.
pub(crate) fn tile_index(origin: V2i, p: V2i) -> usize {
    ((p.y - origin.y) * TILE_SIZE + (p.x - origin.x)) as usize
}

static FLAT_SAMPLE_OFFSETS: LazyLock<Arc<Vec<i32>>> =
    LazyLock::new(|| Arc::new((1..=TILE_SIZE * TILE_SIZE).collect()));

/// Sample offsets of a flat tile: one sample per pixel.
pub fn flat_sample_offsets() -> Arc<Vec<i32>> {
    FLAT_SAMPLE_OFFSETS.clone()
}

/// A compound plug carrying an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImagePlug {
    root: PlugId,
    format: PlugId,
    data_window: PlugId,
    channel_names: PlugId,
    deep: PlugId,
    sample_offsets: PlugId,
    channel_data: PlugId,
}

impl ImagePlug {
    pub fn add(b: &mut NodeBuilder<'_>, name: &str, direction: Direction) -> GraphResult<Self> {
        let root = b.add_compound(None, name, direction)?;
        Ok(Self {
            root,
            format: b.add_child(root, "format", ValueType::Box2i)?,
            data_window: b.add_child(root, "dataWindow", ValueType::Box2i)?,
            channel_names: b.add_child(root, "channelNames", ValueType::StringVector)?,
            deep: b.add_child(root, "deep", ValueType::Bool)?,
            sample_offsets: b.add_child(root, "sampleOffsets", ValueType::IntVector)?,
            channel_data: b.add_child(root, "channelData", ValueType::FloatVector)?,
        })
    }

    pub fn root(&self) -> PlugId {
        self.root
    }

    pub fn children(&self) -> [PlugId; 6] {
        [
            self.format,
            self.data_window,
            self.channel_names,
            self.deep,
            self.sample_offsets,
            self.channel_data,
        ]
    }

    pub fn contains(&self, plug: &PlugRef<'_>) -> bool {
        plug.is_descendant_of(self.root)
    }

    pub fn format_plug(&self) -> PlugId {
        self.format
    }

    pub fn data_window_plug(&self) -> PlugId {
        self.data_window
    }

    pub fn channel_names_plug(&self) -> PlugId {
        self.channel_names
    }

    pub fn deep_plug(&self) -> PlugId {
        self.deep
    }

    pub fn sample_offsets_plug(&self) -> PlugId {
        self.sample_offsets
    }

    pub fn channel_data_plug(&self) -> PlugId {
        self.channel_data
    }

    fn global<'a>(ev: &Evaluator<'a>) -> Evaluator<'a> {
        ev.with_context(global_context(ev.context()))
    }

    pub fn format(&self, ev: &Evaluator<'_>) -> EvalResult<Box2i> {
        Self::global(ev).get_as(self.format)
    }

    pub fn data_window(&self, ev: &Evaluator<'_>) -> EvalResult<Box2i> {
        Self::global(ev).get_as(self.data_window)
    }

    pub fn channel_names(&self, ev: &Evaluator<'_>) -> EvalResult<Arc<Vec<String>>> {
        Self::global(ev).get_as(self.channel_names)
    }

    pub fn deep(&self, ev: &Evaluator<'_>) -> EvalResult<bool> {
        Self::global(ev).get_as(self.deep)
    }

    pub fn sample_offsets(&self, ev: &Evaluator<'_>, origin: V2i) -> EvalResult<Arc<Vec<i32>>> {
        ev.with_context(tile_context(ev.context(), origin, None))
            .get_as(self.sample_offsets)
    }

    pub fn channel_data(&self, ev: &Evaluator<'_>, channel: &str, origin: V2i) -> EvalResult<Arc<Vec<f32>>> {
        ev.with_context(tile_context(ev.context(), origin, Some(channel)))
            .get_as(self.channel_data)
    }

    /// Hash of one of the global children.
    pub fn global_hash(&self, ev: &Evaluator<'_>, plug: PlugId) -> EvalResult<Hash32> {
        Self::global(ev).hash(plug)
    }

    pub fn sample_offsets_hash(&self, ev: &Evaluator<'_>, origin: V2i) -> EvalResult<Hash32> {
        ev.with_context(tile_context(ev.context(), origin, None))
            .hash(self.sample_offsets)
    }

    pub fn channel_data_hash(&self, ev: &Evaluator<'_>, channel: &str, origin: V2i) -> EvalResult<Hash32> {
        ev.with_context(tile_context(ev.context(), origin, Some(channel)))
            .hash(self.channel_data)
    }
}
