use std::collections::BTreeMap;
use std::mem::size_of;

use anyhow::ensure;

use crate::core::{Blake3Hasher, Hash32};
use crate::image::TILE_SIZE;
use crate::value::{Box2i, V2i};

/// An image held in memory, flat or deep.
///
/// Channel data is stored row-major over the data window. Deep images store
/// a sample count per pixel and the samples of all pixels back to back.
/// The content fingerprint is computed once on construction so that hashing
/// a plug holding a large image stays cheap.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ImageBuffer {
    display_window: Box2i,
    data_window: Box2i,
    channels: BTreeMap<String, Vec<f32>>,
    /// Per-pixel sample counts for deep images.
    sample_counts: Option<Vec<u32>>,
    /// Index of the first sample of every pixel, plus one trailing entry.
    sample_starts: Vec<usize>,
    fingerprint: Hash32,
}

impl ImageBuffer {
    pub fn flat<I, S>(display_window: Box2i, data_window: Box2i, channels: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let pixels = pixel_count(&data_window);
        let channels: BTreeMap<String, Vec<f32>> = channels
            .into_iter()
            .map(|(name, data)| (name.into(), data))
            .collect();

        for (name, data) in &channels {
            ensure!(
                data.len() == pixels,
                "channel '{name}' has {} values, the data window holds {pixels} pixels",
                data.len()
            );
        }

        Ok(Self::finish(display_window, data_window, channels, None))
    }

    pub fn deep<I, S>(
        display_window: Box2i,
        data_window: Box2i,
        sample_counts: Vec<u32>,
        channels: I,
    ) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let pixels = pixel_count(&data_window);
        ensure!(
            sample_counts.len() == pixels,
            "{} sample counts given for {pixels} pixels",
            sample_counts.len()
        );

        let samples: usize = sample_counts.iter().map(|c| *c as usize).sum();
        let channels: BTreeMap<String, Vec<f32>> = channels
            .into_iter()
            .map(|(name, data)| (name.into(), data))
            .collect();

        for (name, data) in &channels {
            ensure!(
                data.len() == samples,
                "deep channel '{name}' has {} values, expected {samples} samples",
                data.len()
            );
        }

        Ok(Self::finish(display_window, data_window, channels, Some(sample_counts)))
    }

    fn finish(
        display_window: Box2i,
        data_window: Box2i,
        channels: BTreeMap<String, Vec<f32>>,
        sample_counts: Option<Vec<u32>>,
    ) -> Self {
        let mut h = Blake3Hasher::new();
        for b in [display_window, data_window] {
            h.append_i64(b.min.x as i64)
                .append_i64(b.min.y as i64)
                .append_i64(b.max.x as i64)
                .append_i64(b.max.y as i64);
        }

        for (name, data) in &channels {
            h.append_str(name).append_u64(data.len() as u64);
            data.iter().for_each(|v| {
                h.append_f32(*v);
            });
        }

        let mut sample_starts = Vec::new();
        if let Some(counts) = &sample_counts {
            h.append_bool(true);
            sample_starts.reserve(counts.len() + 1);
            let mut start = 0usize;
            for count in counts {
                h.append_u64(*count as u64);
                sample_starts.push(start);
                start += *count as usize;
            }
            sample_starts.push(start);
        }

        Self {
            display_window,
            data_window,
            channels,
            sample_counts,
            sample_starts,
            fingerprint: h.finish_hash(),
        }
    }

    pub fn display_window(&self) -> Box2i {
        self.display_window
    }

    pub fn data_window(&self) -> Box2i {
        self.data_window
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn channel(&self, name: &str) -> Option<&[f32]> {
        self.channels.get(name).map(Vec::as_slice)
    }

    pub fn is_deep(&self) -> bool {
        self.sample_counts.is_some()
    }

    pub fn fingerprint(&self) -> Hash32 {
        self.fingerprint
    }

    pub fn memory_usage(&self) -> usize {
        let channels: usize = self
            .channels
            .iter()
            .map(|(name, data)| name.len() + data.len() * size_of::<f32>())
            .sum();
        let counts = self.sample_counts.as_ref().map_or(0, |c| c.len() * size_of::<u32>());

        size_of::<Self>() + channels + counts + self.sample_starts.len() * size_of::<usize>()
    }

    fn pixel_index(&self, p: V2i) -> Option<usize> {
        if !self.data_window.contains(p) {
            return None;
        }

        let width = self.data_window.width() as usize;
        let x = (p.x - self.data_window.min.x) as usize;
        let y = (p.y - self.data_window.min.y) as usize;
        Some(y * width + x)
    }

    /// Cumulative sample counts for the tile at `origin`, one entry per
    /// pixel in row-major tile order. Flat images have one sample per pixel.
    pub fn tile_sample_offsets(&self, origin: V2i) -> Vec<i32> {
        let mut offsets = Vec::with_capacity((TILE_SIZE * TILE_SIZE) as usize);
        let mut total = 0i32;

        for_each_tile_pixel(origin, |p| {
            total += match (&self.sample_counts, self.pixel_index(p)) {
                (Some(counts), Some(index)) => counts[index] as i32,
                (Some(_), None) => 0,
                (None, _) => 1,
            };
            offsets.push(total);
        });

        offsets
    }

    /// Samples of `channel` for the tile at `origin`; `None` when the
    /// channel does not exist. Pixels outside the data window read as zero
    /// for flat images and hold no samples for deep ones.
    pub fn tile_channel_data(&self, channel: &str, origin: V2i) -> Option<Vec<f32>> {
        let data = self.channels.get(channel)?;
        let mut result = Vec::with_capacity((TILE_SIZE * TILE_SIZE) as usize);

        for_each_tile_pixel(origin, |p| match (&self.sample_counts, self.pixel_index(p)) {
            (None, Some(index)) => result.push(data[index]),
            (None, None) => result.push(0.0),
            (Some(_), Some(index)) => {
                let (start, end) = (self.sample_starts[index], self.sample_starts[index + 1]);
                result.extend_from_slice(&data[start..end]);
            }
            (Some(_), None) => {}
        });

        Some(result)
    }
}

fn pixel_count(window: &Box2i) -> usize {
    window.width() as usize * window.height() as usize
}

fn for_each_tile_pixel(origin: V2i, mut f: impl FnMut(V2i)) {
    for y in 0..TILE_SIZE {
        for x in 0..TILE_SIZE {
            f(V2i::new(origin.x + x, origin.y + y));
        }
    }
}
