use multiversion::multiversion;

use crate::arrays::{Region, VectorImage};
use crate::atomic_arrays::{AtomicF32Buffer, AtomicLabelBuffer, Label};
use crate::cluster::ClusterStore;

/// Dense per-worker accumulator for the reduction stage, keyed by label.
///
/// A dense layout keeps the hot loop free of hashing and allocation; the
/// buffers are zeroed at the start of every iteration and drained by worker 0
/// after the barrier.
pub struct UpdateAccumulator {
    pub sums: Vec<f64>,
    pub counts: Vec<u32>,
    components: usize,
}

impl UpdateAccumulator {
    pub fn new(num_clusters: usize, components: usize) -> Self {
        Self {
            sums: vec![0.0; num_clusters * components],
            counts: vec![0; num_clusters],
            components,
        }
    }

    pub fn reset(&mut self) {
        self.sums.fill(0.0);
        self.counts.fill(0);
    }
}

/// Joint distances of one scanline against one cluster center.
///
/// Only the axis-0 spatial term varies along a scanline; the terms of the
/// higher axes are folded into `spatial_base` by the caller. `pixels` holds
/// `out.len()` interleaved pixels of `features.len()` samples each.
#[multiversion(targets = "simd")]
fn row_joint_distances(
    features: &[f64],
    center_x: f64,
    pixels: &[f32],
    x_start: f64,
    x_spacing: f64,
    x_scale: f64,
    weight_sq: f64,
    spatial_base: f64,
    out: &mut [f32],
) {
    let f = features.len();
    debug_assert_eq!(pixels.len(), out.len() * f);
    for (j, out_distance) in out.iter_mut().enumerate() {
        let sample = &pixels[j * f..j * f + f];
        let mut feature_term = 0.0f64;
        for (c, v) in features.iter().zip(sample) {
            let d = c - *v as f64;
            feature_term += d * d;
        }
        let ds = (center_x - (x_start + j as f64 * x_spacing)) * x_scale;
        *out_distance = (feature_term + weight_sq * (spatial_base + ds * ds)) as f32;
    }
}

/// Assignment stage for one worker tile.
///
/// Scans every cluster, crops its search window of radius `grid` to the tile
/// and updates the running per-pixel minimum distance and label. The tile
/// partition guarantees a single writer per pixel; the strict `<` comparison
/// makes earlier cluster indices win exact ties.
#[allow(clippy::too_many_arguments)]
pub fn assign_tile<L: Label, const N: usize>(
    image: &VectorImage<N>,
    clusters: &ClusterStore,
    grid: &[usize; N],
    scales: &[f64; N],
    weight: f64,
    tile: &Region<N>,
    distances: &AtomicF32Buffer,
    labels: &AtomicLabelBuffer<L>,
    center_scratch: &mut Vec<f64>,
    row_scratch: &mut Vec<f32>,
) {
    let components = clusters.components();
    let f = components - N;
    let weight_sq = weight * weight;
    let x_spacing = image.spacing()[0];
    center_scratch.resize(components, 0.0);
    row_scratch.resize(2 * grid[0] + 1, 0.0);

    for i in 0..clusters.num_clusters() {
        clusters.read_current(i, center_scratch);
        let mut point = [0.0f64; N];
        point.copy_from_slice(&center_scratch[f..]);
        let idx = image.point_to_index(&point);
        let local = match Region::new(idx, [1; N]).pad(grid).crop(tile) {
            Some(region) => region,
            None => continue,
        };
        let label = L::from_usize(i);
        let row_len = local.size[0];
        let features = &center_scratch[..f];
        let center_x = center_scratch[f];

        for row in local.scanlines() {
            let pt = image.index_to_point(&row);
            let mut spatial_base = 0.0;
            for a in 1..N {
                let d = (center_scratch[f + a] - pt[a]) * scales[a];
                spatial_base += d * d;
            }
            let offset = image.pixel_offset(&row);
            let pixels = image.samples_row(offset, row_len);
            let row_distances = &mut row_scratch[..row_len];
            row_joint_distances(
                features,
                center_x,
                pixels,
                pt[0],
                x_spacing,
                scales[0],
                weight_sq,
                spatial_base,
                row_distances,
            );
            for (j, distance) in row_distances.iter().enumerate() {
                let cell = offset + j;
                if *distance < distances.load(cell) {
                    distances.store(cell, *distance);
                    labels.store(cell, label);
                }
            }
        }
    }
}

/// Reduction phase A for one worker tile: accumulate the feature values and
/// physical coordinates of every pixel into its label's running sum.
pub fn accumulate_tile<L: Label, const N: usize>(
    image: &VectorImage<N>,
    tile: &Region<N>,
    labels: &AtomicLabelBuffer<L>,
    accumulator: &mut UpdateAccumulator,
) {
    accumulator.reset();
    let components = accumulator.components;
    let f = components - N;
    debug_assert_eq!(f, image.components());
    let x_spacing = image.spacing()[0];
    let row_len = tile.size[0];

    for row in tile.scanlines() {
        let offset = image.pixel_offset(&row);
        let pt = image.index_to_point(&row);
        let pixels = image.samples_row(offset, row_len);
        for j in 0..row_len {
            let l = labels.load(offset + j).to_usize();
            accumulator.counts[l] += 1;
            let slot = &mut accumulator.sums[l * components..(l + 1) * components];
            for (s, v) in slot.iter_mut().zip(&pixels[j * f..j * f + f]) {
                *s += *v as f64;
            }
            slot[f] += pt[0] + j as f64 * x_spacing;
            for a in 1..N {
                slot[f + a] += pt[a];
            }
        }
    }
}
