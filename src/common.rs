use std::ops::Range;
use thiserror::Error;

/// Errors reported by the segmentation engine.
///
/// Configuration, capacity and dimension problems are detected before any
/// working buffer is allocated, so a failed run never produces a partially
/// written output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlicError {
    /// The super-grid size contains a zero entry.
    #[error("super-grid size along axis {axis} must be non-zero")]
    ZeroSuperGridSize { axis: usize },
    /// The input image has no pixels.
    #[error("input image has no pixels")]
    EmptyInput,
    /// Some axis is shorter than one super-grid cell, so no cluster fits.
    #[error("input size {size} along axis {axis} is smaller than the super-grid size {grid}")]
    InputTooSmall {
        axis: usize,
        size: usize,
        grid: usize,
    },
    /// More clusters than the output label type can represent.
    #[error("{clusters} clusters do not fit in the output label type (capacity {capacity})")]
    TooManyClusters { clusters: usize, capacity: usize },
    /// The caller-provided abort flag was observed between iterations.
    #[error("segmentation cancelled between iterations")]
    Cancelled,
    /// The connectivity enforcer left a component without a resolved label.
    #[error("connectivity enforcement left a component without a label")]
    ConnectivityInvariant,
}

pub type Result<T> = std::result::Result<T, SlicError>;

/// Main config for the segmentation.
///
/// `N` is the image dimension. The joint clustering space has `F + N`
/// components, where `F` is the number of components per pixel of the input.
#[derive(Clone, Debug, PartialEq)]
pub struct SlicConfig<const N: usize> {
    /// Per-axis stride, in pixels, between initial cluster centers. Also the
    /// radius of each cluster's per-iteration search window.
    ///
    /// The number of clusters is the product over all axes of
    /// `image_size / super_grid_size`, so every axis of the input must be at
    /// least one super-grid cell long.
    pub super_grid_size: [usize; N],
    /// Fixed iteration budget for the assign/update loop. There is no early
    /// exit on convergence. Zero is accepted; the output is then determined
    /// by the initial (perturbed) cluster centers alone.
    pub max_iterations: usize,
    /// Trades feature similarity against spatial proximity. Higher means more
    /// compact superpixels.
    ///
    /// The default of 10 suits feature ranges like CIE L*a*b*; scale it to
    /// the range of your pixel values.
    pub spatial_proximity_weight: f64,
    /// Run the connectivity post-pass that relabels spatially disconnected
    /// fragments.
    pub enforce_connectivity: bool,
    /// Minimum connected-component size, expressed as a ratio of the
    /// super-grid cell volume. Components smaller than this are merged into a
    /// neighboring component.
    pub connectivity_min_ratio: f32,
    /// Run the connectivity relabeling single-threaded so that output labels
    /// are dense and in scan order.
    pub relabel_sequential: bool,
}

impl<const N: usize> Default for SlicConfig<N> {
    fn default() -> Self {
        Self {
            super_grid_size: [50; N],
            max_iterations: if N <= 2 { 10 } else { 5 },
            spatial_proximity_weight: 10.0,
            enforce_connectivity: true,
            connectivity_min_ratio: 0.25,
            relabel_sequential: false,
        }
    }
}

impl<const N: usize> SlicConfig<N> {
    /// Config with the same super-grid stride along every axis.
    pub fn with_uniform_grid(factor: usize) -> Self {
        Self {
            super_grid_size: [factor; N],
            ..Self::default()
        }
    }
}

pub(crate) fn split_length_to_ranges(length: usize, splits: usize) -> Vec<Range<usize>> {
    debug_assert!(splits > 0);
    let chunk = length / splits;
    let mut remainder = length % splits;
    let mut ranges = Vec::with_capacity(splits);
    let mut start = 0;
    for _ in 0..splits {
        let mut end = start + chunk;
        if remainder > 0 {
            remainder -= 1;
            end += 1;
        }
        ranges.push(start..end);
        start = end;
    }
    ranges
}
