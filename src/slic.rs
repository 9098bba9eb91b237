use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use rayon::current_num_threads;
use tracing::debug;

use crate::arrays::{LabelImage, Region, VectorImage};
use crate::assign::{accumulate_tile, assign_tile, UpdateAccumulator};
use crate::atomic_arrays::{AtomicF32Buffer, AtomicLabelBuffer, Label};
use crate::cluster::{center_distance, ClusterStore};
use crate::common::{split_length_to_ranges, Result, SlicConfig, SlicError};
use crate::connectivity::enforce_connectivity;

/// SLIC superpixel segmentation engine.
///
/// One engine value owns the configuration plus the optional abort flag and
/// progress callback; each [`segment`](Slic::segment) call owns its working
/// buffers, so the engine itself carries no state between runs.
///
/// `L` is the output label scalar; a run is rejected up front when the
/// cluster count does not fit it.
pub struct Slic<L: Label = u32, const N: usize = 2> {
    config: SlicConfig<N>,
    abort: Option<Arc<AtomicBool>>,
    progress: Option<Arc<dyn Fn(f32) + Send + Sync>>,
    _label: PhantomData<L>,
}

impl<L: Label, const N: usize> fmt::Debug for Slic<L, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slic")
            .field("config", &self.config)
            .field("abort", &self.abort.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl<L: Label, const N: usize> Slic<L, N> {
    pub fn new(config: SlicConfig<N>) -> Self {
        Self {
            config,
            abort: None,
            progress: None,
            _label: PhantomData,
        }
    }

    pub fn config(&self) -> &SlicConfig<N> {
        &self.config
    }

    /// Cooperative cancellation: the flag is polled by worker 0 between
    /// iterations; a set flag ends the run with [`SlicError::Cancelled`].
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Progress callback, invoked after each completed iteration with the
    /// fraction of the iteration budget spent.
    pub fn with_progress(mut self, callback: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    fn validate(&self, image: &VectorImage<N>) -> Result<[usize; N]> {
        for (axis, grid) in self.config.super_grid_size.iter().enumerate() {
            if *grid == 0 {
                return Err(SlicError::ZeroSuperGridSize { axis });
            }
        }
        if image.num_pixels() == 0 {
            return Err(SlicError::EmptyInput);
        }
        let mut strips = [0usize; N];
        for axis in 0..N {
            strips[axis] = image.size()[axis] / self.config.super_grid_size[axis];
            if strips[axis] == 0 {
                return Err(SlicError::InputTooSmall {
                    axis,
                    size: image.size()[axis],
                    grid: self.config.super_grid_size[axis],
                });
            }
        }
        let clusters: usize = strips.iter().product();
        if clusters >= L::MAX_LABEL {
            return Err(SlicError::TooManyClusters {
                clusters,
                capacity: L::MAX_LABEL,
            });
        }
        Ok(strips)
    }

    /// Runs the segmentation and returns the label image.
    ///
    /// The whole input extent is read and the whole output extent produced.
    /// Output labels are in `[0, C)` with
    /// `C = prod(size_i / super_grid_size_i)`; with connectivity enforcement
    /// enabled they form a dense `[0, K)` range with `K <= C`.
    pub fn segment(&self, image: &VectorImage<N>) -> Result<LabelImage<L, N>> {
        let strips = self.validate(image)?;
        let grid = self.config.super_grid_size;
        let mut scales = [0.0f64; N];
        for a in 0..N {
            scales[a] = 1.0 / (grid[a] as f64 * image.spacing()[a]);
        }

        let store = place_initial_clusters(image, &grid, &strips);
        let num_clusters = store.num_clusters();
        debug!(num_clusters, "initial clustering complete");

        let num_pixels = image.num_pixels();
        let labels = AtomicLabelBuffer::<L>::new_filled(num_pixels, L::from_usize(0));
        let distances = AtomicF32Buffer::new_filled(num_pixels, f32::INFINITY);

        // Split the output along the slowest axis so tiles are contiguous
        // and every pixel has exactly one writer.
        let slow_len = image.size()[N - 1];
        let workers = current_num_threads().min(slow_len).max(1);
        let tiles: Vec<Region<N>> = split_length_to_ranges(slow_len, workers)
            .into_iter()
            .map(|range| {
                let mut tile = image.region();
                tile.index[N - 1] = range.start as isize;
                tile.size[N - 1] = range.len();
                tile
            })
            .collect();

        let barrier = Barrier::new(workers);
        let cancelled = AtomicBool::new(false);
        let accumulators: Vec<Mutex<UpdateAccumulator>> = (0..workers)
            .map(|_| Mutex::new(UpdateAccumulator::new(num_clusters, store.components())))
            .collect();

        // A dedicated pool guarantees that all barrier participants can run
        // at once regardless of what else occupies the global pool.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .expect("worker pool construction failed");
        pool.scope(|s| {
            let barrier = &barrier;
            let cancelled = &cancelled;
            let accumulators = &accumulators;
            let store = &store;
            let labels = &labels;
            let distances = &distances;
            let scales = &scales;
            for (worker, tile) in tiles.iter().enumerate() {
                let tile = *tile;
                s.spawn(move |_| {
                    self.run_worker(
                        worker,
                        tile,
                        image,
                        store,
                        scales,
                        labels,
                        distances,
                        accumulators,
                        barrier,
                        cancelled,
                    )
                });
            }
        });

        if cancelled.load(Ordering::Relaxed) {
            return Err(SlicError::Cancelled);
        }

        if self.config.enforce_connectivity {
            let cell: usize = grid.iter().product();
            let min_size =
                ((self.config.connectivity_min_ratio as f64 * cell as f64).floor() as usize).max(1);
            let relabeled = enforce_connectivity(
                &labels,
                image.size(),
                min_size,
                num_clusters,
                self.config.relabel_sequential,
            )?;
            debug!(relabeled, "connectivity enforcement complete");
        }

        Ok(LabelImage {
            data: labels.snapshot(),
            size: *image.size(),
            spacing: *image.spacing(),
            origin: *image.origin(),
        })
    }

    /// Per-worker body of the iteration loop. All workers execute the same
    /// phases; worker 0 additionally resets the distance image, folds the
    /// per-worker accumulators and polls the abort flag between iterations.
    #[allow(clippy::too_many_arguments)]
    fn run_worker(
        &self,
        worker: usize,
        tile: Region<N>,
        image: &VectorImage<N>,
        store: &ClusterStore,
        scales: &[f64; N],
        labels: &AtomicLabelBuffer<L>,
        distances: &AtomicF32Buffer,
        accumulators: &[Mutex<UpdateAccumulator>],
        barrier: &Barrier,
        cancelled: &AtomicBool,
    ) {
        let grid = &self.config.super_grid_size;
        let weight = self.config.spatial_proximity_weight;
        let mut center_scratch = Vec::new();
        let mut row_scratch = Vec::new();

        perturb_clusters(image, store, worker, accumulators.len());
        barrier.wait();

        for iteration in 0..self.config.max_iterations {
            if worker == 0 {
                if let Some(flag) = &self.abort {
                    if flag.load(Ordering::Relaxed) {
                        cancelled.store(true, Ordering::Relaxed);
                    }
                }
                if !cancelled.load(Ordering::Relaxed) {
                    distances.fill(f32::INFINITY);
                }
            }
            barrier.wait();
            if cancelled.load(Ordering::Relaxed) {
                return;
            }

            assign_tile(
                image,
                store,
                grid,
                scales,
                weight,
                &tile,
                distances,
                labels,
                &mut center_scratch,
                &mut row_scratch,
            );
            barrier.wait();

            {
                let mut accumulator = accumulators[worker].lock().unwrap();
                accumulate_tile(image, &tile, labels, &mut accumulator);
            }
            barrier.wait();

            if worker == 0 {
                self.reduce(store, accumulators, scales, weight, iteration);
            }
            // the barrier at the loop head separates the reduction from the
            // next assignment
        }

        // One more assignment against the final centers so the output is a
        // fixed point of the assignment stage.
        if worker == 0 {
            distances.fill(f32::INFINITY);
        }
        barrier.wait();
        assign_tile(
            image,
            store,
            grid,
            scales,
            weight,
            &tile,
            distances,
            labels,
            &mut center_scratch,
            &mut row_scratch,
        );
    }

    /// Reduction phase B, executed by worker 0 only. Folding the per-worker
    /// accumulators in worker order keeps the float summation deterministic
    /// for a fixed thread count.
    fn reduce(
        &self,
        store: &ClusterStore,
        accumulators: &[Mutex<UpdateAccumulator>],
        scales: &[f64; N],
        weight: f64,
        iteration: usize,
    ) {
        let components = store.components();
        let num_clusters = store.num_clusters();
        store.retire_current();

        let mut totals = vec![0.0f64; num_clusters * components];
        let mut counts = vec![0u64; num_clusters];
        for slot in accumulators {
            let accumulator = slot.lock().unwrap();
            for (i, count) in accumulator.counts.iter().enumerate() {
                if *count == 0 {
                    continue;
                }
                counts[i] += *count as u64;
                let src = &accumulator.sums[i * components..(i + 1) * components];
                for (total, sum) in totals[i * components..(i + 1) * components]
                    .iter_mut()
                    .zip(src)
                {
                    *total += *sum;
                }
            }
        }

        let mut center = vec![0.0f64; components];
        for i in 0..num_clusters {
            if counts[i] == 0 {
                continue;
            }
            let inverse = 1.0 / counts[i] as f64;
            for (c, total) in center
                .iter_mut()
                .zip(&totals[i * components..(i + 1) * components])
            {
                *c = *total * inverse;
            }
            store.write_current(i, &center);
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let mut current = vec![0.0f64; components];
            let mut previous = vec![0.0f64; components];
            let mut residual = 0.0;
            for i in 0..num_clusters {
                store.read_current(i, &mut current);
                store.read_previous(i, &mut previous);
                residual += center_distance::<N>(&current, &previous, scales, weight);
            }
            debug!(iteration, residual = residual.sqrt(), "iteration complete");
        }

        if let Some(progress) = &self.progress {
            progress((iteration + 1) as f32 / self.config.max_iterations as f32);
        }
    }
}

/// Places the initial cluster centers on the analytical grid, distributing
/// the per-axis remainder pixels evenly with integer error accumulators.
fn place_initial_clusters<const N: usize>(
    image: &VectorImage<N>,
    grid: &[usize; N],
    strips: &[usize; N],
) -> ClusterStore {
    let f = image.components();
    let components = f + N;
    let num_clusters: usize = strips.iter().product();
    let store = ClusterStore::new(num_clusters, components);
    let region = image.region();

    let mut start = [0isize; N];
    let mut total_err = [0usize; N];
    let mut acc_err = [0usize; N];
    let mut idx = [0isize; N];
    for a in 0..N {
        total_err[a] = image.size()[a] % grid[a];
        start[a] = region.index[a] + (grid[a] / 2 + total_err[a] / (strips[a] * 2)) as isize;
        idx[a] = start[a];
        acc_err[a] = total_err[a] % (strips[a] * 2);
    }

    let mut counters = [0usize; N];
    let mut center = vec![0.0f64; components];
    let mut produced = 0usize;
    loop {
        let sample = image.pixel_at(&idx);
        for (c, v) in center.iter_mut().zip(sample) {
            *c = *v as f64;
        }
        center[f..].copy_from_slice(&image.index_to_point(&idx));
        store.write_current(produced, &center);
        produced += 1;

        // odometer advance; the error accumulator spreads the leftover
        // pixels of each axis over its strips
        let mut axis = 0;
        loop {
            counters[axis] += 1;
            if counters[axis] < strips[axis] {
                acc_err[axis] += total_err[axis];
                idx[axis] += (grid[axis] + acc_err[axis] / strips[axis]) as isize;
                acc_err[axis] %= strips[axis];
                break;
            }
            counters[axis] = 0;
            idx[axis] = start[axis];
            acc_err[axis] = total_err[axis] % (strips[axis] * 2);
            axis += 1;
            if axis == N {
                break;
            }
        }
        if axis == N {
            break;
        }
    }
    debug_assert_eq!(produced, num_clusters);
    store
}

/// Moves every cluster center to the voxel of lowest gradient magnitude in a
/// radius-1 neighborhood. Clusters are split over workers in contiguous
/// chunks; each worker writes only its own slots.
///
/// The probe region is intersected with the image interior so every central
/// difference stays inside the buffer; centers whose whole neighborhood falls
/// outside the interior are left in place.
fn perturb_clusters<const N: usize>(
    image: &VectorImage<N>,
    store: &ClusterStore,
    worker: usize,
    workers: usize,
) {
    let num_clusters = store.num_clusters();
    let components = store.components();
    let f = components - N;
    debug_assert_eq!(f, image.components());

    let stride = num_clusters.div_ceil(workers);
    let begin = worker * stride;
    let end = num_clusters.min(begin + stride);
    if begin >= end {
        return;
    }

    let interior = image.region().shrink(1);
    let spacing = image.spacing();
    let strides = *image.strides();
    let mut center = vec![0.0f64; components];
    let mut point = [0.0f64; N];

    for i in begin..end {
        store.read_current(i, &mut center);
        point.copy_from_slice(&center[f..]);
        let idx = image.point_to_index(&point);
        let local = match Region::new(idx, [1; N]).pad(&[1; N]).crop(&interior) {
            Some(region) => region,
            None => continue,
        };

        let mut best_score = f64::INFINITY;
        let mut best_idx = idx;
        for row in local.scanlines() {
            let row_offset = image.pixel_offset(&row);
            for j in 0..local.size[0] {
                let offset = row_offset + j;
                let mut score = 0.0;
                for a in 0..N {
                    let forward = image.pixel(offset + strides[a]);
                    let backward = image.pixel(offset - strides[a]);
                    let denominator = 2.0 * spacing[a];
                    for k in 0..f {
                        let g = (forward[k] - backward[k]) as f64 / denominator;
                        score += g * g;
                    }
                }
                if score < best_score {
                    best_score = score;
                    best_idx = row;
                    best_idx[0] += j as isize;
                }
            }
        }

        let sample = image.pixel_at(&best_idx);
        for (c, v) in center.iter_mut().zip(sample) {
            *c = *v as f64;
        }
        center[f..].copy_from_slice(&image.index_to_point(&best_idx));
        store.write_current(i, &center);
    }
}

#[cfg(test)]
mod tests {
    use super::{place_initial_clusters, Slic};
    use crate::arrays::{LabelImage, VectorImage};
    use crate::common::{SlicConfig, SlicError};
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn engine(config: SlicConfig<2>) -> Slic<u32, 2> {
        Slic::new(config)
    }

    fn scenario_config(grid: usize) -> SlicConfig<2> {
        let mut config = SlicConfig::<2>::with_uniform_grid(grid);
        config.max_iterations = 5;
        config.enforce_connectivity = false;
        config
    }

    fn per_label_stats<const N: usize>(
        labels: &LabelImage<u32, N>,
        num_clusters: usize,
    ) -> Vec<usize> {
        let mut counts = vec![0usize; num_clusters];
        for label in &labels.data {
            counts[*label as usize] += 1;
        }
        counts
    }

    #[test]
    fn initial_grid_has_expected_centers() {
        // 10 pixels with stride 3: strips = 3, remainder 1 spread over strips
        let data: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let image = VectorImage::<1>::new(&data, [10], 1);
        let store = place_initial_clusters(&image, &[3], &[3]);
        assert_eq!(store.num_clusters(), 3);
        let mut center = [0.0f64; 2];
        let mut positions = Vec::new();
        for i in 0..3 {
            store.read_current(i, &mut center);
            assert_eq!(center[0], center[1] as f32 as f64);
            positions.push(center[1]);
        }
        assert_eq!(positions, vec![1.0, 4.0, 8.0]);
    }

    #[test]
    fn initial_grid_counts_match_strips() {
        let data = vec![0.0f32; 37 * 23];
        let image = VectorImage::<2>::new(&data, [37, 23], 1);
        let store = place_initial_clusters(&image, &[7, 5], &[5, 4]);
        assert_eq!(store.num_clusters(), 20);
        let mut center = [0.0f64; 3];
        for i in 0..20 {
            store.read_current(i, &mut center);
            assert!(center[1] >= 0.0 && center[1] < 37.0);
            assert!(center[2] >= 0.0 && center[2] < 23.0);
        }
    }

    #[test]
    fn uniform_image_tiles_evenly() {
        let image = VectorImage::<2>::new(&vec![1.0f32; 64 * 64], [64, 64], 1);
        let out = engine(scenario_config(16)).segment(&image).unwrap();

        assert!(out.data.iter().all(|l| *l < 16));
        let counts = per_label_stats(&out, 16);
        for count in &counts {
            assert!((*count as i64 - 256).abs() <= 1, "count {count}");
        }

        // supports are solid rectangles and feature means stay at 1.0
        let mut min = [[64usize; 2]; 16];
        let mut max = [[0usize; 2]; 16];
        let mut sums = [0.0f64; 16];
        for y in 0..64 {
            for x in 0..64 {
                let l = out.data[y * 64 + x] as usize;
                min[l][0] = min[l][0].min(x);
                min[l][1] = min[l][1].min(y);
                max[l][0] = max[l][0].max(x);
                max[l][1] = max[l][1].max(y);
                sums[l] += 1.0;
            }
        }
        for l in 0..16 {
            let area = (max[l][0] - min[l][0] + 1) * (max[l][1] - min[l][1] + 1);
            assert_eq!(area, counts[l], "label {l} is not rectangular");
            assert!((sums[l] / counts[l] as f64 - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn two_region_clusters_follow_the_edge() {
        let mut data = vec![0.0f32; 64 * 64];
        for y in 0..64 {
            for x in 32..64 {
                data[y * 64 + x] = 1.0;
            }
        }
        let image = VectorImage::<2>::new(&data, [64, 64], 1);
        let out = engine(scenario_config(16)).segment(&image).unwrap();

        let mut counts = [0usize; 16];
        let mut sums = [0.0f64; 16];
        let mut min_x = [64usize; 16];
        let mut max_x = [0usize; 16];
        for y in 0..64 {
            for x in 0..64 {
                let l = out.data[y * 64 + x] as usize;
                counts[l] += 1;
                sums[l] += data[y * 64 + x] as f64;
                min_x[l] = min_x[l].min(x);
                max_x[l] = max_x[l].max(x);
            }
        }
        for l in 0..16 {
            assert!(counts[l] > 0, "label {l} lost all pixels");
            let mean = sums[l] / counts[l] as f64;
            assert!(
                mean.abs() < 1e-9 || (mean - 1.0).abs() < 1e-9,
                "label {l} mixes both regions: mean {mean}"
            );
            // no cluster support crosses the vertical mid-line
            if mean < 0.5 {
                assert!(max_x[l] < 32, "dark label {l} reaches x={}", max_x[l]);
            } else {
                assert!(min_x[l] >= 32, "bright label {l} reaches x={}", min_x[l]);
            }
        }
    }

    #[test]
    fn ramp_1d_labels_are_monotone() {
        let data: Vec<f32> = (0..100).map(|i| i as f32 / 99.0).collect();
        let image = VectorImage::<1>::new(&data, [100], 1);
        let mut config = SlicConfig::<1>::with_uniform_grid(10);
        config.max_iterations = 5;
        config.enforce_connectivity = false;
        let out = Slic::<u32, 1>::new(config).segment(&image).unwrap();

        assert!(out.data.iter().all(|l| *l < 10));
        for pair in out.data.windows(2) {
            assert!(pair[0] <= pair[1], "labels not monotone: {pair:?}");
        }
        let mut seen = [false; 10];
        for l in &out.data {
            seen[*l as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn anisotropic_spacing_shapes_supervoxels() {
        let image = VectorImage::<3>::with_geometry(
            &vec![0.0f32; 32 * 32 * 32],
            [32, 32, 32],
            1,
            [1.0, 1.0, 4.0],
            [0.0; 3],
        );
        let mut config = SlicConfig::<3>::default();
        config.super_grid_size = [8, 8, 2];
        config.max_iterations = 5;
        config.enforce_connectivity = false;
        let out = Slic::<u32, 3>::new(config).segment(&image).unwrap();

        let num_clusters = 4 * 4 * 16;
        assert!(out.data.iter().all(|l| (*l as usize) < num_clusters));
        let mut counts = vec![0usize; num_clusters];
        let mut min = vec![[32usize; 3]; num_clusters];
        let mut max = vec![[0usize; 3]; num_clusters];
        for z in 0..32 {
            for y in 0..32 {
                for x in 0..32 {
                    let l = out.data[(z * 32 + y) * 32 + x] as usize;
                    counts[l] += 1;
                    let idx = [x, y, z];
                    for a in 0..3 {
                        min[l][a] = min[l][a].min(idx[a]);
                        max[l][a] = max[l][a].max(idx[a]);
                    }
                }
            }
        }
        // the distance scales normalize by physical grid extent, so the
        // supervoxels are 8x8x2 index blocks rather than cubes
        for l in 0..num_clusters {
            assert_eq!(counts[l], 128, "label {l}");
            assert_eq!(max[l][0] - min[l][0] + 1, 8);
            assert_eq!(max[l][1] - min[l][1] + 1, 8);
            assert_eq!(max[l][2] - min[l][2] + 1, 2);
        }
    }

    #[test]
    fn checkerboard_rgb_means_stay_pure() {
        let mut data = vec![0.0f32; 64 * 64 * 3];
        for y in 0..64 {
            for x in 0..64 {
                let offset = (y * 64 + x) * 3;
                if (x / 8 + y / 8) % 2 == 0 {
                    data[offset] = 1.0;
                } else {
                    data[offset + 1] = 1.0;
                }
            }
        }
        let image = VectorImage::<2>::new(&data, [64, 64], 3);
        let out = engine(scenario_config(8)).segment(&image).unwrap();

        assert!(out.data.iter().all(|l| *l < 64));
        let mut counts = [0usize; 64];
        let mut sums = [[0.0f64; 3]; 64];
        for p in 0..64 * 64 {
            let l = out.data[p] as usize;
            counts[l] += 1;
            for c in 0..3 {
                sums[l][c] += data[p * 3 + c] as f64;
            }
        }
        for l in 0..64 {
            assert!(counts[l] > 0);
            let mean: Vec<f64> = sums[l].iter().map(|s| s / counts[l] as f64).collect();
            let pure_red = (mean[0] - 1.0).abs() < 1e-6 && mean[1].abs() < 1e-6;
            let pure_green = mean[0].abs() < 1e-6 && (mean[1] - 1.0).abs() < 1e-6;
            assert!(
                pure_red || pure_green,
                "label {l} mean {mean:?} is not a pure block color"
            );
            assert!(mean[2].abs() < 1e-9);
        }
    }

    #[test]
    fn connectivity_enforcement_bounds_component_sizes() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);
        let data: Vec<f32> = (0..32 * 32).map(|_| rng.gen::<f32>()).collect();
        let image = VectorImage::<2>::new(&data, [32, 32], 1);
        let mut config = SlicConfig::<2>::with_uniform_grid(8);
        config.max_iterations = 5;
        config.enforce_connectivity = true;
        config.connectivity_min_ratio = 0.5;
        config.relabel_sequential = true;
        let out = engine(config).segment(&image).unwrap();

        let k = *out.data.iter().max().unwrap() as usize + 1;
        assert!(k <= 16, "K = {k}");
        let mut seen = vec![false; k];
        for l in &out.data {
            seen[*l as usize] = true;
        }
        assert!(seen.iter().all(|s| *s), "labels are not dense");

        // flood fill every component and check the size floor
        let mut visited = vec![false; 32 * 32];
        let mut queue = Vec::new();
        for seed in 0..32 * 32 {
            if visited[seed] {
                continue;
            }
            let label = out.data[seed];
            let mut size = 0usize;
            visited[seed] = true;
            queue.push(seed);
            while let Some(p) = queue.pop() {
                size += 1;
                let (x, y) = (p % 32, p / 32);
                let mut neighbors = Vec::with_capacity(4);
                if x > 0 {
                    neighbors.push(p - 1);
                }
                if x < 31 {
                    neighbors.push(p + 1);
                }
                if y > 0 {
                    neighbors.push(p - 32);
                }
                if y < 31 {
                    neighbors.push(p + 32);
                }
                for q in neighbors {
                    if !visited[q] && out.data[q] == label {
                        visited[q] = true;
                        queue.push(q);
                    }
                }
            }
            assert!(size >= 32, "component of label {label} has size {size}");
        }
    }

    #[test]
    fn zero_iterations_still_yields_valid_labels() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let data: Vec<f32> = (0..48 * 48).map(|_| rng.gen::<f32>()).collect();
        let image = VectorImage::<2>::new(&data, [48, 48], 1);
        let mut config = scenario_config(16);
        config.max_iterations = 0;
        let first = engine(config.clone()).segment(&image).unwrap();
        assert!(first.data.iter().all(|l| *l < 9));
        let second = engine(config).segment(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn runs_are_deterministic() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let data: Vec<f32> = (0..64 * 48).map(|_| rng.gen::<f32>()).collect();
        let image = VectorImage::<2>::new(&data, [64, 48], 1);
        let mut config = SlicConfig::<2>::with_uniform_grid(16);
        config.max_iterations = 4;
        let first = engine(config.clone()).segment(&image).unwrap();
        let second = engine(config).segment(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn configuration_and_dimension_errors_are_reported() {
        let image = VectorImage::<2>::new(&vec![0.0f32; 16], [4, 4], 1);
        let mut config = SlicConfig::<2>::default();
        config.super_grid_size = [0, 4];
        assert_eq!(
            engine(config).segment(&image).unwrap_err(),
            SlicError::ZeroSuperGridSize { axis: 0 }
        );

        let config = SlicConfig::<2>::with_uniform_grid(100);
        assert_eq!(
            engine(config).segment(&image).unwrap_err(),
            SlicError::InputTooSmall {
                axis: 0,
                size: 4,
                grid: 100
            }
        );

        let empty = VectorImage::<2>::new(&[], [0, 4], 1);
        let config = SlicConfig::<2>::with_uniform_grid(2);
        assert_eq!(
            engine(config).segment(&empty).unwrap_err(),
            SlicError::EmptyInput
        );
    }

    #[test]
    fn cluster_count_is_checked_against_label_capacity() {
        let mut config = SlicConfig::<1>::with_uniform_grid(1);
        config.max_iterations = 1;
        config.enforce_connectivity = false;

        let data = vec![0.5f32; 254];
        let image = VectorImage::<1>::new(&data, [254], 1);
        let out = Slic::<u8, 1>::new(config.clone()).segment(&image).unwrap();
        assert!(out.data.iter().all(|l| (*l as usize) < 254));

        let data = vec![0.5f32; 255];
        let image = VectorImage::<1>::new(&data, [255], 1);
        assert_eq!(
            Slic::<u8, 1>::new(config).segment(&image).unwrap_err(),
            SlicError::TooManyClusters {
                clusters: 255,
                capacity: 255
            }
        );
    }

    #[test]
    fn abort_flag_cancels_between_iterations() {
        let image = VectorImage::<2>::new(&vec![0.0f32; 32 * 32], [32, 32], 1);
        let mut config = SlicConfig::<2>::with_uniform_grid(8);
        config.enforce_connectivity = false;
        let flag = Arc::new(AtomicBool::new(true));
        let result = Slic::<u32, 2>::new(config)
            .with_abort_flag(Arc::clone(&flag))
            .segment(&image);
        assert_eq!(result.unwrap_err(), SlicError::Cancelled);
    }

    #[test]
    fn progress_reports_iteration_fractions() {
        use std::sync::Mutex;
        let image = VectorImage::<2>::new(&vec![0.0f32; 32 * 32], [32, 32], 1);
        let mut config = SlicConfig::<2>::with_uniform_grid(8);
        config.max_iterations = 4;
        config.enforce_connectivity = false;
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        Slic::<u32, 2>::new(config)
            .with_progress(move |fraction| sink.lock().unwrap().push(fraction))
            .segment(&image)
            .unwrap();
        assert_eq!(*reports.lock().unwrap(), vec![0.25, 0.5, 0.75, 1.0]);
    }
}
