use crate::atomic_arrays::AtomicF64Buffer;

/// Flat store of `C` clusters of `D = F + N` components each.
///
/// The first `F` components of a cluster are the mean feature values of its
/// members, the last `N` are the mean physical coordinates. Both generations
/// live in contiguous buffers so a cluster is always a `D`-length slice view;
/// `current` holds the centers used by the next assignment, `previous` the
/// ones retired by the last reduction.
///
/// Writers and readers are separated by the iteration barrier: workers write
/// disjoint slots during perturbation, worker 0 alone writes during the
/// reduction, and everyone reads during assignment.
pub struct ClusterStore {
    current: AtomicF64Buffer,
    previous: AtomicF64Buffer,
    num_clusters: usize,
    components: usize,
}

impl ClusterStore {
    pub fn new(num_clusters: usize, components: usize) -> Self {
        let len = num_clusters * components;
        Self {
            current: AtomicF64Buffer::new_zeroed(len),
            previous: AtomicF64Buffer::new_zeroed(len),
            num_clusters,
            components,
        }
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// Number of components per cluster (`F + N`).
    pub fn components(&self) -> usize {
        self.components
    }

    #[inline]
    pub fn read_current(&self, cluster: usize, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.components);
        let base = cluster * self.components;
        for (k, value) in out.iter_mut().enumerate() {
            *value = self.current.load(base + k);
        }
    }

    #[inline]
    pub fn read_previous(&self, cluster: usize, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.components);
        let base = cluster * self.components;
        for (k, value) in out.iter_mut().enumerate() {
            *value = self.previous.load(base + k);
        }
    }

    #[inline]
    pub fn write_current(&self, cluster: usize, values: &[f64]) {
        debug_assert_eq!(values.len(), self.components);
        let base = cluster * self.components;
        for (k, value) in values.iter().enumerate() {
            self.current.store(base + k, *value);
        }
    }

    /// Moves `current` into `previous` and zeroes `current`. Called by
    /// worker 0 at the start of the reduction; clusters that receive no
    /// members this iteration keep the zeroed state.
    pub fn retire_current(&self) {
        for offset in 0..self.current.len() {
            self.previous.store(offset, self.current.load(offset));
            self.current.store(offset, 0.0);
        }
    }
}

/// Squared joint distance between two cluster centers.
///
/// Comparisons in the engine always operate on squared distances; no square
/// root is applied anywhere.
pub fn center_distance<const N: usize>(
    a: &[f64],
    b: &[f64],
    scales: &[f64; N],
    weight: f64,
) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    debug_assert!(a.len() > N);
    let features = a.len() - N;
    let mut feature_term = 0.0;
    for k in 0..features {
        let d = a[k] - b[k];
        feature_term += d * d;
    }
    let mut spatial_term = 0.0;
    for i in 0..N {
        let d = (a[features + i] - b[features + i]) * scales[i];
        spatial_term += d * d;
    }
    feature_term + weight * weight * spatial_term
}

/// Squared joint distance between a cluster center and a sample given by its
/// pixel values and physical point.
pub fn sample_distance<const N: usize>(
    center: &[f64],
    values: &[f32],
    point: &[f64; N],
    scales: &[f64; N],
    weight: f64,
) -> f64 {
    debug_assert_eq!(center.len(), values.len() + N);
    let mut feature_term = 0.0;
    for (c, v) in center.iter().zip(values) {
        let d = c - *v as f64;
        feature_term += d * d;
    }
    let mut spatial_term = 0.0;
    for i in 0..N {
        let d = (center[values.len() + i] - point[i]) * scales[i];
        spatial_term += d * d;
    }
    feature_term + weight * weight * spatial_term
}
