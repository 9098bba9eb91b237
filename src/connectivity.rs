use rayon::current_num_threads;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Barrier, Mutex};
use tracing::debug;

use crate::arrays::Region;
use crate::atomic_arrays::{AtomicLabelBuffer, Label};
use crate::common::{split_length_to_ranges, Result, SlicError};

/// Pixel-granularity union-find over the label image.
///
/// Merging always points the larger root at the smaller one, so the final
/// root of every component is its first (row-major) pixel regardless of the
/// merge order. That keeps component numbering identical across thread
/// counts.
pub struct DisjointSet {
    parents: Vec<AtomicU32>,
}

impl DisjointSet {
    pub fn new(size: u32) -> Self {
        assert!(size > 0, "size must be larger than zero");
        assert!(size < u32::MAX, "size must be smaller than {}", u32::MAX);
        DisjointSet {
            parents: (0..size).map(AtomicU32::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Joins the sets of `a` and `b`, compressing both walked paths.
    ///
    /// Concurrent merges are only issued for disjoint pixel ranges, so the
    /// relaxed loads cannot observe a torn tree.
    #[inline]
    pub fn merge(&self, a: u32, b: u32) {
        let mut x = a as usize;
        let mut y = b as usize;
        let mut parent_x = self.parents[x].load(Ordering::Relaxed);
        let mut parent_y = self.parents[y].load(Ordering::Relaxed);
        while parent_x != parent_y {
            if parent_x > parent_y {
                if x as u32 == parent_x {
                    self.parents[x].store(parent_y, Ordering::Relaxed);
                    break;
                }
                let next = parent_x as usize;
                parent_x = self.parents[next].load(Ordering::Relaxed);
                self.parents[x].store(parent_y, Ordering::Relaxed);
                x = next;
            } else {
                if y as u32 == parent_y {
                    self.parents[y].store(parent_x, Ordering::Relaxed);
                    break;
                }
                let next = parent_y as usize;
                parent_y = self.parents[next].load(Ordering::Relaxed);
                self.parents[y].store(parent_x, Ordering::Relaxed);
                y = next;
            }
        }
    }

    /// Root of the set containing `i`.
    pub fn find(&self, i: u32) -> u32 {
        let mut node = i;
        loop {
            let parent = self.parents[node as usize].load(Ordering::Relaxed);
            if parent == node {
                return node;
            }
            node = parent;
        }
    }

    /// Flattens the forest into dense component ids ordered by root pixel,
    /// with per-component sizes and root indices.
    pub fn flatten(&self, pool: &rayon::ThreadPool, threads: usize) -> ComponentSet {
        let len = self.parents.len();
        let assignment: Vec<AtomicU32> = (0..len).map(|_| AtomicU32::new(u32::MAX)).collect();
        let ranges = split_length_to_ranges(len, threads);
        let root_counts: Vec<AtomicU32> = (0..threads).map(|_| AtomicU32::new(0)).collect();
        let root_lists: Vec<Mutex<Vec<u32>>> = (0..threads).map(|_| Mutex::new(Vec::new())).collect();
        let barrier = Barrier::new(threads);

        // number the roots: every worker counts the roots of its range, then
        // derives its own prefix offset instead of waiting on a single
        // counting section
        pool.scope(|s| {
            for (worker, range) in ranges.iter().cloned().enumerate() {
                let assignment = &assignment;
                let root_counts = &root_counts;
                let root_lists = &root_lists;
                let barrier = &barrier;
                s.spawn(move |_| {
                    let mut local_roots: Vec<u32> = Vec::new();
                    for i in range {
                        if self.parents[i].load(Ordering::Relaxed) == i as u32 {
                            local_roots.push(i as u32);
                        }
                    }
                    root_counts[worker].store(local_roots.len() as u32, Ordering::Relaxed);
                    barrier.wait();

                    let offset: u32 = root_counts[..worker]
                        .iter()
                        .map(|c| c.load(Ordering::Relaxed))
                        .sum();
                    for (rank, root) in local_roots.iter().enumerate() {
                        assignment[*root as usize].store(offset + rank as u32, Ordering::Relaxed);
                    }
                    *root_lists[worker].lock().unwrap() = local_roots;
                });
            }
        });

        let num_components: usize = root_counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed) as usize)
            .sum();
        let mut roots = Vec::with_capacity(num_components);
        for list in &root_lists {
            roots.extend_from_slice(&list.lock().unwrap());
        }
        let members: Vec<AtomicU32> = (0..num_components).map(|_| AtomicU32::new(0)).collect();

        pool.install(|| {
            ranges.into_par_iter().for_each(|range| {
                let mut local_members = vec![0u32; num_components];
                for i in range {
                    let parent = self.parents[i].load(Ordering::Relaxed) as usize;
                    let component = if parent == i {
                        assignment[i].load(Ordering::Relaxed)
                    } else {
                        // a parent across a range boundary may not be
                        // numbered yet; walk upward until a numbered node
                        let mut parent = parent;
                        let mut component = assignment[parent].load(Ordering::Relaxed);
                        while component == u32::MAX {
                            parent = self.parents[parent].load(Ordering::Relaxed) as usize;
                            component = assignment[parent].load(Ordering::Relaxed);
                        }
                        assignment[i].store(component, Ordering::Relaxed);
                        component
                    };
                    local_members[component as usize] += 1;
                }
                for (count, total) in local_members.iter().zip(&members) {
                    if *count > 0 {
                        total.fetch_add(*count, Ordering::Relaxed);
                    }
                }
            });
        });

        ComponentSet {
            assignment,
            members: members.into_iter().map(|m| m.into_inner()).collect(),
            roots,
        }
    }
}

/// Flattened component table: per-pixel component ids in scan order of the
/// component roots, plus per-component size and root pixel.
pub struct ComponentSet {
    pub assignment: Vec<AtomicU32>,
    pub members: Vec<u32>,
    pub roots: Vec<u32>,
}

impl ComponentSet {
    pub fn num_components(&self) -> usize {
        self.members.len()
    }
}

#[inline(always)]
fn offset_of<const N: usize>(idx: &[isize; N], strides: &[usize; N]) -> usize {
    let mut offset = 0;
    for a in 0..N {
        offset += idx[a] as usize * strides[a];
    }
    offset
}

/// Merges every pair of equal-label face neighbors under 2N-connectivity.
///
/// Slabs along the slowest axis are merged in parallel; the seam hyperplanes
/// between slabs are stitched sequentially afterwards.
pub fn build_disjoint_set<L: Label, const N: usize>(
    labels: &AtomicLabelBuffer<L>,
    size: &[usize; N],
    pool: &rayon::ThreadPool,
    threads: usize,
) -> DisjointSet {
    let num_pixels: usize = size.iter().product();
    debug_assert_eq!(num_pixels, labels.len());
    let set = DisjointSet::new(num_pixels as u32);
    let mut strides = [1usize; N];
    for a in 1..N {
        strides[a] = strides[a - 1] * size[a - 1];
    }
    let slabs = split_length_to_ranges(size[N - 1], threads);

    pool.install(|| {
        slabs.par_iter().for_each(|slab| {
            let mut region = Region::new([0isize; N], *size);
            region.index[N - 1] = slab.start as isize;
            region.size[N - 1] = slab.len();
            let row_len = region.size[0];
            for row in region.scanlines() {
                let row_offset = offset_of(&row, &strides);
                let mut previous = labels.load(row_offset);
                for j in 1..row_len {
                    let current = labels.load(row_offset + j);
                    if current == previous {
                        set.merge((row_offset + j - 1) as u32, (row_offset + j) as u32);
                    }
                    previous = current;
                }
                for a in 1..N {
                    let floor = if a == N - 1 { slab.start as isize } else { 0 };
                    if row[a] > floor {
                        let up = row_offset - strides[a];
                        for j in 0..row_len {
                            if labels.load(row_offset + j) == labels.load(up + j) {
                                set.merge((up + j) as u32, (row_offset + j) as u32);
                            }
                        }
                    }
                }
            }
        });
    });

    let plane = strides[N - 1];
    for slab in &slabs[1..] {
        let base = slab.start * plane;
        for offset in base..base + plane {
            if labels.load(offset) == labels.load(offset - plane) {
                set.merge((offset - plane) as u32, offset as u32);
            }
        }
    }
    set
}

fn predecessor_offset<const N: usize>(
    offset: usize,
    size: &[usize; N],
    strides: &[usize; N],
) -> usize {
    debug_assert!(offset > 0);
    for a in 0..N {
        if (offset / strides[a]) % size[a] > 0 {
            return offset - strides[a];
        }
    }
    unreachable!("offset zero has no predecessor")
}

/// Relabels the image so that spatially connected components carry the
/// labels.
///
/// Components of at least `min_size` pixels (capped at `max_new_labels`,
/// largest first) receive fresh labels dense in `[0, K)` and ordered by their
/// first pixel; smaller components are merged into a neighboring component.
/// Returns `K`.
///
/// With `sequential` set the whole pass runs on one thread. The parallel
/// variant splits the image into slabs and numbers components through
/// per-worker prefix offsets, which yields the same output for every thread
/// count.
pub fn enforce_connectivity<L: Label, const N: usize>(
    labels: &AtomicLabelBuffer<L>,
    size: &[usize; N],
    min_size: usize,
    max_new_labels: usize,
    sequential: bool,
) -> Result<usize> {
    let threads = if sequential {
        1
    } else {
        current_num_threads().min(size[N - 1]).max(1)
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .expect("worker pool construction failed");

    let set = build_disjoint_set(labels, size, &pool, threads);
    let components = set.flatten(&pool, threads);
    let num_components = components.num_components();
    debug_assert!(num_components > 0);

    let mut strides = [1usize; N];
    for a in 1..N {
        strides[a] = strides[a - 1] * size[a - 1];
    }

    // components large enough to keep a label of their own, capped at the
    // cluster count, largest first
    let mut large: Vec<u32> = (0..num_components as u32)
        .filter(|c| components.members[*c as usize] as usize >= min_size)
        .collect();
    if large.len() > max_new_labels {
        large.sort_by(|a, b| {
            components.members[*b as usize].cmp(&components.members[*a as usize])
        });
        large.truncate(max_new_labels);
        // component ids are in scan order already
        large.sort_unstable();
    }

    const UNRESOLVED: u32 = u32::MAX;
    let mut substitute = vec![UNRESOLVED; num_components];
    for (label, component) in large.iter().enumerate() {
        substitute[*component as usize] = label as u32;
    }
    let new_labels = if large.is_empty() {
        // nothing cleared the threshold; the component owning pixel 0
        // becomes the single absorbing label
        substitute[0] = 0;
        1
    } else {
        large.len()
    };

    // a small component takes the resolved label of the component preceding
    // its first pixel; ids are in scan order, so the predecessor has been
    // visited already except for chains anchored at pixel 0
    for component in 0..num_components {
        if substitute[component] != UNRESOLVED {
            continue;
        }
        let root = components.roots[component] as usize;
        if root == 0 {
            continue;
        }
        let neighbor = predecessor_offset(root, size, &strides);
        let neighbor_component = components.assignment[neighbor].load(Ordering::Relaxed) as usize;
        let adopted = substitute[neighbor_component];
        if adopted != UNRESOLVED {
            substitute[component] = adopted;
        }
    }

    // fallback sweep for components whose predecessor chain was not yet
    // resolved: adopt across any face of any member pixel until nothing is
    // left; a stalled sweep means the adjacency walk is broken
    loop {
        if substitute.iter().all(|s| *s != UNRESOLVED) {
            break;
        }
        let mut progress = false;
        for offset in 0..labels.len() {
            let component = components.assignment[offset].load(Ordering::Relaxed) as usize;
            if substitute[component] != UNRESOLVED {
                continue;
            }
            let mut adopted = UNRESOLVED;
            for a in 0..N {
                let coordinate = (offset / strides[a]) % size[a];
                if coordinate > 0 {
                    let c =
                        components.assignment[offset - strides[a]].load(Ordering::Relaxed) as usize;
                    if substitute[c] != UNRESOLVED {
                        adopted = substitute[c];
                        break;
                    }
                }
                if coordinate + 1 < size[a] {
                    let c =
                        components.assignment[offset + strides[a]].load(Ordering::Relaxed) as usize;
                    if substitute[c] != UNRESOLVED {
                        adopted = substitute[c];
                        break;
                    }
                }
            }
            if adopted != UNRESOLVED {
                substitute[component] = adopted;
                progress = true;
            }
        }
        if !progress {
            return Err(SlicError::ConnectivityInvariant);
        }
    }

    pool.install(|| {
        split_length_to_ranges(labels.len(), threads)
            .into_par_iter()
            .for_each(|range| {
                for offset in range {
                    let component =
                        components.assignment[offset].load(Ordering::Relaxed) as usize;
                    labels.store(offset, L::from_usize(substitute[component] as usize));
                }
            });
    });

    debug!(
        components = num_components,
        labels = new_labels,
        "connectivity relabeling done"
    );
    Ok(new_labels)
}
