//! n-dimensional SLIC superpixel segmentation.
//!
//! This crate clusters an N-dimensional, multi-component image in the joint
//! space of pixel values and physical coordinates (Simple Linear Iterative
//! Clustering) and produces a label image. Images carry per-axis origin and
//! spacing, so anisotropic data such as medical volumes cluster into
//! physically, not index-wise, regular supervoxels.
//!
//! The iteration loop runs on a dedicated worker pool synchronized by a
//! barrier: per-tile assignment and accumulation in parallel, a
//! single-worker reduction in between. An optional post-pass enforces label
//! connectivity by merging spatially disconnected fragments into their
//! neighbors.
//!
//! ```rust
//! use ndslic::arrays::VectorImage;
//! use ndslic::common::SlicConfig;
//! use ndslic::slic::Slic;
//!
//! let image = VectorImage::<2>::new(&vec![0.5f32; 64 * 64], [64, 64], 1);
//! let mut config = SlicConfig::with_uniform_grid(16);
//! config.max_iterations = 5;
//! let engine = Slic::<u32, 2>::new(config);
//! let labels = engine.segment(&image).expect("segmentation failed");
//! assert_eq!(labels.data.len(), 64 * 64);
//! assert!(labels.data.iter().all(|l| *l < 16));
//! ```
//!
//! For a fixed thread count the output is deterministic, including the
//! multi-threaded connectivity variant: components are numbered through
//! per-worker prefix offsets rather than a free-running counter. Runs can be
//! cancelled between iterations through an abort flag and report per-iteration
//! progress through a callback; see [`slic::Slic`].

pub mod arrays;
pub mod assign;
pub mod atomic_arrays;
pub mod cluster;
pub mod common;
pub mod connectivity;
pub mod slic;
