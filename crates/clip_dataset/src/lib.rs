//! Paired RGB/optical-flow clip loading and Burn-compatible batching.
//!
//! This crate provides:
//! - Split manifests mapping clip directories to action classes
//! - Decoding of one RGB frame plus stacked flow frames per clip
//! - A shuffled batch loader that decodes on a worker pool and prefetches into a bounded queue

pub mod batch;
pub mod clip;
pub mod manifest;
pub mod types;

pub use batch::{ClipBatch, ClipBatchIter, ClipLoader, LoaderConfig};
pub use clip::{ClipConfig, VideoClipDataset};
pub use manifest::{manifest_path, parse_manifest, read_split_manifest};
pub use types::*;
