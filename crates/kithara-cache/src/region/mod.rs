#![forbid(unsafe_code)]

//! Cached-region tracking for chunked media.

mod chunk_index;
mod tracker;

pub use chunk_index::{Chunk, ChunkIndex};
pub use tracker::{CachedRegionTracker, RegionEnd};
