pub mod chunk_cache;

pub use chunk_cache::{ChunkCache, PinnedChunk};

#[cfg(test)]
mod chunk_cache_test;
