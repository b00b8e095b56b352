//! Embedding cache and lazy-loaded sentence-embedding generator.
//!
//! ```text
//! EmbeddingGenerator::embed(text)
//!     -> EmbeddingCache (blake3(text) keyed, LRU+TTL)
//!         hit  -> clone and return
//!         miss -> ONNX inference -> normalize -> cache.set -> return
//! ```

pub mod cache;
pub mod generator;

pub use cache::{CacheStats, EmbeddingCache};
pub use generator::{cosine_similarity, euclidean_distance, from_bytes, to_bytes, EmbeddingGenerator, GeneratorStats};
