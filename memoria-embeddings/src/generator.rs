//! Lazy-loaded sentence-embedding model.
//!
//! `embed` consults the cache first, then falls through to ONNX inference
//! on miss. Model load is collapsed across concurrent first callers with
//! `std::sync::OnceLock`, the systems-language analogue of a promise that
//! every waiter can share without re-running the work. Tokenization uses
//! the `tokenizers` crate against a `tokenizer.json` that must sit next to
//! the ONNX model file (the standard HuggingFace export layout), so the
//! token ids handed to the model match its actual vocabulary.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use memoria_core::config::EmbedderConfig;
use memoria_core::embedding_error::EmbeddingError;
use memoria_core::error::Result;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, instrument};

use crate::cache::{CacheStats, EmbeddingCache};

const MAX_TOKENS: usize = 512;
const MAX_CHARS: usize = MAX_TOKENS * 4;
const DEFAULT_BATCH_CHUNK: usize = 10;

/// Running counters surfaced by `EmbeddingGenerator::stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratorStats {
    pub total_embeddings: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub total_latency: Duration,
    pub model_load_duration: Option<Duration>,
}

impl GeneratorStats {
    pub fn average_latency(&self) -> Duration {
        if self.total_embeddings == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.total_embeddings as u32
        }
    }
}

struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    load_duration: Duration,
}

/// Wraps a sentence-encoder model behind a cache and a lazy, once-only load.
pub struct EmbeddingGenerator {
    config: EmbedderConfig,
    dimension: usize,
    model_path: PathBuf,
    model: OnceLock<std::result::Result<LoadedModel, String>>,
    cache: Mutex<EmbeddingCache>,
    stats: Mutex<GeneratorStats>,
}

impl EmbeddingGenerator {
    pub fn new(config: EmbedderConfig, dimension: usize, model_path: impl Into<PathBuf>) -> Self {
        let cache = EmbeddingCache::new(config.cache_size, Duration::from_secs(config.cache_ttl_secs));
        Self {
            config,
            dimension,
            model_path: model_path.into(),
            model: OnceLock::new(),
            cache: Mutex::new(cache),
            stats: Mutex::new(GeneratorStats::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Produces an L2-normalized embedding of length `dimension`.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let normalized = Self::truncate(text.trim());
        if normalized.is_empty() {
            return Err(EmbeddingError::EmptyInput.into());
        }

        let key = *blake3::hash(normalized.as_bytes()).as_bytes();
        if let Some(hit) = self.cache.lock().unwrap().get(&key) {
            let mut stats = self.stats.lock().unwrap();
            stats.cache_hits += 1;
            return Ok(hit);
        }

        let start = Instant::now();
        let result = self.infer(normalized);
        let elapsed = start.elapsed();

        let mut stats = self.stats.lock().unwrap();
        stats.cache_misses += 1;
        stats.total_latency += elapsed;
        match &result {
            Ok(v) => {
                stats.total_embeddings += 1;
                drop(stats);
                self.cache.lock().unwrap().set(key, v.clone());
            }
            Err(_) => stats.errors += 1,
        }
        result
    }

    /// Embeds in input order, capping in-flight work to a bounded chunk size.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(DEFAULT_BATCH_CHUNK.max(1)) {
            for text in chunk {
                out.push(self.embed(text)?);
            }
        }
        Ok(out)
    }

    pub fn stats(&self) -> GeneratorStats {
        *self.stats.lock().unwrap()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().unwrap().stats()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    pub fn prune_cache(&self) -> usize {
        self.cache.lock().unwrap().prune()
    }

    /// Forces the lazy model load to happen now rather than on first
    /// `embed` call. Safe to call from multiple threads: `OnceLock`
    /// collapses concurrent callers onto one load.
    pub fn preload(&self) -> Result<()> {
        self.infer("memoria model preload warmup").map(|_| ())
    }

    fn infer(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.get_or_init(|| {
            let start = Instant::now();
            match Self::load_session(&self.model_path, self.config.verbose) {
                Ok(session) => match Self::load_tokenizer(&self.model_path) {
                    Ok(tokenizer) => Ok(LoadedModel {
                        session: Mutex::new(session),
                        tokenizer,
                        load_duration: start.elapsed(),
                    }),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        });

        let model = match model {
            Ok(m) => m,
            Err(reason) => {
                return Err(EmbeddingError::ModelLoadFailed {
                    path: self.model_path.display().to_string(),
                    reason: reason.clone(),
                }
                .into())
            }
        };

        {
            let mut stats = self.stats.lock().unwrap();
            if stats.model_load_duration.is_none() {
                stats.model_load_duration = Some(model.load_duration);
            }
        }

        let encoding = model.tokenizer.encode(text, true).map_err(|e| EmbeddingError::InferenceFailed {
            reason: format!("tokenization error: {e}"),
        })?;
        let seq_len = encoding.get_ids().len();
        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();

        let ids_tensor = Tensor::from_array((vec![1i64, seq_len as i64], input_ids)).map_err(|e| {
            EmbeddingError::InferenceFailed {
                reason: format!("tensor creation error: {e}"),
            }
        })?;
        let mask_tensor =
            Tensor::from_array((vec![1i64, seq_len as i64], attention_mask)).map_err(|e| {
                EmbeddingError::InferenceFailed {
                    reason: format!("tensor creation error: {e}"),
                }
            })?;

        let mut session = model.session.lock().map_err(|_| EmbeddingError::InferenceFailed {
            reason: "model session lock poisoned".to_string(),
        })?;

        let outputs = session
            .run(ort::inputs![ids_tensor, mask_tensor])
            .map_err(|e| EmbeddingError::InferenceFailed {
                reason: e.to_string(),
            })?;

        let (_name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| EmbeddingError::InferenceFailed {
                reason: "no output tensor".to_string(),
            })?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::InferenceFailed {
                reason: format!("tensor extraction failed: {e}"),
            })?;

        let pooled = if shape.len() == 3 {
            let seq = shape[1] as usize;
            let dims = shape[2] as usize;
            let mut pooled = vec![0.0f32; dims];
            let mut mask_sum = 0.0f32;
            for s in 0..seq {
                let weight = attention_mask.get(s).copied().unwrap_or(1) as f32;
                mask_sum += weight;
                for d in 0..dims {
                    pooled[d] += data[s * dims + d] * weight;
                }
            }
            for v in &mut pooled {
                *v /= mask_sum.max(1.0);
            }
            pooled
        } else if shape.len() == 2 {
            let dims = shape[1] as usize;
            data[..dims].to_vec()
        } else {
            return Err(EmbeddingError::InferenceFailed {
                reason: format!("unexpected output shape: {shape:?}"),
            }
            .into());
        };

        let mut vector = Self::renormalize(pooled);
        vector.resize(self.dimension, 0.0);
        Ok(vector)
    }

    fn load_session(path: &Path, verbose: bool) -> std::result::Result<Session, String> {
        if !path.exists() {
            return Err("model file not found".to_string());
        }
        if verbose {
            debug!(path = %path.display(), "loading embedding model");
        }
        Session::builder()
            .map_err(|e| e.to_string())?
            .with_intra_threads(2)
            .map_err(|e| e.to_string())?
            .commit_from_file(path)
            .map_err(|e| e.to_string())
    }

    /// Loads the tokenizer file that ships alongside the ONNX model, e.g.
    /// `model.onnx` pairs with a sibling `tokenizer.json` (the standard
    /// HuggingFace export layout).
    fn load_tokenizer(model_path: &Path) -> std::result::Result<Tokenizer, String> {
        let path = Self::tokenizer_path(model_path);
        if !path.exists() {
            return Err(format!("tokenizer file not found: {}", path.display()));
        }
        Tokenizer::from_file(&path).map_err(|e| e.to_string())
    }

    fn tokenizer_path(model_path: &Path) -> PathBuf {
        model_path.with_file_name("tokenizer.json")
    }

    /// Truncates at the last whitespace boundary within the final 20% of
    /// the window if one exists, else hard-truncates at `MAX_CHARS`.
    fn truncate(text: &str) -> &str {
        if text.chars().count() <= MAX_CHARS {
            return text;
        }
        let byte_end = text
            .char_indices()
            .nth(MAX_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let window = &text[..byte_end];
        let search_from = byte_end.saturating_sub(byte_end / 5);
        match window[search_from..].rfind(char::is_whitespace) {
            Some(rel) => &window[..search_from + rel],
            None => window,
        }
    }

    fn renormalize(mut v: Vec<f32>) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Little-endian IEEE-754 single-precision byte encoding, for storing a
/// vector as an opaque BLOB.
pub fn to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Inverse of `to_bytes`. Returns `None` if `bytes.len()` is not a multiple
/// of 4.
pub fn from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_roundtrip() {
        let v = vec![0.5_f32, -1.25, 3.0, 0.0];
        let bytes = to_bytes(&v);
        assert_eq!(bytes.len(), 16);
        assert_eq!(from_bytes(&bytes), Some(v));
    }

    #[test]
    fn from_bytes_rejects_misaligned_length() {
        assert_eq!(from_bytes(&[0, 1, 2]), None);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn renormalize_produces_unit_norm() {
        let v = EmbeddingGenerator::renormalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn truncate_short_text_is_unchanged() {
        assert_eq!(EmbeddingGenerator::truncate("hello world"), "hello world");
    }

    #[test]
    fn truncate_long_text_breaks_on_whitespace() {
        let long = "word ".repeat(1000);
        let truncated = EmbeddingGenerator::truncate(&long);
        assert!(truncated.len() <= long.len());
        assert!(!truncated.ends_with("wor"));
    }

    #[test]
    fn average_latency_is_zero_with_no_samples() {
        assert_eq!(GeneratorStats::default().average_latency(), Duration::ZERO);
    }

    #[test]
    fn tokenizer_path_is_a_sibling_of_the_model_file() {
        let path = EmbeddingGenerator::tokenizer_path(Path::new("/models/minilm/model.onnx"));
        assert_eq!(path, Path::new("/models/minilm/tokenizer.json"));
    }
}
