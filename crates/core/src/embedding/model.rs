//! Bi-encoder wrapper: `encode(texts) -> matrix`, normalized so cosine similarity reduces
//! to a dot product (spec.md §4.3).

use crate::error::{Result, TemoaError};

#[cfg(feature = "semantic")]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Thin, thread-safe wrapper around a loaded bi-encoder. The model, its name, and its
/// output dimensionality are fixed at construction and never reloaded — callers that want
/// a different model construct a new `BiEncoder`.
pub struct BiEncoder {
    name: String,
    dimension: usize,
    #[cfg(feature = "semantic")]
    inner: TextEmbedding,
}

impl BiEncoder {
    /// Load a named bi-encoder once. Initialization failures surface as `TemoaError::Model`
    /// per spec.md §4.3's "initialization failures raise a dedicated error kind."
    #[cfg(feature = "semantic")]
    pub fn load(model_name: &str) -> Result<Self> {
        let model = resolve_model(model_name)?;
        let inner = TextEmbedding::try_new(InitOptions::new(model).with_show_download_progress(false))
            .map_err(|e| TemoaError::model(format!("failed to load bi-encoder '{model_name}': {e}")))?;
        let dimension = probe_dimension(&inner)?;
        Ok(Self { name: model_name.to_string(), dimension, inner })
    }

    #[cfg(not(feature = "semantic"))]
    pub fn load(model_name: &str) -> Result<Self> {
        Err(TemoaError::model(format!(
            "'{model_name}' requested but this build was compiled without the 'semantic' feature"
        )))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Batched encode; returns one L2-normalized vector per input text, in input order.
    #[cfg(feature = "semantic")]
    pub fn encode(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let embeddings = self
            .inner
            .embed(texts.to_vec(), Some(batch_size))
            .map_err(|e| TemoaError::model(format!("embedding failed: {e}")))?;
        Ok(embeddings.into_iter().map(normalize).collect())
    }

    #[cfg(not(feature = "semantic"))]
    pub fn encode(&self, _texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
        Err(TemoaError::model("semantic feature disabled"))
    }

    /// Dot product of a single (already-normalized) query vector against every row of a
    /// flat row-major matrix — cosine similarity, since both sides are unit vectors.
    pub fn similarity(&self, query_vec: &[f32], matrix: &[f32], dim: usize) -> Vec<f32> {
        debug_assert_eq!(query_vec.len(), dim);
        matrix
            .chunks_exact(dim)
            .map(|row| row.iter().zip(query_vec).map(|(a, b)| a * b).sum())
            .collect()
    }
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

#[cfg(feature = "semantic")]
fn probe_dimension(model: &TextEmbedding) -> Result<usize> {
    let probe = model
        .embed(vec!["dimension probe".to_string()], Some(1))
        .map_err(|e| TemoaError::model(format!("failed to probe embedding dimension: {e}")))?;
    probe
        .first()
        .map(|v| v.len())
        .ok_or_else(|| TemoaError::model("embedding probe returned no vectors"))
}

#[cfg(feature = "semantic")]
fn resolve_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        other => Err(TemoaError::model(format!("unknown bi-encoder model '{other}'"))),
    }
}
