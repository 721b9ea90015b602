//! Cross-encoder wrapper: `score(query, passages) -> scores` (spec.md §4.3), used by
//! Stage 5 to rerank a small candidate list (~100 items). Scores are unbounded; higher is
//! better.

use crate::error::{Result, TemoaError};

#[cfg(feature = "semantic")]
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

pub struct CrossEncoder {
    name: String,
    #[cfg(feature = "semantic")]
    inner: TextRerank,
}

impl CrossEncoder {
    #[cfg(feature = "semantic")]
    pub fn load(model_name: &str) -> Result<Self> {
        let model = resolve_model(model_name)?;
        let inner = TextRerank::try_new(RerankInitOptions::new(model).with_show_download_progress(false))
            .map_err(|e| TemoaError::model(format!("failed to load cross-encoder '{model_name}': {e}")))?;
        Ok(Self { name: model_name.to_string(), inner })
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

    /// Score each passage against `query`, returning scores in the same order as
    /// `passages` (not the reranked order fastembed itself returns).
    #[cfg(feature = "semantic")]
    pub fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let results = self
            .inner
            .rerank(query, passages.to_vec(), false, None)
            .map_err(|e| TemoaError::model(format!("reranking failed: {e}")))?;

        let mut scores = vec![0.0f32; passages.len()];
        for r in results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.score;
            }
        }
        Ok(scores)
    }

    #[cfg(not(feature = "semantic"))]
    pub fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
        Err(TemoaError::model("semantic feature disabled"))
    }
}

#[cfg(feature = "semantic")]
fn resolve_model(name: &str) -> Result<RerankerModel> {
    match name {
        "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        other => Err(TemoaError::model(format!("unknown cross-encoder model '{other}'"))),
    }
}
