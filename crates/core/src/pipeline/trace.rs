//! Pipeline Tracer (spec.md §4.10): captures stage-boundary snapshots when a caller asks
//! for `trace=true`. Disabled tracing costs nothing beyond the `Option` check at each
//! stage boundary.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::types::SearchResult;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResultPreview {
    pub relative_path: String,
    pub similarity_score: Option<f32>,
    pub bm25_score: Option<f64>,
    pub rrf_score: Option<f64>,
    pub cross_encoder_score: Option<f32>,
    pub time_boost_factor: Option<f64>,
    pub final_score: f64,
    pub tag_boosted: bool,
}

impl From<&SearchResult> for ResultPreview {
    fn from(r: &SearchResult) -> Self {
        Self {
            relative_path: r.relative_path.clone(),
            similarity_score: r.similarity_score,
            bm25_score: r.bm25_score,
            rrf_score: r.rrf_score,
            cross_encoder_score: r.cross_encoder_score,
            time_boost_factor: r.time_boost_factor,
            final_score: r.final_score,
            tag_boosted: r.tag_boosted,
        }
    }
}

const PREVIEW_LIMIT: usize = 20;

#[derive(Debug, Clone, serde::Serialize)]
pub struct StageTrace {
    pub stage_number: u8,
    pub name: String,
    pub input_count: usize,
    pub output_count: usize,
    pub duration_ms: u64,
    pub preview: Vec<ResultPreview>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineTrace {
    pub stages: Vec<StageTrace>,
}

/// Accumulates [`StageTrace`] entries as the pipeline runs. A disabled tracer is simply
/// never constructed — callers check `Option<Tracer>`, not a boolean flag on a live one.
pub struct Tracer {
    trace: PipelineTrace,
}

impl Tracer {
    pub fn new() -> Self {
        Self { trace: PipelineTrace::default() }
    }

    /// Time and record one stage boundary. `metadata` carries stage-specific notes
    /// (expansion terms, fusion parameters, filter-removal reasons, rank deltas).
    pub fn record(
        &mut self,
        stage_number: u8,
        name: &str,
        input_count: usize,
        output: &[SearchResult],
        started_at: Instant,
        metadata: BTreeMap<String, String>,
    ) {
        self.trace.stages.push(StageTrace {
            stage_number,
            name: name.to_string(),
            input_count,
            output_count: output.len(),
            duration_ms: started_at.elapsed().as_millis() as u64,
            preview: output.iter().take(PREVIEW_LIMIT).map(ResultPreview::from).collect(),
            metadata,
        });
    }

    pub fn finish(self) -> PipelineTrace {
        self.trace
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}
