//! Embedding Model Wrapper (spec.md §4.3): a bi-encoder for batched document/query
//! embedding and a cross-encoder for pairwise reranking. Both wrap `fastembed`, loaded
//! once per process and never substituted silently on a per-call failure.

pub mod model;
pub mod reranker;

pub use model::BiEncoder;
pub use reranker::CrossEncoder;
