//! Hybrid retrieval over ingested chunks.
//!
//! Two candidate lists are produced per query — a semantic list ranked by
//! cosine similarity over stored embeddings, and a lexical list ranked by
//! full-text relevance — then fused with reciprocal rank fusion. Ranking is
//! deterministic: every ordering breaks ties on ascending chunk id.

use std::collections::HashMap;

use tracing::debug;

use docforge_ai::EmbeddingClient;
use docforge_shared::{AssetRole, Result, RetrievalCandidate};
use docforge_storage::Storage;

/// RRF dampening constant. Rank 1 in a single list scores 1/61.
pub const RRF_K: u32 = 60;

/// Optional narrowing of the candidate pool.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilters {
    pub role: Option<AssetRole>,
    pub asset_ids: Option<Vec<String>>,
}

/// Per-query knobs; defaults match the pipeline's standard depths.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Depth of the semantic candidate list.
    pub top_k_vector: usize,
    /// Depth of the lexical candidate list.
    pub top_k_lexical: usize,
    /// Size of the fused result.
    pub top_n: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k_vector: 20,
            top_k_lexical: 20,
            top_n: 10,
        }
    }
}

/// Cosine similarity between two vectors. Zero-magnitude or mismatched
/// vectors score 0.0 rather than erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Fuse ranked id lists with reciprocal rank fusion.
///
/// Each id scores `sum(1 / (k + rank))` over the lists that contain it,
/// with 1-based ranks. The result is ordered by descending score, ties
/// broken by ascending id.
pub fn rrf_merge(lists: &[Vec<String>], k: u32) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for list in lists {
        for (index, id) in list.iter().enumerate() {
            let rank = index as u32 + 1;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / f64::from(k + rank);
        }
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// Rank embedded chunks against a query vector, best first, ties broken by
/// ascending chunk id. Input pairs must already be sorted by chunk id.
fn rank_by_similarity(
    pool: &[(RetrievalCandidate, Vec<f32>)],
    query: &[f32],
    top_k: usize,
) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = pool
        .iter()
        .map(|(candidate, vector)| (cosine_similarity(query, vector), candidate.chunk_id.as_str()))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored
        .into_iter()
        .take(top_k)
        .map(|(_, id)| id.to_string())
        .collect()
}

/// Run a hybrid query over a document set and return the fused top results.
///
/// A blank query yields an empty result. An embedding failure propagates;
/// an empty semantic pool (nothing embedded yet) silently degrades to
/// lexical-only ranking.
pub async fn retrieve_context(
    storage: &Storage,
    embedder: &dyn EmbeddingClient,
    embed_model: &str,
    set_id: &str,
    query: &str,
    filters: &RetrievalFilters,
    options: &RetrievalOptions,
) -> Result<Vec<RetrievalCandidate>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(vec![]);
    }

    let asset_ids = filters.asset_ids.as_deref();
    let pool = storage
        .embedded_chunks(set_id, filters.role, asset_ids)
        .await?;

    let vector_list = if pool.is_empty() {
        vec![]
    } else {
        let (vectors, _model) = embedder.embed(&[query.to_string()], embed_model).await?;
        let query_vector = vectors.into_iter().next().unwrap_or_default();
        rank_by_similarity(&pool, &query_vector, options.top_k_vector)
    };

    let lexical = storage
        .search_chunks(
            set_id,
            query,
            filters.role,
            asset_ids,
            options.top_k_lexical as u32,
        )
        .await?;
    let lexical_list: Vec<String> = lexical.iter().map(|c| c.chunk_id.clone()).collect();

    debug!(
        semantic = vector_list.len(),
        lexical = lexical_list.len(),
        "fusing candidate lists"
    );

    let fused = rrf_merge(&[vector_list, lexical_list], RRF_K);

    // Candidates may come from either list; index both for hydration.
    let mut by_id: HashMap<&str, &RetrievalCandidate> = HashMap::new();
    for (candidate, _) in &pool {
        by_id.insert(candidate.chunk_id.as_str(), candidate);
    }
    for candidate in &lexical {
        by_id.insert(candidate.chunk_id.as_str(), candidate);
    }

    Ok(fused
        .into_iter()
        .take(options.top_n)
        .filter_map(|(id, _)| by_id.get(id.as_str()).map(|c| (*c).clone()))
        .collect())
}
