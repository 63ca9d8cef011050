use std::collections::HashMap;

use kbase_core::config::RetrievalSettings;
use kbase_core::error::Result;
use kbase_core::types::RetrievedPassage;
use kbase_vector::IndexSnapshot;

/// Relevance policy applied on top of raw nearest-neighbour hits.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPolicy {
    pub max_relevant_chunks: usize,
    pub similarity_threshold: f32,
    pub max_chunks_per_source: Option<usize>,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self::from(&RetrievalSettings::default())
    }
}

impl From<&RetrievalSettings> for RetrievalPolicy {
    fn from(s: &RetrievalSettings) -> Self {
        Self {
            max_relevant_chunks: s.max_relevant_chunks,
            similarity_threshold: s.similarity_threshold,
            max_chunks_per_source: s.max_chunks_per_source,
        }
    }
}

/// Result of retrieval. An empty result is a state of its own, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Passages(Vec<RetrievedPassage>),
    NoRelevantContext,
}

impl Retrieval {
    pub fn passages(&self) -> &[RetrievedPassage] {
        match self {
            Retrieval::Passages(p) => p,
            Retrieval::NoRelevantContext => &[],
        }
    }

    pub fn has_context(&self) -> bool {
        matches!(self, Retrieval::Passages(_))
    }

    /// Source documents in first-seen (best score first) order, without duplicates.
    pub fn sources(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in self.passages() {
            if !out.iter().any(|s| s == p.source_document()) {
                out.push(p.source_document().to_string());
            }
        }
        out
    }
}

pub struct Retriever {
    policy: RetrievalPolicy,
}

impl Retriever {
    pub fn new(policy: RetrievalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetrievalPolicy {
        &self.policy
    }

    pub fn retrieve(&self, snapshot: &IndexSnapshot, query: &[f32]) -> Result<Retrieval> {
        // With a per-source limit, candidates dropped for diversity must be backfilled
        // from further down the ranking, so the whole snapshot is ranked.
        let k = match self.policy.max_chunks_per_source {
            Some(_) => snapshot.chunk_count(),
            None => self.policy.max_relevant_chunks,
        };
        let hits = snapshot.search(query, k)?;
        Ok(self.apply(hits))
    }

    /// Threshold, per-source limit and cap over score-sorted candidates.
    pub fn apply(&self, candidates: Vec<RetrievedPassage>) -> Retrieval {
        let mut per_source: HashMap<String, usize> = HashMap::new();
        let mut kept = Vec::with_capacity(self.policy.max_relevant_chunks);
        for p in candidates {
            if kept.len() >= self.policy.max_relevant_chunks {
                break;
            }
            if !(p.score >= self.policy.similarity_threshold) {
                continue;
            }
            if let Some(limit) = self.policy.max_chunks_per_source {
                let seen = per_source.entry(p.source_document().to_string()).or_insert(0);
                if *seen >= limit {
                    continue;
                }
                *seen += 1;
            }
            kept.push(p);
        }
        if kept.is_empty() {
            Retrieval::NoRelevantContext
        } else {
            Retrieval::Passages(kept)
        }
    }
}
