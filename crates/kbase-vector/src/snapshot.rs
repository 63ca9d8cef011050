use chrono::{DateTime, Utc};

use kbase_core::error::{Error, Result};
use kbase_core::types::{EmbeddedChunk, RetrievedPassage};

pub type GenerationId = u64;

/// Identity of one index generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub generation: GenerationId,
    pub embedder_id: String,
    pub corpus_fingerprint: String,
    pub built_at: DateTime<Utc>,
}

/// One immutable, fully built generation of the searchable index.
///
/// Holds every embedded chunk and answers exact (brute-force) cosine
/// nearest-neighbour queries. Never mutated after `build`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    meta: SnapshotMeta,
    dim: usize,
    entries: Vec<EmbeddedChunk>,
    norms: Vec<f32>,
}

impl IndexSnapshot {
    /// Build a snapshot from scratch. All vectors must share one non-zero dimension
    /// and contain only finite values.
    pub fn build(meta: SnapshotMeta, entries: Vec<EmbeddedChunk>) -> Result<Self> {
        let dim = entries.first().map_or(0, |e| e.vector.len());
        for e in &entries {
            if e.vector.len() != dim || dim == 0 {
                return Err(Error::Index(format!(
                    "chunk {} has dimension {}, expected {}",
                    e.chunk.id,
                    e.vector.len(),
                    dim
                )));
            }
            if e.vector.iter().any(|x| !x.is_finite()) {
                return Err(Error::Index(format!("chunk {} has a non-finite vector component", e.chunk.id)));
            }
        }
        let norms = entries.iter().map(|e| l2_norm(&e.vector)).collect();
        Ok(Self { meta, dim, entries, norms })
    }

    pub fn empty(meta: SnapshotMeta) -> Self {
        Self { meta, dim: 0, entries: Vec::new(), norms: Vec::new() }
    }

    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    pub fn generation(&self) -> GenerationId {
        self.meta.generation
    }

    /// Vector dimension; 0 for an empty snapshot.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EmbeddedChunk] {
        &self.entries
    }

    /// Top-`k` chunks by cosine similarity, score descending.
    ///
    /// Ties go to the lower chunk ordinal, then to the earlier entry. An empty
    /// snapshot or `k == 0` yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedPassage>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(Error::Index(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dim
            )));
        }
        let q_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (e, &norm))| (i, cosine(query, q_norm, &e.vector, norm)))
            .collect();
        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.total_cmp(sa)
                .then_with(|| self.entries[*ia].chunk.ordinal.cmp(&self.entries[*ib].chunk.ordinal))
                .then_with(|| ia.cmp(ib))
        });
        scored.truncate(k.min(self.entries.len()));
        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievedPassage { chunk: self.entries[i].chunk.clone(), score })
            .collect())
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(q: &[f32], q_norm: f32, v: &[f32], v_norm: f32) -> f32 {
    if q_norm == 0.0 || v_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = q.iter().zip(v).map(|(a, b)| a * b).sum();
    let score = dot / (q_norm * v_norm);
    if score.is_finite() { score.clamp(-1.0, 1.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbase_core::types::Chunk;

    fn meta() -> SnapshotMeta {
        SnapshotMeta { generation: 1, embedder_id: "test".into(), corpus_fingerprint: "fp".into(), built_at: Utc::now() }
    }

    fn entry(source: &str, ordinal: usize, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                id: Chunk::make_id(source, ordinal),
                source_document: source.into(),
                section: "S".into(),
                text: format!("{source} {ordinal}"),
                ordinal,
            },
            vector,
        }
    }

    #[test]
    fn search_orders_by_score() {
        let snap = IndexSnapshot::build(
            meta(),
            vec![entry("a.md", 0, vec![0.0, 1.0]), entry("b.md", 0, vec![1.0, 0.0]), entry("c.md", 0, vec![1.0, 1.0])],
        )
        .unwrap();
        let hits = snap.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["b.md#0", "c.md#0", "a.md#0"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn ties_prefer_lower_ordinal() {
        let snap = IndexSnapshot::build(
            meta(),
            vec![entry("a.md", 3, vec![1.0, 0.0]), entry("b.md", 1, vec![2.0, 0.0]), entry("c.md", 1, vec![1.0, 0.0])],
        )
        .unwrap();
        let hits = snap.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["b.md#1", "c.md#1", "a.md#3"]);
    }

    #[test]
    fn k_is_bounded_by_corpus_size() {
        let snap = IndexSnapshot::build(meta(), vec![entry("a.md", 0, vec![1.0])]).unwrap();
        assert_eq!(snap.search(&[1.0], 10).unwrap().len(), 1);
        assert!(snap.search(&[1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn empty_snapshot_never_errors() {
        let snap = IndexSnapshot::empty(meta());
        assert!(snap.search(&[0.3, 0.4, 0.5], 5).unwrap().is_empty());
        assert_eq!(snap.dim(), 0);
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let err = IndexSnapshot::build(meta(), vec![entry("a.md", 0, vec![1.0, 0.0]), entry("b.md", 0, vec![1.0])]);
        assert!(matches!(err, Err(Error::Index(_))));
    }

    #[test]
    fn query_dimension_must_match() {
        let snap = IndexSnapshot::build(meta(), vec![entry("a.md", 0, vec![1.0, 0.0])]).unwrap();
        assert!(snap.search(&[1.0], 1).is_err());
    }

    #[test]
    fn zero_vectors_score_zero() {
        let snap = IndexSnapshot::build(meta(), vec![entry("a.md", 0, vec![0.0, 0.0])]).unwrap();
        assert_eq!(snap.search(&[1.0, 0.0], 1).unwrap()[0].score, 0.0);
    }
}
