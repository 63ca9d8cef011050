use kbase_core::chunker::ChunkingConfig;
use kbase_core::corpus::SourceDocument;

/// blake3 digest of everything that determines a snapshot's content: document
/// names and bodies, chunking bounds and the embedding model.
///
/// Two corpora with the same fingerprint chunk and embed identically, so a
/// persisted snapshot carrying it can be reused instead of rebuilt.
pub fn corpus_fingerprint(documents: &[SourceDocument], chunking: &ChunkingConfig, embedder_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(embedder_id.as_bytes());
    hasher.update(&[0]);
    for n in [chunking.max_chars, chunking.min_chars, chunking.overlap_chars] {
        hasher.update(&(n as u64).to_le_bytes());
    }
    for doc in documents {
        hasher.update(&(doc.name.len() as u64).to_le_bytes());
        hasher.update(doc.name.as_bytes());
        hasher.update(&(doc.content.len() as u64).to_le_bytes());
        hasher.update(doc.content.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
