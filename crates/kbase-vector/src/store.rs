//! Snapshot persistence.
//!
//! A snapshot is written as one JSON document. Vector components are stored as
//! their IEEE-754 bit patterns so that a reload is bit-identical and answers
//! `search` exactly as the snapshot that was saved. Writes go to a temp file in
//! the target directory and are renamed into place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use kbase_core::error::{Error, Result};
use kbase_core::types::{Chunk, EmbeddedChunk};

use crate::snapshot::{GenerationId, IndexSnapshot, SnapshotMeta};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
    format_version: u32,
    generation: GenerationId,
    embedder_id: String,
    corpus_fingerprint: String,
    built_at: DateTime<Utc>,
    dim: usize,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(flatten)]
    chunk: Chunk,
    vector_bits: Vec<u32>,
}

pub fn serialize_snapshot(snapshot: &IndexSnapshot) -> Result<Vec<u8>> {
    let meta = snapshot.meta();
    let persisted = PersistedSnapshot {
        format_version: FORMAT_VERSION,
        generation: meta.generation,
        embedder_id: meta.embedder_id.clone(),
        corpus_fingerprint: meta.corpus_fingerprint.clone(),
        built_at: meta.built_at,
        dim: snapshot.dim(),
        entries: snapshot
            .entries()
            .iter()
            .map(|e| PersistedEntry {
                chunk: e.chunk.clone(),
                vector_bits: e.vector.iter().map(|x| x.to_bits()).collect(),
            })
            .collect(),
    };
    serde_json::to_vec(&persisted).map_err(|e| Error::Index(format!("failed to serialize snapshot: {e}")))
}

pub fn deserialize_snapshot(bytes: &[u8]) -> Result<IndexSnapshot> {
    let persisted: PersistedSnapshot =
        serde_json::from_slice(bytes).map_err(|e| Error::Index(format!("corrupt snapshot: {e}")))?;
    if persisted.format_version != FORMAT_VERSION {
        return Err(Error::Index(format!(
            "unsupported snapshot format version {} (expected {})",
            persisted.format_version, FORMAT_VERSION
        )));
    }
    let meta = SnapshotMeta {
        generation: persisted.generation,
        embedder_id: persisted.embedder_id,
        corpus_fingerprint: persisted.corpus_fingerprint,
        built_at: persisted.built_at,
    };
    if persisted.entries.is_empty() {
        return Ok(IndexSnapshot::empty(meta));
    }
    let entries: Vec<EmbeddedChunk> = persisted
        .entries
        .into_iter()
        .map(|e| EmbeddedChunk { chunk: e.chunk, vector: e.vector_bits.into_iter().map(f32::from_bits).collect() })
        .collect();
    let snapshot = IndexSnapshot::build(meta, entries)?;
    if snapshot.dim() != persisted.dim {
        return Err(Error::Index(format!(
            "snapshot header says dimension {}, vectors have {}",
            persisted.dim,
            snapshot.dim()
        )));
    }
    Ok(snapshot)
}

/// File-backed home of the persisted snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been persisted yet; `Error::Index` when the file is unreadable or corrupt.
    pub fn load(&self) -> Result<Option<IndexSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted snapshot");
                return Ok(None);
            }
            Err(e) => return Err(Error::Index(format!("failed to read {}: {}", self.path.display(), e))),
        };
        let snapshot = deserialize_snapshot(&bytes)?;
        info!(
            path = %self.path.display(),
            generation = snapshot.generation(),
            chunks = snapshot.chunk_count(),
            "loaded persisted snapshot"
        );
        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &IndexSnapshot) -> Result<()> {
        let bytes = serialize_snapshot(snapshot)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |e: std::io::Error| Error::Index(format!("failed to write {}: {}", self.path.display(), e));
        fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        info!(
            path = %self.path.display(),
            generation = snapshot.generation(),
            chunks = snapshot.chunk_count(),
            bytes = bytes.len(),
            "persisted snapshot"
        );
        Ok(())
    }
}
