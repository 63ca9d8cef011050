//! kbase-vector
//!
//! Immutable index snapshots with exact cosine search, the atomically swapped
//! active-snapshot slot, JSON persistence and corpus fingerprinting.

pub mod active;
pub mod fingerprint;
pub mod snapshot;
pub mod store;

pub use active::{ActiveIndex, PublishOutcome};
pub use fingerprint::corpus_fingerprint;
pub use snapshot::{GenerationId, IndexSnapshot, SnapshotMeta};
pub use store::{deserialize_snapshot, serialize_snapshot, SnapshotStore};
