use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::snapshot::{GenerationId, IndexSnapshot};

/// Outcome of offering a freshly built snapshot to the active slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { previous: GenerationId },
    /// A newer generation was already active; the offered one was dropped.
    Superseded { active: GenerationId },
}

/// The single shared "current index" reference.
///
/// Readers clone the `Arc` and keep using that generation for as long as they
/// hold it; publishing swaps the pointer under a write lock held only for the
/// swap. An old generation is freed once its last reader drops it.
pub struct ActiveIndex {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl ActiveIndex {
    pub fn new(initial: IndexSnapshot) -> Self {
        Self { current: RwLock::new(Arc::new(initial)) }
    }

    pub fn current(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in `snapshot` unless the active generation is already newer or equal.
    pub fn publish_if_newer(&self, snapshot: Arc<IndexSnapshot>) -> PublishOutcome {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let active = slot.generation();
        if snapshot.generation() <= active {
            debug!(offered = snapshot.generation(), active, "snapshot superseded");
            return PublishOutcome::Superseded { active };
        }
        info!(generation = snapshot.generation(), previous = active, chunks = snapshot.chunk_count(), "published snapshot");
        *slot = snapshot;
        PublishOutcome::Published { previous: active }
    }
}
