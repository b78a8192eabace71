use cedarfs_chunk_manager::registry::NamespaceListener;
use cedarfs_types::{status_code_t, ChunkId};

/// Records the callbacks the manager owes the namespace layer.
#[derive(Debug, Default)]
pub struct RecordingNamespace {
    pub statuses: Vec<(ChunkId, status_code_t)>,
    pub version_increments: Vec<ChunkId>,
}

impl RecordingNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_statuses(&mut self) -> Vec<(ChunkId, status_code_t)> {
        std::mem::take(&mut self.statuses)
    }

    pub fn last_status(&self) -> Option<(ChunkId, status_code_t)> {
        self.statuses.last().copied()
    }
}

impl NamespaceListener for RecordingNamespace {
    fn chunk_status(&mut self, chunk: ChunkId, status: status_code_t) {
        self.statuses.push((chunk, status));
    }

    fn version_increased(&mut self, chunk: ChunkId) {
        self.version_increments.push(chunk);
    }
}
