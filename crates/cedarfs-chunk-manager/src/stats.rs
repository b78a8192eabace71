//! Aggregate counters over the whole chunk population.
//!
//! Owned by the manager; every [`crate::ChunkEntry`] keeps itself accounted
//! here through `update_stats`, so monitoring queries never rescan the
//! index.

use cedarfs_chunk::goal::{MAX_ORDINARY_GOAL, MAX_XOR_LEVEL, MIN_ORDINARY_GOAL, MIN_XOR_LEVEL};
use cedarfs_chunk::{
    AvailabilityTable, Goal, ReplicationTable, StandardCopyMatrix, COPY_MATRIX_EXPORT_SIZE,
};

/// Roll-up returned by [`ChunkStats::chunk_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub total_chunks: u64,
    pub all_copies: u64,
    pub regular_valid_copies: u64,
}

/// All aggregate chunk counters, plus the deletion/replication totals polled
/// by the monitoring layer.
#[derive(Debug, Default)]
pub struct ChunkStats {
    pub chunk_count: u64,
    pub all_availability: AvailabilityTable,
    pub regular_availability: AvailabilityTable,
    pub all_replication: ReplicationTable,
    pub regular_replication: ReplicationTable,
    pub all_standard_copies: StandardCopyMatrix,
    pub regular_standard_copies: StandardCopyMatrix,
    deletions: u32,
    replications: u32,
}

impl ChunkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn note_deletion(&mut self) {
        self.deletions += 1;
    }

    pub(crate) fn note_replication(&mut self) {
        self.replications += 1;
    }

    /// Deletion and replication counts since the previous poll, resetting
    /// both.
    pub fn take_op_stats(&mut self) -> (u32, u32) {
        let taken = (self.deletions, self.replications);
        self.deletions = 0;
        self.replications = 0;
        taken
    }

    /// Total chunks plus weighted standard-copy totals.
    pub fn chunk_info(&self) -> ChunkInfo {
        ChunkInfo {
            total_chunks: self.chunk_count,
            all_copies: self.all_standard_copies.weighted_copy_total(),
            regular_valid_copies: self.regular_standard_copies.weighted_copy_total(),
        }
    }

    /// Number of lost chunks across every goal in use.
    pub fn missing_chunk_count(&self) -> u64 {
        let mut total = 0;
        for g in MIN_ORDINARY_GOAL..=MAX_ORDINARY_GOAL {
            total += self.all_availability.lost_chunks(Goal::ordinary(g));
        }
        for level in MIN_XOR_LEVEL..=MAX_XOR_LEVEL {
            total += self.all_availability.lost_chunks(Goal::xor(level));
        }
        total
    }

    /// The monitoring counter-matrix export: matrix 0 is the all-copies
    /// matrix, matrix 1 the regular-copies matrix, anything else zeros.
    pub fn store_chunk_counters(&self, matrix_id: u8) -> [u8; COPY_MATRIX_EXPORT_SIZE] {
        match matrix_id {
            0 => self.all_standard_copies.store_big_endian(),
            1 => self.regular_standard_copies.store_big_endian(),
            _ => [0u8; COPY_MATRIX_EXPORT_SIZE],
        }
    }
}
