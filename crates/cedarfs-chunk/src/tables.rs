//! Aggregate per-goal counter tables kept by the chunk index.
//!
//! Every chunk adds itself to these tables with its current goal and derived
//! counters, and removes itself before any change; the tables therefore
//! always reflect the live chunk population without rescanning it.

use byteorder::{BigEndian, ByteOrder};

use crate::calculator::ChunkAvailability;
use crate::goal::{Goal, MAX_GOAL_VALUE};

const GOAL_SLOTS: usize = MAX_GOAL_VALUE as usize + 1;

/// Histogram slots for part counts; everything above is clamped into the top
/// slot.
const COUNT_SLOTS: usize = 11;

fn goal_slot(goal: Goal) -> usize {
    (goal.as_u8() as usize).min(GOAL_SLOTS - 1)
}

fn count_slot(count: u32) -> usize {
    (count as usize).min(COUNT_SLOTS - 1)
}

/// Chunk counts by (goal, availability state).
#[derive(Debug, Clone, Default)]
pub struct AvailabilityTable {
    counts: [[u64; 3]; GOAL_SLOTS],
}

impl AvailabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, goal: Goal, state: ChunkAvailability) -> &mut u64 {
        &mut self.counts[goal_slot(goal)][state as usize]
    }

    pub fn add_chunk(&mut self, goal: Goal, state: ChunkAvailability) {
        *self.slot(goal, state) += 1;
    }

    pub fn remove_chunk(&mut self, goal: Goal, state: ChunkAvailability) {
        let slot = self.slot(goal, state);
        debug_assert!(*slot > 0, "availability table underflow");
        *slot = slot.saturating_sub(1);
    }

    pub fn safe_chunks(&self, goal: Goal) -> u64 {
        self.counts[goal_slot(goal)][ChunkAvailability::Safe as usize]
    }

    pub fn endangered_chunks(&self, goal: Goal) -> u64 {
        self.counts[goal_slot(goal)][ChunkAvailability::Endangered as usize]
    }

    pub fn lost_chunks(&self, goal: Goal) -> u64 {
        self.counts[goal_slot(goal)][ChunkAvailability::Lost as usize]
    }
}

/// Chunk counts by (goal, missing-part count) and (goal, redundant-part
/// count).
#[derive(Debug, Clone, Default)]
pub struct ReplicationTable {
    missing: [[u64; COUNT_SLOTS]; GOAL_SLOTS],
    redundant: [[u64; COUNT_SLOTS]; GOAL_SLOTS],
}

impl ReplicationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&mut self, goal: Goal, missing: u32, redundant: u32) {
        self.missing[goal_slot(goal)][count_slot(missing)] += 1;
        self.redundant[goal_slot(goal)][count_slot(redundant)] += 1;
    }

    pub fn remove_chunk(&mut self, goal: Goal, missing: u32, redundant: u32) {
        let m = &mut self.missing[goal_slot(goal)][count_slot(missing)];
        debug_assert!(*m > 0, "replication table underflow");
        *m = m.saturating_sub(1);
        let r = &mut self.redundant[goal_slot(goal)][count_slot(redundant)];
        debug_assert!(*r > 0, "replication table underflow");
        *r = r.saturating_sub(1);
    }

    /// Chunks of the given goal missing at least one part.
    pub fn chunks_with_missing_parts(&self, goal: Goal) -> u64 {
        self.missing[goal_slot(goal)][1..].iter().sum()
    }

    /// Chunks of the given goal with at least one redundant part.
    pub fn chunks_with_redundant_parts(&self, goal: Goal) -> u64 {
        self.redundant[goal_slot(goal)][1..].iter().sum()
    }
}

/// Bytes produced by [`StandardCopyMatrix::store_big_endian`].
pub const COPY_MATRIX_EXPORT_SIZE: usize = COUNT_SLOTS * COUNT_SLOTS * 4;

/// Chunk counts by (goal, standard-copy count), both axes clamped to 10.
///
/// Only chunks with an ordinary (or zero) goal are entered; the monitoring
/// protocol exports the matrix as 121 big-endian u32 cells.
#[derive(Debug, Clone, Default)]
pub struct StandardCopyMatrix {
    cells: [[u64; COUNT_SLOTS]; COUNT_SLOTS],
}

impl StandardCopyMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, goal: Goal, copies: u32) {
        self.cells[goal_slot(goal).min(COUNT_SLOTS - 1)][count_slot(copies)] += 1;
    }

    pub fn remove(&mut self, goal: Goal, copies: u32) {
        let cell = &mut self.cells[goal_slot(goal).min(COUNT_SLOTS - 1)][count_slot(copies)];
        debug_assert!(*cell > 0, "copy matrix underflow");
        *cell = cell.saturating_sub(1);
    }

    pub fn get(&self, goal: u8, copies: u8) -> u64 {
        self.cells[(goal as usize).min(COUNT_SLOTS - 1)][(copies as usize).min(COUNT_SLOTS - 1)]
    }

    /// Sum of `copies * count` over all goals, i.e. the total number of
    /// standard copies accounted in the matrix.
    pub fn weighted_copy_total(&self) -> u64 {
        let mut total = 0;
        for copies in 1..COUNT_SLOTS {
            let per_copy_count: u64 = (0..COUNT_SLOTS).map(|goal| self.cells[goal][copies]).sum();
            total += per_copy_count * copies as u64;
        }
        total
    }

    /// Serialize the matrix row-major as big-endian u32 cells.
    pub fn store_big_endian(&self) -> [u8; COPY_MATRIX_EXPORT_SIZE] {
        let mut buf = [0u8; COPY_MATRIX_EXPORT_SIZE];
        let mut off = 0;
        for row in &self.cells {
            for &cell in row {
                BigEndian::write_u32(&mut buf[off..off + 4], cell.min(u32::MAX as u64) as u32);
                off += 4;
            }
        }
        buf
    }
}
