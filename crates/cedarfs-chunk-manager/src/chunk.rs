//! The per-chunk state record.

use cedarfs_chunk::goal::{MAX_ORDINARY_GOAL, MIN_ORDINARY_GOAL};
use cedarfs_chunk::{ChunkAvailability, ChunkPartType, Goal, PartSetCalculator};
use cedarfs_types::{make_error, ChunkCode, ChunkId, Result, ServerId, Void};

use crate::copy::{ChunkCopy, CopyState};
use crate::stats::ChunkStats;

/// Derived part counts are clamped here before entering the caches.
const MAX_COUNTED_PARTS: u32 = 200;

/// Standard-copy counts are clamped to the copy-matrix axis.
const MAX_COUNTED_STANDARD: u32 = 10;

const FTAB_SLOTS: usize = MAX_ORDINARY_GOAL as usize + 1;

/// The multi-server operation currently in flight on a chunk, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkOperation {
    #[default]
    None,
    Create,
    SetVersion,
    Duplicate,
    Truncate,
    DupTrunc,
}

/// Availability and replication scalars cached on the chunk, re-derived by
/// `update_stats`. `goal_in_stats` remembers the goal the chunk was last
/// accounted under so it can be removed from the aggregate tables before
/// any change.
#[derive(Debug, Clone, Copy)]
struct CachedCounters {
    goal_in_stats: Goal,
    all_state: ChunkAvailability,
    regular_state: ChunkAvailability,
    all_missing: u32,
    all_redundant: u32,
    regular_missing: u32,
    regular_redundant: u32,
    all_standard: u32,
    regular_standard: u32,
}

impl Default for CachedCounters {
    fn default() -> Self {
        Self {
            goal_in_stats: Goal::NONE,
            all_state: ChunkAvailability::Safe,
            regular_state: ChunkAvailability::Safe,
            all_missing: 0,
            all_redundant: 0,
            regular_missing: 0,
            regular_redundant: 0,
            all_standard: 0,
            regular_standard: 0,
        }
    }
}

/// One chunk: version, lease, effective goal, file reference count, and the
/// list of copies held by chunkservers.
///
/// When a chunk is shared by files of differing ordinary goals the
/// per-goal reference histogram `ftab` is materialised and the effective
/// goal is the highest ordinary goal with a non-zero count. XOR goals do
/// not participate in that maximum.
#[derive(Debug)]
pub struct ChunkEntry {
    id: ChunkId,
    pub(crate) version: u32,
    pub(crate) lockid: u32,
    pub(crate) lockedto: u32,
    fcount: u32,
    goal: Goal,
    ftab: Option<Box<[u32; FTAB_SLOTS]>>,
    pub(crate) operation: ChunkOperation,
    pub(crate) needverincrease: bool,
    pub(crate) interrupted: bool,
    pub(crate) copies: Vec<ChunkCopy>,
    cached: CachedCounters,
}

impl ChunkEntry {
    /// A fresh entry; the caller must follow up with `init_stats`.
    pub(crate) fn new(id: ChunkId) -> Self {
        Self {
            id,
            version: 0,
            lockid: 0,
            lockedto: 0,
            fcount: 0,
            goal: Goal::NONE,
            ftab: None,
            operation: ChunkOperation::None,
            needverincrease: true,
            interrupted: false,
            copies: Vec::new(),
            cached: CachedCounters::default(),
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    pub fn file_count(&self) -> u32 {
        self.fcount
    }

    pub fn lockid(&self) -> u32 {
        self.lockid
    }

    pub fn locked_until(&self) -> u32 {
        self.lockedto
    }

    pub fn operation(&self) -> ChunkOperation {
        self.operation
    }

    pub fn copies(&self) -> &[ChunkCopy] {
        &self.copies
    }

    pub fn is_locked(&self, now: u32) -> bool {
        self.lockedto >= now
    }

    pub fn is_safe(&self) -> bool {
        self.cached.all_state == ChunkAvailability::Safe
    }

    pub fn is_endangered(&self) -> bool {
        self.cached.all_state == ChunkAvailability::Endangered
    }

    pub fn is_lost(&self) -> bool {
        self.cached.all_state == ChunkAvailability::Lost
    }

    pub fn needs_replication(&self) -> bool {
        self.cached.regular_missing > 0
    }

    pub fn needs_deletion(&self) -> bool {
        self.cached.regular_redundant > 0
    }

    pub fn standard_copies_count(&self) -> u32 {
        self.cached.all_standard
    }

    // ------------------------------------------------------------------
    // Aggregate-table accounting
    // ------------------------------------------------------------------

    /// Account a newly created chunk. Must be called exactly once.
    pub(crate) fn init_stats(&mut self, stats: &mut ChunkStats) {
        stats.chunk_count += 1;
        self.cached = CachedCounters::default();
        self.add_to_stats(stats);
        self.update_stats(stats);
    }

    /// Unaccount a chunk about to be dropped.
    pub(crate) fn free_stats(&mut self, stats: &mut ChunkStats) {
        stats.chunk_count -= 1;
        self.remove_from_stats(stats);
    }

    fn remove_from_stats(&self, stats: &mut ChunkStats) {
        let c = &self.cached;
        stats.all_availability.remove_chunk(c.goal_in_stats, c.all_state);
        stats
            .all_replication
            .remove_chunk(c.goal_in_stats, c.all_missing, c.all_redundant);
        stats
            .regular_availability
            .remove_chunk(c.goal_in_stats, c.regular_state);
        stats
            .regular_replication
            .remove_chunk(c.goal_in_stats, c.regular_missing, c.regular_redundant);
        if c.goal_in_stats.is_none() || c.goal_in_stats.is_ordinary() {
            stats
                .all_standard_copies
                .remove(c.goal_in_stats, c.all_standard);
            stats
                .regular_standard_copies
                .remove(c.goal_in_stats, c.regular_standard);
        }
    }

    fn add_to_stats(&mut self, stats: &mut ChunkStats) {
        self.cached.goal_in_stats = self.goal;
        let c = &self.cached;
        stats.all_availability.add_chunk(c.goal_in_stats, c.all_state);
        stats
            .all_replication
            .add_chunk(c.goal_in_stats, c.all_missing, c.all_redundant);
        stats
            .regular_availability
            .add_chunk(c.goal_in_stats, c.regular_state);
        stats
            .regular_replication
            .add_chunk(c.goal_in_stats, c.regular_missing, c.regular_redundant);
        if c.goal_in_stats.is_none() || c.goal_in_stats.is_ordinary() {
            stats.all_standard_copies.add(c.goal_in_stats, c.all_standard);
            stats
                .regular_standard_copies
                .add(c.goal_in_stats, c.regular_standard);
        }
    }

    /// Re-derive the cached availability/replication scalars from the copy
    /// list and re-account the chunk in the aggregate tables.
    pub(crate) fn update_stats(&mut self, stats: &mut ChunkStats) {
        self.remove_from_stats(stats);

        let mut all = PartSetCalculator::new(self.goal);
        let mut regular = PartSetCalculator::new(self.goal);
        let mut all_standard = 0;
        let mut regular_standard = 0;
        for copy in &self.copies {
            if !copy.is_valid() {
                continue;
            }
            all.add_part(copy.part_type);
            if copy.part_type.is_standard() && all_standard < MAX_COUNTED_STANDARD {
                all_standard += 1;
            }
            if !copy.is_todel() {
                regular.add_part(copy.part_type);
                if copy.part_type.is_standard() && regular_standard < MAX_COUNTED_STANDARD {
                    regular_standard += 1;
                }
            }
        }

        self.cached.all_state = all.state();
        self.cached.all_missing = all.count_parts_to_recover().min(MAX_COUNTED_PARTS);
        self.cached.all_redundant = all.count_parts_to_remove().min(MAX_COUNTED_PARTS);
        self.cached.regular_state = regular.state();
        self.cached.regular_missing = regular.count_parts_to_recover().min(MAX_COUNTED_PARTS);
        self.cached.regular_redundant = regular.count_parts_to_remove().min(MAX_COUNTED_PARTS);
        self.cached.all_standard = all_standard;
        self.cached.regular_standard = regular_standard;

        self.add_to_stats(stats);
    }

    /// The calculator over regular copies (valid and not on a retiring
    /// directory), used to plan replications and deletions.
    pub(crate) fn regular_calculator(&self) -> PartSetCalculator {
        let mut calc = PartSetCalculator::new(self.goal);
        for copy in &self.copies {
            if copy.is_valid() && !copy.is_todel() {
                calc.add_part(copy.part_type);
            }
        }
        calc
    }

    // ------------------------------------------------------------------
    // Copy list
    // ------------------------------------------------------------------

    pub(crate) fn find_copy(&self, server: ServerId, part_type: ChunkPartType) -> Option<usize> {
        self.copies
            .iter()
            .position(|c| c.server == server && c.part_type == part_type)
    }

    pub(crate) fn has_copy_on(&self, server: ServerId) -> bool {
        self.copies.iter().any(|c| c.server == server)
    }

    pub(crate) fn add_copy_no_stats_update(
        &mut self,
        server: ServerId,
        state: CopyState,
        version: u32,
        part_type: ChunkPartType,
    ) {
        self.copies.push(ChunkCopy::new(server, state, version, part_type));
    }

    pub(crate) fn add_copy(
        &mut self,
        server: ServerId,
        state: CopyState,
        version: u32,
        part_type: ChunkPartType,
        stats: &mut ChunkStats,
    ) {
        self.add_copy_no_stats_update(server, state, version, part_type);
        self.update_stats(stats);
    }

    /// An I/O error was reported for this copy: version is no longer
    /// trustworthy.
    pub(crate) fn invalidate_copy(&mut self, idx: usize, stats: &mut ChunkStats) {
        self.copies[idx].state = CopyState::Invalid;
        self.copies[idx].version = 0;
        self.update_stats(stats);
    }

    /// The copy's reported version does not match the chunk version.
    pub(crate) fn copy_has_wrong_version(&mut self, idx: usize, stats: &mut ChunkStats) {
        self.copies[idx].state = CopyState::Invalid;
        self.update_stats(stats);
    }

    /// A deletion request is being dispatched for this copy.
    pub(crate) fn delete_copy(&mut self, idx: usize, stats: &mut ChunkStats) {
        self.copies[idx].state = CopyState::Del;
        self.update_stats(stats);
    }

    pub(crate) fn remove_copy(&mut self, idx: usize, stats: &mut ChunkStats) {
        self.copies.remove(idx);
        self.update_stats(stats);
    }

    // ------------------------------------------------------------------
    // Goal bookkeeping
    // ------------------------------------------------------------------

    fn alloc_ftab(&mut self) -> &mut [u32; FTAB_SLOTS] {
        self.ftab.get_or_insert_with(|| Box::new([0; FTAB_SLOTS]))
    }

    /// Re-derive the effective ordinary goal as the highest ordinary goal
    /// with a non-zero reference count. Only called while the effective
    /// goal is ordinary and `ftab` is materialised.
    fn recompute_goal_from_ftab(&mut self) {
        let Some(ftab) = self.ftab.as_ref() else {
            return;
        };
        let mut g = MAX_ORDINARY_GOAL;
        while g > MIN_ORDINARY_GOAL && ftab[g as usize] == 0 {
            g -= 1;
        }
        self.goal = Goal(g);
    }

    /// A new file started referencing this chunk with the given goal.
    pub(crate) fn add_file(&mut self, goal: Goal, stats: &mut ChunkStats) -> Result<Void> {
        let old_goal = self.goal;
        if self.fcount == 0 {
            self.goal = goal;
            self.fcount = 1;
        } else if goal == self.goal {
            self.fcount += 1;
            if self.ftab.is_some() && goal.is_ordinary() {
                self.alloc_ftab()[goal.as_u8() as usize] += 1;
            }
        } else if self.ftab.is_none() {
            let current_goal = self.goal;
            let fcount = self.fcount;
            let ftab = self.alloc_ftab();
            if current_goal.is_ordinary() {
                ftab[current_goal.as_u8() as usize] = fcount;
            }
            if goal.is_ordinary() {
                ftab[goal.as_u8() as usize] = 1;
            }
            self.fcount += 1;
            if goal.is_ordinary() && current_goal.is_ordinary() && goal > current_goal {
                self.goal = goal;
            }
        } else {
            if goal.is_ordinary() {
                self.alloc_ftab()[goal.as_u8() as usize] += 1;
            }
            self.fcount += 1;
            if self.goal.is_ordinary() {
                self.recompute_goal_from_ftab();
            }
        }
        if old_goal != self.goal {
            self.update_stats(stats);
        }
        Ok(())
    }

    /// A file stopped referencing this chunk.
    pub(crate) fn remove_file(&mut self, goal: Goal, stats: &mut ChunkStats) -> Result<Void> {
        if self.fcount == 0 {
            tracing::warn!(chunk = %self.id, "serious structure inconsistency: no file references");
            return make_error(ChunkCode::CHUNK_LOST);
        }
        let old_goal = self.goal;
        if self.fcount == 1 {
            self.goal = Goal::NONE;
            self.fcount = 0;
        } else {
            if self.ftab.is_some() {
                if goal.is_ordinary() {
                    self.alloc_ftab()[goal.as_u8() as usize] -= 1;
                }
                if self.goal.is_ordinary() {
                    self.recompute_goal_from_ftab();
                }
            }
            self.fcount -= 1;
            if self.fcount == 1 {
                self.ftab = None;
            }
        }
        if old_goal != self.goal {
            self.update_stats(stats);
        }
        Ok(())
    }

    /// A referencing file changed its goal.
    pub(crate) fn change_file(
        &mut self,
        prev_goal: Goal,
        new_goal: Goal,
        stats: &mut ChunkStats,
    ) -> Result<Void> {
        if self.fcount == 0 {
            tracing::warn!(chunk = %self.id, "serious structure inconsistency: no file references");
            return make_error(ChunkCode::CHUNK_LOST);
        }
        let old_goal = self.goal;
        if self.fcount == 1 {
            self.goal = new_goal;
        } else if self.ftab.is_none() {
            let current_goal = self.goal;
            let fcount = self.fcount;
            let ftab = self.alloc_ftab();
            if current_goal.is_ordinary() {
                ftab[current_goal.as_u8() as usize] = fcount - 1;
            }
            if new_goal.is_ordinary() {
                ftab[new_goal.as_u8() as usize] = 1;
            }
            if current_goal.is_ordinary() && new_goal.is_ordinary() && new_goal > current_goal {
                self.goal = new_goal;
            }
        } else {
            if prev_goal.is_ordinary() {
                self.alloc_ftab()[prev_goal.as_u8() as usize] -= 1;
            }
            if new_goal.is_ordinary() {
                self.alloc_ftab()[new_goal.as_u8() as usize] += 1;
            }
            if self.goal.is_ordinary() {
                self.recompute_goal_from_ftab();
            }
        }
        if old_goal != self.goal {
            self.update_stats(stats);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn has_ftab(&self) -> bool {
        self.ftab.is_some()
    }
}
