//! The reconciliation worker.
//!
//! A timer tick walks a window of hash buckets and drives every chunk it
//! visits toward its goal: garbage-collects empty entries, deletes invalid
//! and surplus copies, replicates under-goal chunks and levels disk usage
//! between servers. All work is rate-limited per server, replication is
//! additionally gated by startup/disconnect grace windows, and the
//! per-server deletion budget adapts to how much of the queued work actually
//! completes.

use byteorder::{BigEndian, ByteOrder};
use cedarfs_chunk::{ChunkPartType, PartSetCalculator};
use rand::Rng;

use crate::config::ChunkManagerConfig;
use crate::copy::CopyState;
use crate::manager::ChunkManager;
use crate::registry::{ChunkserverRegistry, ServersByUsage, FIRST_MULTI_SOURCE_VERSION};

/// Work done (or skipped for lack of budget) per job class in one full
/// cursor lap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobCounters {
    pub del_invalid: u32,
    pub del_unused: u32,
    pub del_diskclean: u32,
    pub del_overgoal: u32,
    pub copy_undergoal: u32,
}

/// Loop summary published at the end of each full cursor lap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopInfo {
    pub done: JobCounters,
    pub notdone: JobCounters,
    pub copy_rebalance: u32,
}

/// Bytes produced by [`ChunkManager::store_loop_info`].
pub const LOOP_INFO_EXPORT_SIZE: usize = 13 * 4;

/// The deletion budget is reassessed every this many full cursor laps.
const DELETE_BUDGET_LAPS: u32 = 16;

/// Mutable worker state carried between ticks.
#[derive(Debug)]
pub(crate) struct WorkerState {
    /// Counters of the lap in progress.
    pub(crate) current: LoopInfo,
    /// Counters of the last finished lap.
    pub(crate) published: LoopInfo,
    pub(crate) loop_start: u32,
    pub(crate) loop_end: u32,
    pub(crate) delete_done: u32,
    pub(crate) delete_not_done: u32,
    pub(crate) prev_to_delete_count: u32,
    pub(crate) delete_loop_count: u32,
    /// Fractional shadow of `tmp_max_del` so repeated 1.5x steps compound.
    pub(crate) tmp_max_del_frac: f64,
    /// The adaptive per-server deletion budget, within
    /// [soft limit, hard limit].
    pub(crate) tmp_max_del: u32,
    /// Usage-ordered server list fetched at most once per tick.
    pub(crate) ordered_cache: Option<ServersByUsage>,
}

impl WorkerState {
    pub(crate) fn new(config: &ChunkManagerConfig) -> Self {
        Self {
            current: LoopInfo::default(),
            published: LoopInfo::default(),
            loop_start: 0,
            loop_end: 0,
            delete_done: 0,
            delete_not_done: 0,
            prev_to_delete_count: 0,
            delete_loop_count: 0,
            tmp_max_del_frac: config.max_del_soft_limit as f64,
            tmp_max_del: config.max_del_soft_limit,
            ordered_cache: None,
        }
    }

    /// Keep the adaptive budget inside freshly reloaded limits.
    pub(crate) fn clamp_delete_budget(&mut self, config: &ChunkManagerConfig) {
        let soft = config.max_del_soft_limit as f64;
        let hard = config.max_del_hard_limit as f64;
        self.tmp_max_del_frac = self.tmp_max_del_frac.clamp(soft, hard);
        self.tmp_max_del = self
            .tmp_max_del
            .clamp(config.max_del_soft_limit, config.max_del_hard_limit);
    }
}

impl ChunkManager {
    /// The published loop summary.
    pub fn loop_info(&self) -> LoopInfo {
        self.worker.published
    }

    /// Timestamps of the last finished lap.
    pub fn loop_times(&self) -> (u32, u32) {
        (self.worker.loop_start, self.worker.loop_end)
    }

    /// The monitoring export of the loop summary: lap start and end times
    /// followed by the done/notdone counter pairs and the rebalance count,
    /// all big-endian u32.
    pub fn store_loop_info(&self) -> [u8; LOOP_INFO_EXPORT_SIZE] {
        let info = &self.worker.published;
        let words = [
            self.worker.loop_start,
            self.worker.loop_end,
            info.done.del_invalid,
            info.notdone.del_invalid,
            info.done.del_unused,
            info.notdone.del_unused,
            info.done.del_diskclean,
            info.notdone.del_diskclean,
            info.done.del_overgoal,
            info.notdone.del_overgoal,
            info.done.copy_undergoal,
            info.notdone.copy_undergoal,
            info.copy_rebalance,
        ];
        let mut buf = [0u8; LOOP_INFO_EXPORT_SIZE];
        for (k, word) in words.iter().enumerate() {
            BigEndian::write_u32(&mut buf[k * 4..k * 4 + 4], *word);
        }
        buf
    }

    /// One reconciliation tick, to be driven every second by the master's
    /// event loop.
    pub fn reconciliation_tick(&mut self, registry: &mut dyn ChunkserverRegistry) {
        let now = self.now();
        if self.start_time + self.config.replications_delay_init > now {
            return;
        }

        let usage = registry.usage_difference();
        if usage.total_servers < self.last_total_servers {
            // Losing a server often precedes its return; hold replications
            // for the disconnect grace window.
            self.jobs_no_rep_before = now + self.config.replications_delay_disconnect;
        } else if usage.total_servers > self.last_total_servers {
            if usage.total_servers >= self.max_total_servers {
                self.max_total_servers = usage.total_servers;
                self.jobs_no_rep_before = now;
            }
        } else if usage.total_servers < self.max_total_servers && now > self.jobs_no_rep_before {
            self.max_total_servers = usage.total_servers;
        }
        self.last_total_servers = usage.total_servers;

        if usage.min_usage > usage.max_usage {
            // No usable servers.
            return;
        }

        self.worker.ordered_cache = None;

        let mut visited: u32 = 0;
        for _ in 0..self.config.hash_steps {
            if visited >= self.config.hash_cps {
                break;
            }
            if self.jobs_hash_pos == 0 {
                self.every_loop_tasks(now);
            }
            let pos = self.jobs_hash_pos as usize;

            // Drop entries with no references and no copies.
            let mut idx = 0;
            while idx < self.buckets[pos].len() {
                if self.buckets[pos][idx].file_count() == 0
                    && self.buckets[pos][idx].copies.is_empty()
                {
                    let mut dead = self.buckets[pos].remove(idx);
                    dead.free_stats(&mut self.stats);
                } else {
                    idx += 1;
                }
            }

            let survivors = self.buckets[pos].len();
            visited += survivors as u32;
            if survivors > 0 {
                // Start at a random offset so the head of the bucket cannot
                // starve the tail of the per-server budgets.
                let offset = self.rng.gen_range(0..survivors);
                for i in offset..survivors {
                    self.do_chunk_jobs(registry, pos, i, usage.usable_servers, usage.min_usage, usage.max_usage);
                }
                for i in 0..offset {
                    self.do_chunk_jobs(registry, pos, i, usage.usable_servers, usage.min_usage, usage.max_usage);
                }
            }

            // Odd stride over a power-of-two table: every bucket is visited
            // once per lap.
            self.jobs_hash_pos = (self.jobs_hash_pos + 123) & self.hash_mask;
        }
    }

    /// End-of-lap bookkeeping: publish the loop summary and reassess the
    /// adaptive deletion budget.
    pub(crate) fn every_loop_tasks(&mut self, now: u32) {
        let worker = &mut self.worker;
        worker.delete_loop_count += 1;
        if worker.delete_loop_count >= DELETE_BUDGET_LAPS {
            let to_delete_count = worker.delete_done + worker.delete_not_done;
            worker.delete_loop_count = 0;
            if worker.delete_not_done > worker.delete_done
                && to_delete_count > worker.prev_to_delete_count
            {
                worker.tmp_max_del_frac *= 1.5;
                if worker.tmp_max_del_frac > self.config.max_del_hard_limit as f64 {
                    tracing::info!(
                        limit = self.config.max_del_hard_limit,
                        "deletion budget reached the hard limit"
                    );
                    worker.tmp_max_del_frac = self.config.max_del_hard_limit as f64;
                }
                worker.tmp_max_del = worker.tmp_max_del_frac as u32;
                tracing::info!(budget = worker.tmp_max_del, "deletion budget raised");
            }
            if to_delete_count < worker.prev_to_delete_count
                && worker.tmp_max_del_frac > self.config.max_del_soft_limit as f64
            {
                worker.tmp_max_del_frac /= 1.5;
                if worker.tmp_max_del_frac < self.config.max_del_soft_limit as f64 {
                    worker.tmp_max_del_frac = self.config.max_del_soft_limit as f64;
                }
                worker.tmp_max_del = worker.tmp_max_del_frac as u32;
                tracing::info!(budget = worker.tmp_max_del, "deletion budget lowered");
            }
            worker.prev_to_delete_count = to_delete_count;
            worker.delete_done = 0;
            worker.delete_not_done = 0;
        }
        worker.published = worker.current;
        worker.current = LoopInfo::default();
        worker.loop_start = worker.loop_end;
        worker.loop_end = now;
    }

    fn ordered_servers(&mut self, registry: &mut dyn ChunkserverRegistry) -> ServersByUsage {
        if self.worker.ordered_cache.is_none() {
            self.worker.ordered_cache =
                Some(registry.servers_ordered_by_usage(self.config.acceptable_difference / 2.0));
        }
        self.worker.ordered_cache.clone().unwrap_or_default()
    }

    /// The per-chunk decision procedure; cases are evaluated in order and
    /// the first that fires ends the visit.
    pub(crate) fn do_chunk_jobs(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        b: usize,
        i: usize,
        server_count: u16,
        min_usage: f64,
        max_usage: f64,
    ) {
        let now = self.now();

        // Refresh the cached counters in case a path missed an update.
        {
            let chunk = &mut self.buckets[b][i];
            chunk.update_stats(&mut self.stats);
        }

        let id = self.buckets[b][i].id();
        let fcount = self.buckets[b][i].file_count();
        let (mut vc, mut tdc, mut ivc, mut bc, mut tdb) = (0u32, 0u32, 0u32, 0u32, 0u32);
        for copy in &self.buckets[b][i].copies {
            match copy.state {
                CopyState::Invalid => ivc += 1,
                CopyState::TdValid => tdc += 1,
                CopyState::Valid => vc += 1,
                CopyState::TdBusy => tdb += 1,
                CopyState::Busy => bc += 1,
                CopyState::Del => {}
            }
        }

        // Only invalid copies left: automatic recovery is impossible.
        if tdc + vc + tdb + bc == 0 && ivc > 0 && fcount > 0 {
            tracing::warn!(chunk = %id, invalid = ivc,
                "chunk has only invalid copies, repair it manually");
            for copy in &self.buckets[b][i].copies {
                tracing::info!(chunk = %id, server = %registry.server_label(copy.server),
                    version = copy.version, "invalid copy");
            }
            return;
        }

        // Delete invalid copies, within the per-server budget.
        for idx in 0..self.buckets[b][i].copies.len() {
            let (server, state, part_type) = {
                let copy = &self.buckets[b][i].copies[idx];
                (copy.server, copy.state, copy.part_type)
            };
            if registry.deletion_counter(server) < self.worker.tmp_max_del {
                if state == CopyState::Invalid || state == CopyState::Del {
                    if state == CopyState::Del {
                        tracing::warn!(chunk = %id, server = %server,
                            "copy not deleted since the previous lap, retrying");
                    }
                    // Invalid -> Del changes nothing the cached counters see.
                    self.buckets[b][i].copies[idx].state = CopyState::Del;
                    self.stats.note_deletion();
                    registry.send_delete_chunk(server, id, 0, part_type);
                    self.worker.current.done.del_invalid += 1;
                    self.worker.delete_done += 1;
                    ivc = ivc.saturating_sub(1);
                }
            } else if state == CopyState::Invalid {
                self.worker.current.notdone.del_invalid += 1;
                self.worker.delete_not_done += 1;
            }
        }

        // An operation in flight or a live lease: leave the chunk alone.
        if self.buckets[b][i].operation != crate::chunk::ChunkOperation::None
            || self.buckets[b][i].is_locked(now)
        {
            return;
        }

        // Busy copies without an operation track a bug somewhere.
        if bc + tdb > 0 {
            tracing::warn!(chunk = %id, "chunk has unexpected busy copies");
            return;
        }

        // No file references the chunk: delete every remaining copy.
        if fcount == 0 {
            for idx in 0..self.buckets[b][i].copies.len() {
                let (server, state, part_type, version) = {
                    let copy = &self.buckets[b][i].copies[idx];
                    (copy.server, copy.state, copy.part_type, self.buckets[b][i].version)
                };
                if registry.deletion_counter(server) < self.worker.tmp_max_del {
                    if (state == CopyState::Valid || state == CopyState::TdValid)
                        && !self.buckets[b][i].copies[idx].is_busy()
                    {
                        self.buckets[b][i].delete_copy(idx, &mut self.stats);
                        self.buckets[b][i].needverincrease = true;
                        self.stats.note_deletion();
                        registry.send_delete_chunk(server, id, version, part_type);
                        self.worker.current.done.del_unused += 1;
                        self.worker.delete_done += 1;
                    }
                } else if state == CopyState::Valid || state == CopyState::TdValid {
                    self.worker.current.notdone.del_unused += 1;
                    self.worker.delete_not_done += 1;
                }
            }
            return;
        }

        // Under-goal: replicate before any copy is removed.
        if self.buckets[b][i].needs_replication() {
            let to_recover = self.buckets[b][i].regular_calculator().parts_to_recover();
            if self.jobs_no_rep_before >= now
                || self.buckets[b][i].is_lost()
                || to_recover.is_empty()
            {
                self.worker.current.notdone.copy_undergoal += 1;
                return;
            }
            let part_type = to_recover[0];
            let min_server_version = if part_type.is_xor() {
                FIRST_MULTI_SOURCE_VERSION
            } else {
                0
            };
            let mut destination = None;
            for server in registry.servers_with_replication_slots(self.config.max_write_repl) {
                if registry.server_version(server) < min_server_version {
                    continue;
                }
                if self.buckets[b][i].has_copy_on(server) {
                    continue;
                }
                destination = Some(server);
                break;
            }
            let Some(destination) = destination else {
                self.worker.current.notdone.copy_undergoal += 1;
                return;
            };
            if self.try_replication(registry, b, i, part_type, destination) {
                self.worker.current.done.copy_undergoal += 1;
            } else {
                self.worker.current.notdone.copy_undergoal += 1;
            }
            return;
        }

        // Over-goal: delete surplus parts, most-loaded servers first.
        if self.buckets[b][i].needs_deletion() {
            let mut to_remove = self.buckets[b][i].regular_calculator().parts_to_remove();
            let total = to_remove.len() as u32;
            let ordered = self.ordered_servers(registry);
            let mut removed = 0u32;
            for k in 0..ordered.servers.len() {
                if to_remove.is_empty() {
                    break;
                }
                let server = ordered.servers[ordered.servers.len() - 1 - k];
                let Some(idx) = self.buckets[b][i]
                    .copies
                    .iter()
                    .position(|c| c.server == server)
                else {
                    continue;
                };
                if self.buckets[b][i].copies[idx].state != CopyState::Valid {
                    continue;
                }
                let part_type = self.buckets[b][i].copies[idx].part_type;
                let Some(remove_pos) = to_remove.iter().position(|p| *p == part_type) else {
                    continue;
                };
                if registry.deletion_counter(server) < self.worker.tmp_max_del {
                    self.buckets[b][i].delete_copy(idx, &mut self.stats);
                    self.buckets[b][i].needverincrease = true;
                    self.stats.note_deletion();
                    registry.send_delete_chunk(server, id, 0, part_type);
                    to_remove.remove(remove_pos);
                    removed += 1;
                    vc = vc.saturating_sub(1);
                } else {
                    break;
                }
            }
            self.worker.current.done.del_overgoal += removed;
            self.worker.delete_done += removed;
            self.worker.current.notdone.del_overgoal += total - removed;
            self.worker.delete_not_done += total - removed;
            return;
        }

        // Every server holds a copy and some sit on retiring directories:
        // retire one of them. Whole replicas only.
        let goal = self.buckets[b][i].goal();
        let has_xor_copies = self.buckets[b][i]
            .copies
            .iter()
            .any(|c| c.part_type.is_xor());
        if goal.is_ordinary()
            && !has_xor_copies
            && vc + tdc >= server_count as u32
            && vc < goal.as_u8() as u32
            && tdc > 0
            && vc + tdc > 1
        {
            for idx in 0..self.buckets[b][i].copies.len() {
                let (server, state, part_type) = {
                    let copy = &self.buckets[b][i].copies[idx];
                    (copy.server, copy.state, copy.part_type)
                };
                if state != CopyState::TdValid {
                    continue;
                }
                if registry.deletion_counter(server) < self.worker.tmp_max_del {
                    self.buckets[b][i].delete_copy(idx, &mut self.stats);
                    self.buckets[b][i].needverincrease = true;
                    self.stats.note_deletion();
                    registry.send_delete_chunk(server, id, 0, part_type);
                    self.worker.current.done.del_diskclean += 1;
                    self.worker.delete_done += 1;
                    break;
                } else {
                    self.worker.current.notdone.del_diskclean += 1;
                    self.worker.delete_not_done += 1;
                }
            }
            return;
        }

        // Back-pressure: while the previous lap left under-goal work both
        // done and undone, replication bandwidth is saturated; skip
        // rebalancing until the picture clears.
        if self.worker.published.notdone.copy_undergoal > 0
            && self.worker.published.done.copy_undergoal > 0
        {
            return;
        }

        // Disk-usage levelling: copy from the most-loaded holder to the
        // least-loaded server without a copy.
        if goal.as_u8() as u32 >= vc
            && vc + tdc > 0
            && max_usage - min_usage > self.config.acceptable_difference
        {
            let ordered = self.ordered_servers(registry);
            if ordered.servers.is_empty() || (ordered.below_min == 0 && ordered.above_max == 0) {
                return;
            }
            let server_total = ordered.servers.len() as u32;
            let src_candidates = if ordered.above_max > 0 {
                ordered.above_max
            } else {
                server_total.saturating_sub(ordered.below_min)
            };
            let mut source: Option<(cedarfs_types::ServerId, ChunkPartType)> = None;
            for k in 0..src_candidates.min(server_total) {
                let server = ordered.servers[(server_total - 1 - k) as usize];
                if registry.replication_read_counter(server) >= self.config.max_read_repl {
                    continue;
                }
                let found = self.buckets[b][i].copies.iter().find(|c| {
                    c.server == server
                        && (c.state == CopyState::Valid || c.state == CopyState::TdValid)
                });
                if let Some(copy) = found {
                    source = Some((copy.server, copy.part_type));
                    break;
                }
            }
            let Some((_, part_type)) = source else {
                return;
            };
            let dst_candidates = if ordered.below_min > 0 {
                ordered.below_min
            } else {
                server_total.saturating_sub(ordered.above_max)
            };
            let mut destination = None;
            for k in 0..dst_candidates.min(server_total) {
                let server = ordered.servers[k as usize];
                if registry.replication_write_counter(server) < self.config.max_write_repl
                    && !self.buckets[b][i].has_copy_on(server)
                {
                    destination = Some(server);
                    break;
                }
            }
            if let Some(destination) = destination {
                if self.try_replication(registry, b, i, part_type, destination) {
                    self.worker.current.copy_rebalance += 1;
                }
            }
        }
    }

    /// Dispatch a replication of `part_type` to `destination`, preferring
    /// the multi-source protocol (which can rebuild XOR parts) and falling
    /// back to a legacy whole-copy transfer from a random standard source.
    pub(crate) fn try_replication(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        b: usize,
        i: usize,
        part_type: ChunkPartType,
        destination: cedarfs_types::ServerId,
    ) -> bool {
        let (id, version, goal) = {
            let chunk = &self.buckets[b][i];
            (chunk.id(), chunk.version(), chunk.goal())
        };
        let mut standard_sources = Vec::new();
        let mut multi_sources = Vec::new();
        let mut source_calc = PartSetCalculator::new(goal);
        for copy in &self.buckets[b][i].copies {
            if copy.is_valid() && !copy.is_busy() {
                if registry.server_version(copy.server) >= FIRST_MULTI_SOURCE_VERSION {
                    multi_sources.push(copy.server);
                    source_calc.add_part(copy.part_type);
                }
                if copy.part_type.is_standard() {
                    standard_sources.push(copy.server);
                }
            }
        }

        if source_calc.is_recovery_possible()
            && registry.server_version(destination) >= FIRST_MULTI_SOURCE_VERSION
        {
            registry.send_multi_source_replicate_chunk(
                destination,
                id,
                version,
                part_type,
                &multi_sources,
                &source_calc.available_parts(),
            );
        } else if part_type.is_standard() && !standard_sources.is_empty() {
            let source = standard_sources[self.rng.gen_range(0..standard_sources.len())];
            registry.send_replicate_chunk(destination, id, version, source);
        } else {
            return false;
        }
        self.stats.note_replication();
        let chunk = &mut self.buckets[b][i];
        chunk.lockid = 0; // remove a stale lock if any
        chunk.needverincrease = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ChunkManagerOptions;
    use std::rc::Rc;

    fn manager() -> ChunkManager {
        ChunkManager::with_hash_size(
            &ChunkManagerOptions::default(),
            Rc::new(ManualClock::new(100_000)),
            1 << 8,
        )
        .unwrap()
        .with_seeded_rng(3)
    }

    fn run_budget_laps(mgr: &mut ChunkManager, done: u32, not_done: u32) {
        mgr.worker.delete_done = done;
        mgr.worker.delete_not_done = not_done;
        mgr.worker.delete_loop_count = DELETE_BUDGET_LAPS - 1;
        mgr.every_loop_tasks(100_000);
    }

    #[test]
    fn test_delete_budget_starts_at_soft_limit() {
        let mgr = manager();
        assert_eq!(mgr.worker.tmp_max_del, mgr.config.max_del_soft_limit);
    }

    #[test]
    fn test_delete_budget_raises_under_backlog() {
        let mut mgr = manager();
        // More work skipped than done, and the backlog grew.
        run_budget_laps(&mut mgr, 10, 100);
        assert_eq!(mgr.worker.tmp_max_del, 15);
        run_budget_laps(&mut mgr, 10, 200);
        assert_eq!(mgr.worker.tmp_max_del, 22);
    }

    #[test]
    fn test_delete_budget_caps_at_hard_limit() {
        let mut mgr = manager();
        let mut backlog = 100;
        for _ in 0..10 {
            run_budget_laps(&mut mgr, 10, backlog);
            backlog *= 2;
        }
        assert_eq!(mgr.worker.tmp_max_del, mgr.config.max_del_hard_limit);
    }

    #[test]
    fn test_delete_budget_decays_back_to_soft_limit() {
        let mut mgr = manager();
        run_budget_laps(&mut mgr, 10, 100);
        assert!(mgr.worker.tmp_max_del > mgr.config.max_del_soft_limit);
        // Backlog shrinking: decay.
        for shrinking in [50u32, 20, 5, 1, 0] {
            run_budget_laps(&mut mgr, 0, shrinking);
        }
        assert_eq!(mgr.worker.tmp_max_del, mgr.config.max_del_soft_limit);
    }

    #[test]
    fn test_budget_reassessed_every_sixteenth_lap_only() {
        let mut mgr = manager();
        mgr.worker.delete_done = 10;
        mgr.worker.delete_not_done = 100;
        for _ in 0..DELETE_BUDGET_LAPS - 1 {
            mgr.every_loop_tasks(100_000);
            assert_eq!(mgr.worker.tmp_max_del, mgr.config.max_del_soft_limit);
        }
        mgr.every_loop_tasks(100_000);
        assert!(mgr.worker.tmp_max_del > mgr.config.max_del_soft_limit);
    }

    #[test]
    fn test_every_loop_tasks_publishes_and_resets() {
        let mut mgr = manager();
        mgr.worker.current.done.del_invalid = 5;
        mgr.worker.loop_end = 99_000;
        mgr.every_loop_tasks(100_000);
        assert_eq!(mgr.loop_info().done.del_invalid, 5);
        assert_eq!(mgr.worker.current, LoopInfo::default());
        assert_eq!(mgr.loop_times(), (99_000, 100_000));
    }

    #[test]
    fn test_store_loop_info_layout() {
        let mut mgr = manager();
        mgr.worker.current.done.copy_undergoal = 3;
        mgr.worker.current.copy_rebalance = 9;
        mgr.every_loop_tasks(100_000);
        let buf = mgr.store_loop_info();
        assert_eq!(buf.len(), LOOP_INFO_EXPORT_SIZE);
        assert_eq!(BigEndian::read_u32(&buf[4..8]), 100_000); // loop end
        assert_eq!(BigEndian::read_u32(&buf[40..44]), 3); // done undergoal
        assert_eq!(BigEndian::read_u32(&buf[48..52]), 9); // rebalance
    }

    #[test]
    fn test_reload_clamps_budget() {
        let mut mgr = manager();
        run_budget_laps(&mut mgr, 10, 100);
        run_budget_laps(&mut mgr, 10, 200);
        assert_eq!(mgr.worker.tmp_max_del, 22);
        let opts = ChunkManagerOptions {
            chunks_soft_del_limit: 2,
            chunks_hard_del_limit: Some(4),
            ..Default::default()
        };
        mgr.reload_config(&opts);
        assert_eq!(mgr.worker.tmp_max_del, 4);
    }
}
