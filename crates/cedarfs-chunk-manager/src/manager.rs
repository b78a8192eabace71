//! The chunk index and its namespace/chunkserver entry points.

use std::rc::Rc;

use cedarfs_chunk::{ChunkPartType, Goal};
use cedarfs_types::{make_error, ChunkCode, ChunkId, Result, ServerId, StatusCode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::chunk::{ChunkEntry, ChunkOperation};
use crate::clock::Clock;
use crate::config::{ChunkManagerConfig, ChunkManagerOptions};
use crate::copy::CopyState;
use crate::registry::{ChunkserverRegistry, NamespaceListener, NetworkLocation};
use crate::stats::ChunkStats;
use crate::topology;
use crate::worker::WorkerState;
use crate::{LOCK_TIMEOUT, UNUSED_DELETE_TIMEOUT};

/// Buckets in the chunk hash table. Must be a power of two so the odd
/// reconciliation stride visits every bucket.
pub const DEFAULT_HASH_SIZE: u32 = 0x100000;

/// Window after startup during which an empty registry answer means "no
/// chunkservers yet" rather than "no space".
const NEW_CHUNK_GRACE: u32 = 600;

/// Outcome of [`ChunkManager::multi_modify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifyResult {
    pub chunk_id: ChunkId,
    /// A multi-server operation was dispatched; the caller must wait for the
    /// completion callback before using the chunk.
    pub operation_dispatched: bool,
    /// The lease nonce to present on subsequent modifies and the unlock.
    pub lockid: u32,
}

/// Outcome of [`ChunkManager::repair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairResult {
    /// Whether the namespace must record a change (version reset or
    /// reference drop).
    pub changed: bool,
    /// The version the chunk was reset to, 0 if none.
    pub version: u32,
}

/// One copy location handed to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub location: NetworkLocation,
    pub part_type: ChunkPartType,
}

/// The authoritative in-memory chunk index of the master server.
pub struct ChunkManager {
    pub(crate) buckets: Vec<Vec<ChunkEntry>>,
    pub(crate) hash_mask: u32,
    pub(crate) next_chunk_id: u64,
    pub(crate) stats: ChunkStats,
    pub(crate) config: ChunkManagerConfig,
    pub(crate) worker: WorkerState,
    clock: Rc<dyn Clock>,
    pub(crate) rng: StdRng,
    pub(crate) start_time: u32,
    pub(crate) jobs_hash_pos: u32,
    pub(crate) jobs_no_rep_before: u32,
    pub(crate) last_total_servers: u16,
    pub(crate) max_total_servers: u16,
}

impl ChunkManager {
    pub fn new(opts: &ChunkManagerOptions, clock: Rc<dyn Clock>) -> Result<Self> {
        Self::with_hash_size(opts, clock, DEFAULT_HASH_SIZE)
    }

    /// A manager with a custom hash-table size; `hash_size` must be a power
    /// of two.
    pub fn with_hash_size(
        opts: &ChunkManagerOptions,
        clock: Rc<dyn Clock>,
        hash_size: u32,
    ) -> Result<Self> {
        if !hash_size.is_power_of_two() {
            return cedarfs_types::make_error_msg(
                StatusCode::INVALID_ARG,
                "hash size must be a power of two",
            );
        }
        let config = opts.resolve(hash_size)?;
        let start_time = clock.now();
        let worker = WorkerState::new(&config);
        Ok(Self {
            buckets: (0..hash_size).map(|_| Vec::new()).collect(),
            hash_mask: hash_size - 1,
            next_chunk_id: 1,
            stats: ChunkStats::new(),
            jobs_no_rep_before: start_time + config.replications_delay_init,
            config,
            worker,
            clock,
            rng: StdRng::from_entropy(),
            start_time,
            jobs_hash_pos: 0,
            last_total_servers: 0,
            max_total_servers: 0,
        })
    }

    /// Replace the RNG with a deterministic one. Lease nonces become
    /// predictable; for tests only.
    pub fn with_seeded_rng(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Apply a live configuration reload.
    pub fn reload_config(&mut self, opts: &ChunkManagerOptions) {
        self.config.apply_reload(opts, self.hash_mask + 1);
        self.worker.clamp_delete_budget(&self.config);
    }

    pub fn config(&self) -> &ChunkManagerConfig {
        &self.config
    }

    /// Reset the id allocator for a freshly formatted namespace.
    pub fn new_fs(&mut self) {
        self.next_chunk_id = 1;
    }

    pub fn stats(&self) -> &ChunkStats {
        &self.stats
    }

    /// Deletions and replications dispatched since the previous poll.
    pub fn take_op_stats(&mut self) -> (u32, u32) {
        self.stats.take_op_stats()
    }

    pub fn chunk_count(&self) -> u64 {
        self.stats.chunk_count
    }

    pub(crate) fn now(&self) -> u32 {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Index
    // ------------------------------------------------------------------

    pub(crate) fn bucket_of(&self, id: ChunkId) -> usize {
        ((id.0 as u32) & self.hash_mask) as usize
    }

    pub(crate) fn hash_size(&self) -> u32 {
        self.hash_mask + 1
    }

    pub(crate) fn find(&self, id: ChunkId) -> Option<(usize, usize)> {
        let bucket = self.bucket_of(id);
        self.buckets[bucket]
            .iter()
            .position(|c| c.id() == id)
            .map(|idx| (bucket, idx))
    }

    /// Look up a chunk entry.
    pub fn get(&self, id: ChunkId) -> Option<&ChunkEntry> {
        self.find(id).map(|(b, i)| &self.buckets[b][i])
    }

    pub(crate) fn insert_new_chunk(&mut self, id: ChunkId) -> (usize, usize) {
        let bucket = self.bucket_of(id);
        let mut entry = ChunkEntry::new(id);
        entry.init_stats(&mut self.stats);
        self.buckets[bucket].push(entry);
        (bucket, self.buckets[bucket].len() - 1)
    }

    fn allocate_chunk_id(&mut self) -> ChunkId {
        let id = ChunkId(self.next_chunk_id);
        self.next_chunk_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Goal bookkeeping (namespace)
    // ------------------------------------------------------------------

    /// A file with the given goal started referencing the chunk.
    pub fn add_file(&mut self, chunk_id: ChunkId, goal: Goal) -> Result<()> {
        let (b, i) = self.find(chunk_id).ok_or_else(no_chunk)?;
        self.buckets[b][i].add_file(goal, &mut self.stats)
    }

    /// A file with the given goal stopped referencing the chunk.
    pub fn remove_file(&mut self, chunk_id: ChunkId, goal: Goal) -> Result<()> {
        let (b, i) = self.find(chunk_id).ok_or_else(no_chunk)?;
        self.buckets[b][i].remove_file(goal, &mut self.stats)
    }

    /// A referencing file changed goal.
    pub fn change_file(&mut self, chunk_id: ChunkId, prev_goal: Goal, new_goal: Goal) -> Result<()> {
        if prev_goal == new_goal {
            return Ok(());
        }
        let (b, i) = self.find(chunk_id).ok_or_else(no_chunk)?;
        self.buckets[b][i].change_file(prev_goal, new_goal, &mut self.stats)
    }

    // ------------------------------------------------------------------
    // Write lease and multi-server operations (namespace)
    // ------------------------------------------------------------------

    /// Serve an append/modify request: allocate a fresh chunk, bump the
    /// version of an exclusively-owned chunk, or duplicate a shared one
    /// (copy-on-write). Renews the write lease on the resulting chunk.
    pub fn multi_modify(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        old_chunk: ChunkId,
        goal: Goal,
        provided_lockid: u32,
        use_dummy_lockid: bool,
    ) -> Result<ModifyResult> {
        let now = self.now();
        if old_chunk == ChunkId(0) {
            // Brand new chunk.
            let servers = registry.servers_for_new_chunk(goal);
            if servers.is_empty() {
                let usage = registry.usage_difference();
                if usage.usable_servers > 0 && now > self.start_time + NEW_CHUNK_GRACE {
                    return make_error(ChunkCode::NO_SPACE);
                }
                return make_error(ChunkCode::NO_CHUNKSERVERS);
            }
            let id = self.allocate_chunk_id();
            let (b, i) = self.insert_new_chunk(id);
            let chunk = &mut self.buckets[b][i];
            chunk.version = 1;
            chunk.interrupted = false;
            chunk.operation = ChunkOperation::Create;
            chunk.add_file(goal, &mut self.stats)?;
            for (server, part_type) in servers {
                chunk.add_copy_no_stats_update(server, CopyState::Busy, 1, part_type);
                registry.send_create_chunk(server, id, part_type, 1);
            }
            chunk.update_stats(&mut self.stats);
            let lockid = self.lock_chunk(b, i, now, provided_lockid, use_dummy_lockid);
            return Ok(ModifyResult {
                chunk_id: id,
                operation_dispatched: true,
                lockid,
            });
        }

        let (ob, oi) = self.find(old_chunk).ok_or_else(no_chunk)?;
        {
            let oc = &self.buckets[ob][oi];
            if provided_lockid != 0 && provided_lockid != oc.lockid {
                if oc.lockid == 0 || oc.lockedto == 0 {
                    // The lock was already cleared by an operation or by a
                    // different client.
                    return make_error(ChunkCode::NOT_LOCKED);
                }
                return make_error(ChunkCode::WRONG_LOCKID);
            }
            if provided_lockid == 0 && oc.is_locked(now) {
                return make_error(ChunkCode::LOCKED);
            }
            if oc.is_lost() {
                return make_error(ChunkCode::CHUNK_LOST);
            }
        }

        let fcount = self.buckets[ob][oi].file_count();
        if fcount == 1 {
            // Sole owner, reuse the chunk in place.
            let chunk = &mut self.buckets[ob][oi];
            if chunk.operation != ChunkOperation::None {
                return make_error(ChunkCode::CHUNK_BUSY);
            }
            let mut dispatched = false;
            if chunk.needverincrease {
                let old_version = chunk.version;
                let new_version = old_version + 1;
                let mut participants = 0;
                for copy in chunk.copies.iter_mut() {
                    if copy.is_valid() {
                        if !copy.is_busy() {
                            copy.mark_busy();
                        }
                        copy.version = new_version;
                        registry.send_set_chunk_version(
                            copy.server,
                            old_chunk,
                            new_version,
                            old_version,
                            copy.part_type,
                        );
                        participants += 1;
                    }
                }
                if participants == 0 {
                    return make_error(ChunkCode::CHUNK_LOST);
                }
                chunk.interrupted = false;
                chunk.operation = ChunkOperation::SetVersion;
                chunk.version = new_version;
                dispatched = true;
            }
            let lockid = self.lock_chunk(ob, oi, now, provided_lockid, use_dummy_lockid);
            return Ok(ModifyResult {
                chunk_id: old_chunk,
                operation_dispatched: dispatched,
                lockid,
            });
        }
        if fcount == 0 {
            tracing::warn!(chunk = %old_chunk, "serious structure inconsistency: no file references");
            return make_error(ChunkCode::CHUNK_LOST);
        }

        // Shared chunk: duplicate before modifying (copy-on-write).
        let sources: Vec<ServerId> = self.buckets[ob][oi]
            .copies
            .iter()
            .filter(|c| c.is_valid())
            .map(|c| c.server)
            .collect();
        if sources.is_empty() {
            return make_error(ChunkCode::CHUNK_LOST);
        }
        let old_version = self.buckets[ob][oi].version;
        let new_id = self.allocate_chunk_id();
        let (nb, ni) = self.insert_new_chunk(new_id);
        self.buckets[ob][oi].remove_file(goal, &mut self.stats)?;
        let chunk = &mut self.buckets[nb][ni];
        chunk.version = 1;
        chunk.interrupted = false;
        chunk.operation = ChunkOperation::Duplicate;
        chunk.add_file(goal, &mut self.stats)?;
        for server in &sources {
            // Shared XOR parts are duplicated as whole replicas.
            chunk.add_copy_no_stats_update(*server, CopyState::Busy, 1, ChunkPartType::Standard);
            registry.send_duplicate_chunk(*server, new_id, 1, old_chunk, old_version);
        }
        chunk.update_stats(&mut self.stats);
        let lockid = self.lock_chunk(nb, ni, now, provided_lockid, use_dummy_lockid);
        Ok(ModifyResult {
            chunk_id: new_id,
            operation_dispatched: true,
            lockid,
        })
    }

    /// Serve a truncate request; the in-place variant uses `truncate`, the
    /// copy-on-write variant `duptrunc`. Renews the lease timer on the
    /// resulting chunk (no lock-id handshake on this path).
    pub fn multi_truncate(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        old_chunk: ChunkId,
        length: u32,
        goal: Goal,
        truncating_upwards: bool,
    ) -> Result<ChunkId> {
        let now = self.now();
        let (ob, oi) = self.find(old_chunk).ok_or_else(no_chunk)?;
        if self.buckets[ob][oi].is_locked(now) {
            return make_error(ChunkCode::LOCKED);
        }
        self.buckets[ob][oi].lockid = 0; // remove a stale lock if any

        let fcount = self.buckets[ob][oi].file_count();
        let result_id;
        if fcount == 1 {
            let chunk = &mut self.buckets[ob][oi];
            if chunk.operation != ChunkOperation::None {
                return make_error(ChunkCode::CHUNK_BUSY);
            }
            let old_version = chunk.version;
            let new_version = old_version + 1;
            let mut participants = 0;
            let mut invalidated = false;
            for copy in chunk.copies.iter_mut() {
                if !copy.is_valid() {
                    continue;
                }
                if !copy.is_busy() {
                    copy.mark_busy();
                }
                let unsupported = !truncating_upwards
                    && copy.part_type.is_parity()
                    && copy
                        .part_type
                        .xor_level()
                        .is_some_and(|level| length % (cedarfs_chunk::BLOCK_SIZE * level as u32) != 0);
                if unsupported {
                    // Shortening a parity part to a non-stripe-aligned
                    // length cannot be done in place.
                    tracing::warn!(chunk = %old_chunk, "cannot truncate parity part, invalidating copy");
                    copy.state = CopyState::Invalid;
                    invalidated = true;
                } else {
                    copy.version = new_version;
                    registry.send_truncate_chunk(
                        copy.server,
                        old_chunk,
                        copy.part_type,
                        copy.part_type.part_length(length),
                        new_version,
                        old_version,
                    );
                    participants += 1;
                }
            }
            if invalidated {
                chunk.update_stats(&mut self.stats);
            }
            if participants == 0 {
                return make_error(ChunkCode::CHUNK_LOST);
            }
            let chunk = &mut self.buckets[ob][oi];
            chunk.interrupted = false;
            chunk.operation = ChunkOperation::Truncate;
            chunk.version = new_version;
            result_id = old_chunk;
        } else {
            if fcount == 0 {
                tracing::warn!(chunk = %old_chunk, "serious structure inconsistency: no file references");
                return make_error(ChunkCode::CHUNK_LOST);
            }
            let sources: Vec<ServerId> = self.buckets[ob][oi]
                .copies
                .iter()
                .filter(|c| c.is_valid())
                .map(|c| c.server)
                .collect();
            if sources.is_empty() {
                return make_error(ChunkCode::CHUNK_LOST);
            }
            let old_version = self.buckets[ob][oi].version;
            let new_id = self.allocate_chunk_id();
            let (nb, ni) = self.insert_new_chunk(new_id);
            self.buckets[ob][oi].remove_file(goal, &mut self.stats)?;
            let chunk = &mut self.buckets[nb][ni];
            chunk.version = 1;
            chunk.interrupted = false;
            chunk.operation = ChunkOperation::DupTrunc;
            chunk.add_file(goal, &mut self.stats)?;
            for server in &sources {
                chunk.add_copy_no_stats_update(*server, CopyState::Busy, 1, ChunkPartType::Standard);
                registry.send_duptrunc_chunk(*server, new_id, 1, old_chunk, old_version, length);
            }
            chunk.update_stats(&mut self.stats);
            result_id = new_id;
        }

        let (b, i) = self.find(result_id).ok_or_else(no_chunk)?;
        self.buckets[b][i].lockedto = now + LOCK_TIMEOUT;
        Ok(result_id)
    }

    fn lock_chunk(
        &mut self,
        b: usize,
        i: usize,
        now: u32,
        provided_lockid: u32,
        use_dummy_lockid: bool,
    ) -> u32 {
        let lockid = if provided_lockid != 0 {
            provided_lockid
        } else if use_dummy_lockid {
            1
        } else {
            // Random nonce greater than 1; 1 is reserved for replayed
            // operations.
            2 + self.rng.gen_range(0..0xFFFF_FFF0u32)
        };
        let chunk = &mut self.buckets[b][i];
        chunk.lockedto = now + LOCK_TIMEOUT;
        chunk.lockid = lockid;
        lockid
    }

    /// Whether an unlock with the given lock id would be accepted.
    pub fn can_unlock(&self, chunk_id: ChunkId, lockid: u32) -> Result<()> {
        let (b, i) = self.find(chunk_id).ok_or_else(no_chunk)?;
        let chunk = &self.buckets[b][i];
        if lockid == 0 {
            // Force unlock.
            return Ok(());
        }
        // An expired lease may still be unlocked with the matching lock id:
        // nobody else has touched the chunk since it was locked, or the
        // stale lock would have been cleared.
        if chunk.lockid == lockid {
            Ok(())
        } else if chunk.lockedto == 0 {
            make_error(ChunkCode::NOT_LOCKED)
        } else {
            make_error(ChunkCode::WRONG_LOCKID)
        }
    }

    /// Release the write lease. The lock id is retained so a retransmitted
    /// unlock is still accepted.
    pub fn unlock(&mut self, chunk_id: ChunkId) -> Result<()> {
        let (b, i) = self.find(chunk_id).ok_or_else(no_chunk)?;
        self.buckets[b][i].lockedto = 0;
        Ok(())
    }

    /// Metadata-replay helper: force a chunk's version.
    pub fn set_version(&mut self, chunk_id: ChunkId, version: u32) -> Result<()> {
        let (b, i) = self.find(chunk_id).ok_or_else(no_chunk)?;
        self.buckets[b][i].version = version;
        Ok(())
    }

    /// Valid-copy count reported to the namespace, derived from the cached
    /// availability state.
    pub fn get_validcopies(&self, chunk_id: ChunkId) -> Result<u8> {
        let chunk = self.get(chunk_id).ok_or_else(no_chunk)?;
        Ok(if chunk.is_lost() {
            0
        } else if chunk.is_endangered() {
            1
        } else {
            std::cmp::max(2, chunk.standard_copies_count() as u8)
        })
    }

    /// The chunk version and up to `max_copies` copy locations, closest to
    /// `client_ip` first; ties are broken by a per-call random nonce.
    pub fn get_versions_and_locations(
        &mut self,
        registry: &dyn ChunkserverRegistry,
        chunk_id: ChunkId,
        client_ip: u32,
        max_copies: u32,
    ) -> Result<(u32, Vec<ChunkLocation>)> {
        let (b, i) = self.find(chunk_id).ok_or_else(no_chunk)?;
        let chunk = &self.buckets[b][i];
        let mut candidates: Vec<(u32, u32, ChunkLocation)> = Vec::new();
        for copy in &chunk.copies {
            if !copy.is_valid() || candidates.len() as u32 >= max_copies {
                continue;
            }
            if let Some(location) = registry.server_location(copy.server) {
                candidates.push((
                    topology::distance(location.ip, client_ip),
                    self.rng.gen(),
                    ChunkLocation {
                        location,
                        part_type: copy.part_type,
                    },
                ));
            }
        }
        candidates.sort_by_key(|(dist, nonce, _)| (*dist, *nonce));
        let version = self.buckets[b][i].version;
        Ok((version, candidates.into_iter().map(|(_, _, loc)| loc).collect()))
    }

    /// Administrative repair: if nothing healthy or in flight remains,
    /// reset the chunk to the best version among its invalid copies, or
    /// drop the file reference when no sensible copy exists.
    pub fn repair(&mut self, goal: Goal, chunk_id: ChunkId) -> RepairResult {
        if chunk_id == ChunkId(0) {
            return RepairResult {
                changed: false,
                version: 0,
            };
        }
        let now = self.now();
        let Some((b, i)) = self.find(chunk_id) else {
            // Unknown chunk: erase the reference.
            return RepairResult {
                changed: true,
                version: 0,
            };
        };
        if self.buckets[b][i].is_locked(now) {
            // A live writer implies the chunk does not need repairing.
            return RepairResult {
                changed: false,
                version: 0,
            };
        }
        let chunk = &mut self.buckets[b][i];
        chunk.lockid = 0; // remove a stale lock if any
        let mut best_version = 0;
        for copy in &chunk.copies {
            match copy.state {
                CopyState::Valid | CopyState::TdValid | CopyState::Busy | CopyState::TdBusy => {
                    return RepairResult {
                        changed: false,
                        version: 0,
                    };
                }
                CopyState::Invalid => best_version = best_version.max(copy.version),
                CopyState::Del => {}
            }
        }
        if best_version == 0 {
            // Nothing recoverable: the chunk is gone for good.
            let _ = chunk.remove_file(goal, &mut self.stats);
            return RepairResult {
                changed: true,
                version: 0,
            };
        }
        chunk.version = best_version;
        for copy in chunk.copies.iter_mut() {
            if copy.state == CopyState::Invalid && copy.version == best_version {
                copy.state = CopyState::Valid;
            }
        }
        chunk.needverincrease = true;
        chunk.update_stats(&mut self.stats);
        RepairResult {
            changed: true,
            version: best_version,
        }
    }

    // ------------------------------------------------------------------
    // Chunkserver observations
    // ------------------------------------------------------------------

    /// Periodic report that `server` holds a part of `chunk_id`. Bit 31 of
    /// `version_and_todel` flags a copy on a retiring directory.
    pub fn has_chunk(
        &mut self,
        server: ServerId,
        chunk_id: ChunkId,
        version_and_todel: u32,
        part_type: ChunkPartType,
    ) {
        let reported_version = version_and_todel & 0x7FFF_FFFF;
        let todel = version_and_todel & 0x8000_0000 != 0;
        let (b, i) = match self.find(chunk_id) {
            Some(pos) => pos,
            None => {
                // A chunk the namespace has never heard of: record it so it
                // can be deleted once the grace period elapses.
                if chunk_id.0 >= self.next_chunk_id {
                    self.next_chunk_id = chunk_id.0 + 1;
                }
                let now = self.now();
                let (b, i) = self.insert_new_chunk(chunk_id);
                let chunk = &mut self.buckets[b][i];
                chunk.version = reported_version;
                chunk.lockedto = now + UNUSED_DELETE_TIMEOUT;
                chunk.lockid = 0;
                (b, i)
            }
        };
        let chunk = &mut self.buckets[b][i];
        if let Some(idx) = chunk.find_copy(server, part_type) {
            // Repeated notification about a known copy; seen after
            // chunkserver configuration reloads.
            match chunk.copies[idx].state {
                CopyState::Del => {
                    // The server re-advertises a copy we asked it to delete;
                    // converge by deleting again.
                    tracing::warn!(chunk = %chunk_id, server = %server,
                        "copy pending deletion re-advertised, repeating deletion");
                    chunk.invalidate_copy(idx, &mut self.stats);
                    return;
                }
                CopyState::Invalid => return,
                _ => {}
            }
            if chunk.copies[idx].version != reported_version {
                tracing::warn!(
                    chunk = %chunk_id,
                    server = %server,
                    recorded = chunk.copies[idx].version,
                    reported = reported_version,
                    "copy version differs from master data, updating"
                );
                chunk.copies[idx].version = reported_version;
            }
            if chunk.copies[idx].version != chunk.version {
                chunk.copy_has_wrong_version(idx, &mut self.stats);
                return;
            }
            if !chunk.copies[idx].is_todel() && todel {
                chunk.copies[idx].mark_todel();
                chunk.update_stats(&mut self.stats);
            } else if chunk.copies[idx].is_todel() && !todel {
                chunk.copies[idx].unmark_todel();
                chunk.update_stats(&mut self.stats);
            }
            return;
        }
        let state = if reported_version == chunk.version {
            if todel {
                CopyState::TdValid
            } else {
                CopyState::Valid
            }
        } else {
            CopyState::Invalid
        };
        chunk.add_copy(server, state, reported_version, part_type, &mut self.stats);
    }

    /// The server reported an I/O error on its copy.
    pub fn damaged(&mut self, server: ServerId, chunk_id: ChunkId) {
        let (b, i) = match self.find(chunk_id) {
            Some(pos) => pos,
            None => {
                if chunk_id.0 >= self.next_chunk_id {
                    self.next_chunk_id = chunk_id.0 + 1;
                }
                let (b, i) = self.insert_new_chunk(chunk_id);
                self.buckets[b][i].version = 0;
                (b, i)
            }
        };
        let chunk = &mut self.buckets[b][i];
        if let Some(idx) = chunk.copies.iter().position(|c| c.server == server) {
            chunk.invalidate_copy(idx, &mut self.stats);
        } else {
            chunk.add_copy(
                server,
                CopyState::Invalid,
                0,
                ChunkPartType::Standard,
                &mut self.stats,
            );
        }
        chunk.needverincrease = true;
    }

    /// The server no longer holds any copy of the chunk.
    pub fn lost(&mut self, server: ServerId, chunk_id: ChunkId) {
        let Some((b, i)) = self.find(chunk_id) else {
            return;
        };
        let chunk = &mut self.buckets[b][i];
        let before = chunk.copies.len();
        chunk.copies.retain(|c| c.server != server);
        if chunk.copies.len() != before {
            chunk.needverincrease = true;
            chunk.update_stats(&mut self.stats);
        }
    }

    /// A chunkserver connection dropped: unlink all of its copies and
    /// resolve any operations it was participating in.
    pub fn server_disconnected(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        server: ServerId,
    ) {
        for b in 0..self.buckets.len() {
            for i in 0..self.buckets[b].len() {
                {
                    let chunk = &mut self.buckets[b][i];
                    let before = chunk.copies.len();
                    chunk.copies.retain(|c| c.server != server);
                    if chunk.copies.len() != before {
                        chunk.needverincrease = true;
                        chunk.update_stats(&mut self.stats);
                    }
                }
                let (operation, any_busy, valid_copies, id) = {
                    let chunk = &self.buckets[b][i];
                    (
                        chunk.operation,
                        chunk.copies.iter().any(|c| c.is_busy()),
                        chunk.copies.iter().filter(|c| c.is_valid()).count(),
                        chunk.id(),
                    )
                };
                if operation != ChunkOperation::None {
                    if any_busy {
                        self.buckets[b][i].interrupted = true;
                    } else if valid_copies > 0 {
                        self.emergency_increase_version(registry, namespace, b, i);
                    } else {
                        namespace.chunk_status(id, ChunkCode::NOT_DONE);
                        self.buckets[b][i].operation = ChunkOperation::None;
                    }
                }
            }
        }
    }

    /// Reconcile the survivors of a partially-failed operation by bumping
    /// the chunk version on every valid copy.
    pub(crate) fn emergency_increase_version(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        b: usize,
        i: usize,
    ) {
        let chunk = &mut self.buckets[b][i];
        let id = chunk.id();
        let old_version = chunk.version;
        let new_version = old_version + 1;
        let mut participants = 0;
        for copy in chunk.copies.iter_mut() {
            if copy.is_valid() {
                if !copy.is_busy() {
                    copy.mark_busy();
                }
                copy.version = new_version;
                registry.send_set_chunk_version(copy.server, id, new_version, old_version, copy.part_type);
                participants += 1;
            }
        }
        if participants > 0 {
            chunk.interrupted = false;
            chunk.operation = ChunkOperation::SetVersion;
            chunk.version = new_version;
            tracing::info!(chunk = %id, version = new_version, "emergency version increase");
        } else {
            namespace.chunk_status(id, ChunkCode::CHUNK_LOST);
        }
        namespace.version_increased(id);
    }

    // ------------------------------------------------------------------
    // Operation completions
    // ------------------------------------------------------------------

    fn operation_status(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        server: ServerId,
        chunk_id: ChunkId,
        part_type: ChunkPartType,
        status: u8,
    ) {
        let Some((b, i)) = self.find(chunk_id) else {
            return;
        };
        {
            let chunk = &mut self.buckets[b][i];
            if let Some(idx) = chunk.find_copy(server, part_type) {
                if status != 0 {
                    // Increase the version once the stragglers finish, so
                    // the failed copy can never be mistaken for current.
                    chunk.interrupted = true;
                    chunk.invalidate_copy(idx, &mut self.stats);
                } else if chunk.copies[idx].is_busy() {
                    chunk.copies[idx].unmark_busy();
                }
            }
        }
        let (any_busy, valid_copies, interrupted) = {
            let chunk = &self.buckets[b][i];
            (
                chunk.copies.iter().any(|c| c.is_busy()),
                chunk.copies.iter().filter(|c| c.is_valid()).count(),
                chunk.interrupted,
            )
        };
        if any_busy {
            return;
        }
        if valid_copies == 0 {
            namespace.chunk_status(chunk_id, ChunkCode::NOT_DONE);
            self.buckets[b][i].operation = ChunkOperation::None;
        } else if interrupted {
            self.emergency_increase_version(registry, namespace, b, i);
        } else {
            namespace.chunk_status(chunk_id, StatusCode::OK);
            let chunk = &mut self.buckets[b][i];
            chunk.operation = ChunkOperation::None;
            chunk.needverincrease = false;
        }
    }

    pub fn got_create_status(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        server: ServerId,
        chunk_id: ChunkId,
        part_type: ChunkPartType,
        status: u8,
    ) {
        self.operation_status(registry, namespace, server, chunk_id, part_type, status);
    }

    pub fn got_setversion_status(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        server: ServerId,
        chunk_id: ChunkId,
        part_type: ChunkPartType,
        status: u8,
    ) {
        self.operation_status(registry, namespace, server, chunk_id, part_type, status);
    }

    pub fn got_truncate_status(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        server: ServerId,
        chunk_id: ChunkId,
        part_type: ChunkPartType,
        status: u8,
    ) {
        self.operation_status(registry, namespace, server, chunk_id, part_type, status);
    }

    /// Duplicated chunks always come up as whole replicas.
    pub fn got_duplicate_status(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        server: ServerId,
        chunk_id: ChunkId,
        status: u8,
    ) {
        self.operation_status(
            registry,
            namespace,
            server,
            chunk_id,
            ChunkPartType::Standard,
            status,
        );
    }

    pub fn got_duptrunc_status(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        server: ServerId,
        chunk_id: ChunkId,
        status: u8,
    ) {
        self.operation_status(
            registry,
            namespace,
            server,
            chunk_id,
            ChunkPartType::Standard,
            status,
        );
    }

    pub fn got_chunkop_status(
        &mut self,
        registry: &mut dyn ChunkserverRegistry,
        namespace: &mut dyn NamespaceListener,
        server: ServerId,
        chunk_id: ChunkId,
        status: u8,
    ) {
        self.operation_status(
            registry,
            namespace,
            server,
            chunk_id,
            ChunkPartType::Standard,
            status,
        );
    }

    /// A deletion finished (or failed); the copy record is dropped either
    /// way, a failed deletion resurfaces through `has_chunk`.
    pub fn got_delete_status(
        &mut self,
        server: ServerId,
        chunk_id: ChunkId,
        part_type: ChunkPartType,
        _status: u8,
    ) {
        let Some((b, i)) = self.find(chunk_id) else {
            return;
        };
        let chunk = &mut self.buckets[b][i];
        let mut removed = false;
        let mut idx = 0;
        while idx < chunk.copies.len() {
            let copy = &chunk.copies[idx];
            if copy.server == server && copy.part_type == part_type {
                if copy.state != CopyState::Del {
                    tracing::warn!(chunk = %chunk_id, server = %server, state = ?copy.state,
                        "got unexpected delete status");
                }
                chunk.copies.remove(idx);
                removed = true;
            } else {
                idx += 1;
            }
        }
        if removed {
            chunk.update_stats(&mut self.stats);
        }
    }

    /// A replication finished. Failures are ignored; the worker will retry
    /// on a later pass.
    pub fn got_replicate_status(
        &mut self,
        server: ServerId,
        chunk_id: ChunkId,
        version: u32,
        part_type: ChunkPartType,
        status: u8,
    ) {
        if status != 0 {
            return;
        }
        let now = self.now();
        let Some((b, i)) = self.find(chunk_id) else {
            return;
        };
        let chunk = &mut self.buckets[b][i];
        if let Some(idx) = chunk.find_copy(server, part_type) {
            tracing::warn!(chunk = %chunk_id, server = %server,
                "replication status from a server already holding the copy");
            if chunk.copies[idx].state == CopyState::Valid && version != chunk.version {
                chunk.copies[idx].version = version;
                chunk.copy_has_wrong_version(idx, &mut self.stats);
            }
            return;
        }
        let state = if chunk.is_locked(now) || version != chunk.version {
            CopyState::Invalid
        } else {
            CopyState::Valid
        };
        chunk.add_copy(server, state, version, part_type, &mut self.stats);
    }
}

fn no_chunk() -> cedarfs_types::Status {
    cedarfs_types::Status::new(ChunkCode::NO_CHUNK)
}
