//! Collaborator interfaces of the chunk manager.
//!
//! The manager never talks to the network itself. Commands to chunkservers
//! go through [`ChunkserverRegistry`] and are fire-and-forget: completions
//! come back later through the manager's `got_*_status` entry points.
//! Operation outcomes owed to the namespace layer are delivered through
//! [`NamespaceListener`].

use cedarfs_chunk::{ChunkPartType, Goal};
use cedarfs_types::{status_code_t, ChunkId, ServerId};

/// Pack a chunkserver software version as `major * 65536 + minor * 256 + patch`.
pub const fn pack_server_version(major: u32, minor: u32, patch: u32) -> u32 {
    major * 0x10000 + minor * 0x100 + patch
}

/// The first chunkserver release able to serve multi-source replication,
/// including XOR part recovery. Older servers only accept the legacy
/// single-source whole-copy replication.
pub const FIRST_MULTI_SOURCE_VERSION: u32 = pack_server_version(1, 6, 28);

/// Network address of a chunkserver, for client redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkLocation {
    pub ip: u32,
    pub port: u16,
}

/// Disk-usage summary over the registered chunkservers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSnapshot {
    pub min_usage: f64,
    pub max_usage: f64,
    pub usable_servers: u16,
    pub total_servers: u16,
}

/// Servers sorted by disk usage (least loaded first), with the counts of
/// servers below the low-usage and above the high-usage watermarks.
#[derive(Debug, Clone, Default)]
pub struct ServersByUsage {
    pub servers: Vec<ServerId>,
    pub below_min: u32,
    pub above_max: u32,
}

/// The chunkserver registry as seen by the chunk manager.
///
/// `send_*` methods dispatch a command asynchronously and return
/// immediately; the per-server in-flight counters are owned by the registry
/// and read by the reconciliation worker as monotone budgets.
pub trait ChunkserverRegistry {
    /// Pick destination servers for every part of a brand new chunk.
    /// Empty means no chunkserver can take the chunk.
    fn servers_for_new_chunk(&mut self, goal: Goal) -> Vec<(ServerId, ChunkPartType)>;

    /// Servers whose write-replication in-flight count is below the limit.
    fn servers_with_replication_slots(&self, max_write_repl: u32) -> Vec<ServerId>;

    /// All usable servers ordered by disk usage, bucketing servers within
    /// `tolerance` of each other.
    fn servers_ordered_by_usage(&self, tolerance: f64) -> ServersByUsage;

    fn usage_difference(&self) -> UsageSnapshot;

    fn server_version(&self, server: ServerId) -> u32;

    fn server_location(&self, server: ServerId) -> Option<NetworkLocation>;

    /// Human-readable server name for log messages.
    fn server_label(&self, server: ServerId) -> String;

    fn deletion_counter(&self, server: ServerId) -> u32;

    fn replication_read_counter(&self, server: ServerId) -> u32;

    fn replication_write_counter(&self, server: ServerId) -> u32;

    fn send_create_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        part_type: ChunkPartType,
        version: u32,
    );

    fn send_set_chunk_version(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        new_version: u32,
        old_version: u32,
        part_type: ChunkPartType,
    );

    fn send_duplicate_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source_chunk: ChunkId,
        source_version: u32,
    );

    fn send_truncate_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        part_type: ChunkPartType,
        part_length: u32,
        new_version: u32,
        old_version: u32,
    );

    fn send_duptrunc_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source_chunk: ChunkId,
        source_version: u32,
        length: u32,
    );

    fn send_delete_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        part_type: ChunkPartType,
    );

    /// Legacy replication: copy a whole standard replica from one source.
    fn send_replicate_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source: ServerId,
    );

    /// Multi-source replication: rebuild `part_type` from the given servers,
    /// which together hold `available_parts`.
    fn send_multi_source_replicate_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        part_type: ChunkPartType,
        sources: &[ServerId],
        available_parts: &[ChunkPartType],
    );
}

/// Callbacks owed to the namespace layer.
pub trait NamespaceListener {
    /// Final status of a multi-server chunk operation.
    fn chunk_status(&mut self, chunk: ChunkId, status: status_code_t);

    /// A version increment that must be recorded in the metadata log.
    fn version_increased(&mut self, chunk: ChunkId);
}
