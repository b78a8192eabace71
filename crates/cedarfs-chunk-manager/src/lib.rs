//! The chunk manager of the cedarfs master server.
//!
//! [`ChunkManager`] is the authoritative in-memory index of every chunk in
//! the cluster. For each chunk it tracks the current version, the effective
//! replication goal derived from the files referencing it, a timed write
//! lease, and the set of chunkservers holding its parts. It orchestrates
//! multi-server operations (create, set-version, duplicate, truncate) and
//! runs a periodic reconciliation pass that deletes surplus or invalid
//! copies, replicates under-goal chunks and levels disk usage, under
//! per-server rate limits.
//!
//! The manager is strictly single-threaded: every entry point runs to
//! completion inside the master's event loop, and chunkserver commands are
//! dispatched fire-and-forget through the [`ChunkserverRegistry`]
//! collaborator, with completions arriving later as `got_*_status` calls.

pub mod chunk;
pub mod clock;
pub mod config;
pub mod copy;
pub mod manager;
pub mod registry;
pub mod snapshot;
pub mod stats;
pub mod topology;
pub mod worker;

pub use chunk::{ChunkEntry, ChunkOperation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChunkManagerConfig, ChunkManagerOptions};
pub use copy::{ChunkCopy, CopyState};
pub use manager::{ChunkLocation, ChunkManager, ModifyResult, RepairResult};
pub use registry::{ChunkserverRegistry, NamespaceListener, NetworkLocation, ServersByUsage, UsageSnapshot};
pub use snapshot::SnapshotError;
pub use stats::{ChunkInfo, ChunkStats};
pub use worker::{JobCounters, LoopInfo};

/// Write leases expire this many wall-clock seconds after the last modify.
pub const LOCK_TIMEOUT: u32 = 120;

/// Chunks first observed from a chunkserver report stay locked this long
/// before they become eligible for deletion.
pub const UNUSED_DELETE_TIMEOUT: u32 = 86400 * 7;
