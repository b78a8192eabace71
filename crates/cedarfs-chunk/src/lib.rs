//! Cluster-wide chunk vocabulary shared by the master and its collaborators.
//!
//! A chunk's redundancy is described by a [`Goal`]: either an ordinary
//! replica count or an XOR erasure-coding level. A chunkserver holds a chunk
//! either as a whole replica or as a single XOR part ([`ChunkPartType`]).
//! The [`PartSetCalculator`] answers, for a set of held parts, how available
//! the chunk data is and which parts must be recovered or removed to meet
//! the goal.

pub mod calculator;
pub mod goal;
pub mod part;
pub mod tables;

pub use calculator::{ChunkAvailability, PartSetCalculator};
pub use goal::Goal;
pub use part::{ChunkPartType, BLOCK_SIZE};
pub use tables::{AvailabilityTable, ReplicationTable, StandardCopyMatrix, COPY_MATRIX_EXPORT_SIZE};
