//! Test doubles for the chunk manager's collaborators.
//!
//! [`RecordingRegistry`] stands in for the chunkserver registry: it answers
//! the query methods from a scripted server table and records every command
//! the manager dispatches. [`RecordingNamespace`] collects the status and
//! version-increment callbacks owed to the namespace layer. Both are plain
//! recording doubles; the manager is single-threaded, so no synchronisation
//! is needed.

pub mod namespace_stub;
pub mod registry_stub;

pub use namespace_stub::RecordingNamespace;
pub use registry_stub::{RecordingRegistry, RegistryCommand, StubServer};
