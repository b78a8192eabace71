#![allow(dead_code)]

use std::rc::Rc;

use cedarfs_chunk::Goal;
use cedarfs_chunk_manager::{ChunkManager, ChunkManagerOptions, ManualClock};
use cedarfs_stubs::{RecordingNamespace, RecordingRegistry};
use cedarfs_types::ChunkId;

pub const START: u32 = 1_000_000;

/// A manager wired to recording collaborators and a manual clock.
pub struct Harness {
    pub manager: ChunkManager,
    pub registry: RecordingRegistry,
    pub namespace: RecordingNamespace,
    pub clock: Rc<ManualClock>,
}

/// Options tuned for tests: no startup grace and a full cursor lap per
/// reconciliation tick.
pub fn test_options() -> ChunkManagerOptions {
    ChunkManagerOptions {
        replications_delay_init: 0,
        chunks_loop_time: Some(1),
        ..Default::default()
    }
}

pub fn harness_with(opts: &ChunkManagerOptions, servers: u32) -> Harness {
    cedarfs_logging::init_for_tests();
    let clock = Rc::new(ManualClock::new(START));
    let mut manager = ChunkManager::with_hash_size(opts, clock.clone(), 256)
        .unwrap()
        .with_seeded_rng(42);
    let mut registry = RecordingRegistry::new();
    for s in 1..=servers {
        registry.add_server(s);
    }
    // An empty priming tick lets the manager take note of the connected
    // servers (which pushes the replication grace to "now"), then step past
    // that boundary.
    manager.reconciliation_tick(&mut registry);
    clock.advance(1);
    Harness {
        manager,
        registry,
        namespace: RecordingNamespace::new(),
        clock,
    }
}

pub fn harness(servers: u32) -> Harness {
    harness_with(&test_options(), servers)
}

impl Harness {
    /// Create a chunk through the modify path and complete the creates, so
    /// the chunk sits in a clean state with `servers` valid copies.
    pub fn create_chunk(&mut self, goal: Goal) -> ChunkId {
        let result = self
            .manager
            .multi_modify(&mut self.registry, ChunkId(0), goal, 0, false)
            .expect("chunk creation failed");
        let copies: Vec<_> = self
            .manager
            .get(result.chunk_id)
            .expect("chunk must exist")
            .copies()
            .iter()
            .map(|c| (c.server, c.part_type))
            .collect();
        for (server, part_type) in copies {
            self.manager.got_create_status(
                &mut self.registry,
                &mut self.namespace,
                server,
                result.chunk_id,
                part_type,
                0,
            );
        }
        self.registry.take_commands();
        self.namespace.take_statuses();
        result.chunk_id
    }

    /// Let the write lease expire.
    pub fn expire_lease(&self) {
        self.clock.advance(121);
    }
}
