//! End-to-end scenarios for the namespace-facing operations: chunk
//! creation, the lease protocol, copy-on-write, truncation, and operation
//! completion including the emergency version bump.

mod common;

use cedarfs_chunk::{ChunkPartType, Goal};
use cedarfs_chunk_manager::{ChunkOperation, Clock, CopyState, LOCK_TIMEOUT};
use cedarfs_stubs::RegistryCommand;
use cedarfs_types::{ChunkCode, ChunkId, ServerId, StatusCode};

use common::harness;

#[test]
fn test_fresh_chunk_lifecycle() {
    let mut h = harness(3);
    let result = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(2), 0, false)
        .unwrap();
    assert_eq!(result.chunk_id, ChunkId(1));
    assert!(result.operation_dispatched);
    assert!(result.lockid >= 2);

    let chunk = h.manager.get(ChunkId(1)).unwrap();
    assert_eq!(chunk.version(), 1);
    assert_eq!(chunk.operation(), ChunkOperation::Create);
    assert_eq!(chunk.file_count(), 1);
    assert_eq!(chunk.copies().len(), 2);
    assert!(chunk.copies().iter().all(|c| c.state == CopyState::Busy));

    let commands = h.registry.take_commands();
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|c| matches!(
        c,
        RegistryCommand::Create {
            chunk: ChunkId(1),
            version: 1,
            ..
        }
    )));

    // Both chunkservers acknowledge.
    h.manager.got_create_status(
        &mut h.registry,
        &mut h.namespace,
        ServerId(1),
        ChunkId(1),
        ChunkPartType::Standard,
        0,
    );
    assert!(h.namespace.statuses.is_empty(), "one copy still busy");
    h.manager.got_create_status(
        &mut h.registry,
        &mut h.namespace,
        ServerId(2),
        ChunkId(1),
        ChunkPartType::Standard,
        0,
    );

    let chunk = h.manager.get(ChunkId(1)).unwrap();
    assert_eq!(chunk.operation(), ChunkOperation::None);
    assert!(chunk.copies().iter().all(|c| c.state == CopyState::Valid));
    assert_eq!(h.namespace.last_status(), Some((ChunkId(1), StatusCode::OK)));
}

#[test]
fn test_lease_protocol() {
    let mut h = harness(3);
    let id = h.create_chunk(Goal::ordinary(2));
    h.expire_lease();

    // Unlocked chunk, lockid 0: a fresh nonce is issued.
    let first = h
        .manager
        .multi_modify(&mut h.registry, id, Goal::ordinary(2), 0, false)
        .unwrap();
    assert!(first.lockid >= 2, "nonce must not collide with 0 or 1");
    assert!(!first.operation_dispatched, "no version bump needed");

    // The same lockid keeps working within the lease window.
    let again = h
        .manager
        .multi_modify(&mut h.registry, id, Goal::ordinary(2), first.lockid, false)
        .unwrap();
    assert_eq!(again.lockid, first.lockid);

    // A different lockid is refused while the lease is held.
    let err = h
        .manager
        .multi_modify(&mut h.registry, id, Goal::ordinary(2), first.lockid + 1, false)
        .unwrap_err();
    assert_eq!(err.code(), ChunkCode::WRONG_LOCKID);

    // Somebody else (lockid 0) is refused too.
    let err = h
        .manager
        .multi_modify(&mut h.registry, id, Goal::ordinary(2), 0, false)
        .unwrap_err();
    assert_eq!(err.code(), ChunkCode::LOCKED);

    // Past the expiry the chunk is unlocked and lockid 0 succeeds.
    h.expire_lease();
    assert!(!h.manager.get(id).unwrap().is_locked(h.clock.now()));
    let fresh = h
        .manager
        .multi_modify(&mut h.registry, id, Goal::ordinary(2), 0, false)
        .unwrap();
    assert!(fresh.lockid >= 2);
}

#[test]
fn test_dummy_lockid_for_replayed_operations() {
    let mut h = harness(2);
    let result = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(1), 0, true)
        .unwrap();
    assert_eq!(result.lockid, 1);
}

#[test]
fn test_unlock_and_can_unlock() {
    let mut h = harness(2);
    let id = h.create_chunk(Goal::ordinary(2));
    let lockid = h.manager.get(id).unwrap().lockid();

    assert!(h.manager.can_unlock(id, 0).is_ok(), "force unlock always ok");
    assert!(h.manager.can_unlock(id, lockid).is_ok());
    assert_eq!(
        h.manager.can_unlock(id, lockid + 1).unwrap_err().code(),
        ChunkCode::WRONG_LOCKID
    );

    h.manager.unlock(id).unwrap();
    assert!(!h.manager.get(id).unwrap().is_locked(h.clock.now()));
    // The lock id survives the unlock for idempotent retransmissions.
    assert_eq!(h.manager.get(id).unwrap().lockid(), lockid);
    assert!(h.manager.can_unlock(id, lockid).is_ok());
    assert_eq!(
        h.manager.can_unlock(id, lockid + 1).unwrap_err().code(),
        ChunkCode::NOT_LOCKED
    );
}

#[test]
fn test_modify_shared_chunk_duplicates() {
    let mut h = harness(2);
    let id = h.create_chunk(Goal::ordinary(2));
    // A second file starts referencing the chunk.
    h.manager.add_file(id, Goal::ordinary(2)).unwrap();
    h.expire_lease();

    let result = h
        .manager
        .multi_modify(&mut h.registry, id, Goal::ordinary(2), 0, false)
        .unwrap();
    assert_ne!(result.chunk_id, id);
    assert!(result.operation_dispatched);

    let old = h.manager.get(id).unwrap();
    assert_eq!(old.file_count(), 1);
    let new = h.manager.get(result.chunk_id).unwrap();
    assert_eq!(new.file_count(), 1);
    assert_eq!(new.version(), 1);
    assert_eq!(new.operation(), ChunkOperation::Duplicate);
    assert_eq!(new.copies().len(), 2);
    assert!(new.copies().iter().all(|c| c.state == CopyState::Busy));

    let commands = h.registry.take_commands();
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|c| matches!(
        c,
        RegistryCommand::Duplicate {
            source_chunk, source_version: 1, ..
        } if *source_chunk == id
    )));
}

#[test]
fn test_modify_version_bump_when_required() {
    let mut h = harness(2);
    // A chunk discovered from chunkserver reports wants a version increase
    // before the next write.
    h.manager
        .has_chunk(ServerId(1), ChunkId(7), 7, ChunkPartType::Standard);
    h.manager
        .has_chunk(ServerId(2), ChunkId(7), 7, ChunkPartType::Standard);
    h.manager.add_file(ChunkId(7), Goal::ordinary(2)).unwrap();
    h.manager.unlock(ChunkId(7)).unwrap();

    let result = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(7), Goal::ordinary(2), 0, false)
        .unwrap();
    assert!(result.operation_dispatched);

    let chunk = h.manager.get(ChunkId(7)).unwrap();
    assert_eq!(chunk.version(), 8);
    assert_eq!(chunk.operation(), ChunkOperation::SetVersion);
    let commands = h.registry.take_commands();
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|c| matches!(
        c,
        RegistryCommand::SetVersion {
            new_version: 8,
            old_version: 7,
            ..
        }
    )));

    // A second modify while the operation is in flight is refused.
    let err = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(7), Goal::ordinary(2), result.lockid, false)
        .unwrap_err();
    assert_eq!(err.code(), ChunkCode::CHUNK_BUSY);
}

#[test]
fn test_disconnect_during_operation_triggers_emergency_bump() {
    let mut h = harness(2);
    h.manager
        .has_chunk(ServerId(1), ChunkId(7), 7, ChunkPartType::Standard);
    h.manager
        .has_chunk(ServerId(2), ChunkId(7), 7, ChunkPartType::Standard);
    h.manager.add_file(ChunkId(7), Goal::ordinary(2)).unwrap();
    h.manager.unlock(ChunkId(7)).unwrap();
    h.manager
        .multi_modify(&mut h.registry, ChunkId(7), Goal::ordinary(2), 0, false)
        .unwrap();
    h.registry.take_commands();

    // One participant drops mid-operation.
    h.manager
        .server_disconnected(&mut h.registry, &mut h.namespace, ServerId(1));
    let chunk = h.manager.get(ChunkId(7)).unwrap();
    assert_eq!(chunk.copies().len(), 1);
    assert_eq!(chunk.operation(), ChunkOperation::SetVersion);
    assert!(h.namespace.statuses.is_empty(), "survivor still busy");

    // The survivor acknowledges: instead of reporting success, the manager
    // bumps the version once more to fence the lost copy.
    h.manager.got_setversion_status(
        &mut h.registry,
        &mut h.namespace,
        ServerId(2),
        ChunkId(7),
        ChunkPartType::Standard,
        0,
    );
    assert!(h.namespace.statuses.is_empty(), "no success callback yet");
    assert_eq!(h.namespace.version_increments, vec![ChunkId(7)]);
    let chunk = h.manager.get(ChunkId(7)).unwrap();
    assert_eq!(chunk.version(), 9);
    assert_eq!(chunk.operation(), ChunkOperation::SetVersion);
    let commands = h.registry.take_commands();
    assert!(matches!(
        commands.as_slice(),
        [RegistryCommand::SetVersion {
            server: ServerId(2),
            new_version: 9,
            old_version: 8,
            ..
        }]
    ));

    // The bump completes normally.
    h.manager.got_setversion_status(
        &mut h.registry,
        &mut h.namespace,
        ServerId(2),
        ChunkId(7),
        ChunkPartType::Standard,
        0,
    );
    assert_eq!(h.namespace.last_status(), Some((ChunkId(7), StatusCode::OK)));
    assert_eq!(h.manager.get(ChunkId(7)).unwrap().operation(), ChunkOperation::None);
}

#[test]
fn test_failed_creation_with_no_survivor_reports_not_done() {
    let mut h = harness(1);
    let result = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(1), 0, false)
        .unwrap();
    h.manager.got_create_status(
        &mut h.registry,
        &mut h.namespace,
        ServerId(1),
        result.chunk_id,
        ChunkPartType::Standard,
        1,
    );
    assert_eq!(
        h.namespace.last_status(),
        Some((result.chunk_id, ChunkCode::NOT_DONE))
    );
    assert_eq!(
        h.manager.get(result.chunk_id).unwrap().operation(),
        ChunkOperation::None
    );
}

#[test]
fn test_partial_creation_failure_bumps_version() {
    let mut h = harness(2);
    let result = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(2), 0, false)
        .unwrap();
    let id = result.chunk_id;
    h.manager.got_create_status(
        &mut h.registry,
        &mut h.namespace,
        ServerId(1),
        id,
        ChunkPartType::Standard,
        0,
    );
    h.manager.got_create_status(
        &mut h.registry,
        &mut h.namespace,
        ServerId(2),
        id,
        ChunkPartType::Standard,
        1,
    );
    // The failed copy is fenced by an emergency version bump on the healthy
    // one, not reported as success.
    assert!(h.namespace.statuses.is_empty());
    assert_eq!(h.namespace.version_increments, vec![id]);
    let chunk = h.manager.get(id).unwrap();
    assert_eq!(chunk.version(), 2);
    let invalid = chunk
        .copies()
        .iter()
        .find(|c| c.server == ServerId(2))
        .unwrap();
    assert_eq!(invalid.state, CopyState::Invalid);
}

#[test]
fn test_no_chunkservers_and_no_space() {
    let mut h = harness(0);
    let err = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(2), 0, false)
        .unwrap_err();
    assert_eq!(err.code(), ChunkCode::NO_CHUNKSERVERS);

    // With usable servers present but refusing placements, the answer
    // within the startup window is still "no chunkservers"...
    let mut h = harness(2);
    h.registry.refuse_new_chunks = true;
    let err = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(2), 0, false)
        .unwrap_err();
    assert_eq!(err.code(), ChunkCode::NO_CHUNKSERVERS);

    // ...and "no space" once the process has been up for a while.
    h.clock.advance(601);
    let err = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(2), 0, false)
        .unwrap_err();
    assert_eq!(err.code(), ChunkCode::NO_SPACE);
}

#[test]
fn test_modify_lost_chunk_is_refused() {
    let mut h = harness(2);
    let id = h.create_chunk(Goal::ordinary(2));
    h.manager.damaged(ServerId(1), id);
    h.manager.damaged(ServerId(2), id);
    h.expire_lease();
    let err = h
        .manager
        .multi_modify(&mut h.registry, id, Goal::ordinary(2), 0, false)
        .unwrap_err();
    assert_eq!(err.code(), ChunkCode::CHUNK_LOST);
}

#[test]
fn test_truncate_in_place() {
    let mut h = harness(2);
    let id = h.create_chunk(Goal::ordinary(2));
    h.expire_lease();

    let result = h
        .manager
        .multi_truncate(&mut h.registry, id, 4096, Goal::ordinary(2), false)
        .unwrap();
    assert_eq!(result, id);
    let chunk = h.manager.get(id).unwrap();
    assert_eq!(chunk.operation(), ChunkOperation::Truncate);
    assert_eq!(chunk.version(), 2);
    assert_eq!(chunk.locked_until(), h.clock.now() + LOCK_TIMEOUT);
    let commands = h.registry.take_commands();
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|c| matches!(
        c,
        RegistryCommand::Truncate {
            part_length: 4096,
            new_version: 2,
            old_version: 1,
            ..
        }
    )));
}

#[test]
fn test_truncate_refused_while_leased() {
    let mut h = harness(2);
    let id = h.create_chunk(Goal::ordinary(2));
    let err = h
        .manager
        .multi_truncate(&mut h.registry, id, 4096, Goal::ordinary(2), false)
        .unwrap_err();
    assert_eq!(err.code(), ChunkCode::LOCKED);
}

#[test]
fn test_truncate_shared_chunk_duplicates() {
    let mut h = harness(2);
    let id = h.create_chunk(Goal::ordinary(2));
    h.manager.add_file(id, Goal::ordinary(2)).unwrap();
    h.expire_lease();

    let new_id = h
        .manager
        .multi_truncate(&mut h.registry, id, 8192, Goal::ordinary(2), false)
        .unwrap();
    assert_ne!(new_id, id);
    let new = h.manager.get(new_id).unwrap();
    assert_eq!(new.operation(), ChunkOperation::DupTrunc);
    assert_eq!(new.file_count(), 1);
    assert_eq!(h.manager.get(id).unwrap().file_count(), 1);
    let commands = h.registry.take_commands();
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|c| matches!(
        c,
        RegistryCommand::DupTrunc { length: 8192, .. }
    )));
}

#[test]
fn test_truncate_xor_parity_down_unaligned_invalidates_parity() {
    let mut h = harness(3);
    let id = h.create_chunk(Goal::xor(2));
    h.expire_lease();

    // 100000 bytes is not a multiple of the level-2 stripe.
    h.manager
        .multi_truncate(&mut h.registry, id, 100_000, Goal::xor(2), false)
        .unwrap();
    let chunk = h.manager.get(id).unwrap();
    let parity = chunk
        .copies()
        .iter()
        .find(|c| c.part_type.is_parity())
        .unwrap();
    assert_eq!(parity.state, CopyState::Invalid);
    let commands = h.registry.take_commands();
    // Only the two data parts receive truncate commands.
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|c| matches!(
        c,
        RegistryCommand::Truncate { part_type, .. } if !part_type.is_parity()
    )));
}

#[test]
fn test_replicate_status_adds_copy() {
    let mut h = harness(3);
    let id = h.create_chunk(Goal::ordinary(2));
    h.manager.unlock(id).unwrap();

    // A new server reports a finished replication at the right version.
    h.manager
        .got_replicate_status(ServerId(3), id, 1, ChunkPartType::Standard, 0);
    let chunk = h.manager.get(id).unwrap();
    assert_eq!(chunk.copies().len(), 3);
    assert!(chunk
        .copies()
        .iter()
        .all(|c| c.state == CopyState::Valid));

    // A wrong-version replication is recorded as invalid.
    h.manager.lost(ServerId(3), id);
    h.manager
        .got_replicate_status(ServerId(3), id, 9, ChunkPartType::Standard, 0);
    let chunk = h.manager.get(id).unwrap();
    let s3 = chunk
        .copies()
        .iter()
        .find(|c| c.server == ServerId(3))
        .unwrap();
    assert_eq!(s3.state, CopyState::Invalid);

    // Failures are ignored entirely.
    h.manager.lost(ServerId(3), id);
    h.manager
        .got_replicate_status(ServerId(3), id, 1, ChunkPartType::Standard, 1);
    assert_eq!(h.manager.get(id).unwrap().copies().len(), 2);
}

#[test]
fn test_versions_and_locations_sorted_by_distance() {
    let mut h = harness(3);
    let id = h.create_chunk(Goal::ordinary(3));
    let client_ip = h.registry.servers[1].location.ip; // same host as cs2

    let (version, locations) = h
        .manager
        .get_versions_and_locations(&h.registry, id, client_ip, 10)
        .unwrap();
    assert_eq!(version, 1);
    assert_eq!(locations.len(), 3);
    assert_eq!(locations[0].location.ip, client_ip, "closest copy first");

    // The copy cap is honoured.
    let (_, capped) = h
        .manager
        .get_versions_and_locations(&h.registry, id, client_ip, 2)
        .unwrap();
    assert_eq!(capped.len(), 2);
}

#[test]
fn test_disconnect_with_no_survivors_reports_not_done() {
    let mut h = harness(1);
    let result = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(1), 0, false)
        .unwrap();
    h.manager
        .server_disconnected(&mut h.registry, &mut h.namespace, ServerId(1));
    assert_eq!(
        h.namespace.last_status(),
        Some((result.chunk_id, ChunkCode::NOT_DONE))
    );
    let chunk = h.manager.get(result.chunk_id).unwrap();
    assert_eq!(chunk.operation(), ChunkOperation::None);
    assert!(chunk.copies().is_empty());
}

#[test]
fn test_chunk_creation_starts_at_one() {
    let mut h = harness(1);
    let result = h
        .manager
        .multi_modify(&mut h.registry, ChunkId(0), Goal::ordinary(1), 0, false)
        .unwrap();
    assert_eq!(result.chunk_id, ChunkId(1));
    assert_eq!(h.manager.chunk_count(), 1);
    let later = h.clock.now();
    assert_eq!(h.manager.get(ChunkId(1)).unwrap().locked_until(), later + LOCK_TIMEOUT);
}
