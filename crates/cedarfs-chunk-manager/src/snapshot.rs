//! Metadata snapshot of the chunk index.
//!
//! The format is a compact big-endian record stream: an 8-byte header with
//! the next chunk id, one 20-byte record per chunk
//! (`id:u64, version:u32, lockedto:u32, lockid:u32`), and an all-zero
//! terminator record. Leases already expired at store time are persisted as
//! unlocked. An older record layout omits the lock id; the loader is told
//! which layout to expect.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder};
use cedarfs_types::ChunkId;
use thiserror::Error;

use crate::manager::ChunkManager;

pub const RECORD_SIZE: usize = 20;
pub const LEGACY_RECORD_SIZE: usize = 16;

/// Records buffered per write call.
const STORE_BATCH: usize = 1000;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot truncated mid-record")]
    Truncated,
    #[error("corrupt terminator record")]
    CorruptTerminator,
    #[error("trailing data after terminator")]
    TrailingData,
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), SnapshotError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SnapshotError::Truncated
        } else {
            SnapshotError::Io(e)
        }
    })
}

impl ChunkManager {
    /// Serialize the chunk index.
    pub fn store_snapshot<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let now = self.now();
        let mut header = [0u8; 8];
        BigEndian::write_u64(&mut header, self.next_chunk_id);
        writer.write_all(&header)?;

        let mut batch = Vec::with_capacity(RECORD_SIZE * STORE_BATCH);
        for bucket in &self.buckets {
            for chunk in bucket {
                let (lockedto, lockid) = if chunk.locked_until() < now {
                    (0, 0)
                } else {
                    (chunk.locked_until(), chunk.lockid())
                };
                let mut record = [0u8; RECORD_SIZE];
                BigEndian::write_u64(&mut record[0..8], chunk.id().0);
                BigEndian::write_u32(&mut record[8..12], chunk.version());
                BigEndian::write_u32(&mut record[12..16], lockedto);
                BigEndian::write_u32(&mut record[16..20], lockid);
                batch.extend_from_slice(&record);
                if batch.len() >= RECORD_SIZE * STORE_BATCH {
                    writer.write_all(&batch)?;
                    batch.clear();
                }
            }
        }
        batch.extend_from_slice(&[0u8; RECORD_SIZE]);
        writer.write_all(&batch)
    }

    /// Load a snapshot into this (fresh) manager. `with_lock_ids` selects
    /// between the current 20-byte and the older 16-byte record layout.
    pub fn load_snapshot<R: Read>(
        &mut self,
        reader: &mut R,
        with_lock_ids: bool,
    ) -> Result<(), SnapshotError> {
        let mut header = [0u8; 8];
        read_exact_or_truncated(reader, &mut header)?;
        self.next_chunk_id = BigEndian::read_u64(&header);

        let record_size = if with_lock_ids {
            RECORD_SIZE
        } else {
            LEGACY_RECORD_SIZE
        };
        let mut record = vec![0u8; record_size];
        loop {
            read_exact_or_truncated(reader, &mut record)?;
            let id = BigEndian::read_u64(&record[0..8]);
            if id > 0 {
                let (b, i) = self.insert_new_chunk(ChunkId(id));
                let chunk = &mut self.buckets[b][i];
                chunk.version = BigEndian::read_u32(&record[8..12]);
                chunk.lockedto = BigEndian::read_u32(&record[12..16]);
                if with_lock_ids {
                    chunk.lockid = BigEndian::read_u32(&record[16..20]);
                }
                continue;
            }
            let version = BigEndian::read_u32(&record[8..12]);
            let lockedto = BigEndian::read_u32(&record[12..16]);
            if version != 0 || lockedto != 0 {
                return Err(SnapshotError::CorruptTerminator);
            }
            // Terminator reached; anything after it is corruption.
            let mut probe = [0u8; 1];
            return match reader.read(&mut probe) {
                Ok(0) => Ok(()),
                Ok(_) => Err(SnapshotError::TrailingData),
                Err(e) => Err(SnapshotError::Io(e)),
            };
        }
    }
}
