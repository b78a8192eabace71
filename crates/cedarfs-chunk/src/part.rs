use std::fmt;

use serde::{Deserialize, Serialize};

use crate::goal::Goal;

/// Chunks are striped in blocks of this size for XOR encoding.
pub const BLOCK_SIZE: u32 = 65536;

/// The shape of one chunkserver's holding of a chunk.
///
/// Either a whole replica, or a single part of an XOR scheme: data part
/// `part` (1-based) of `level` data parts, or the parity part.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChunkPartType {
    Standard,
    XorData { level: u8, part: u8 },
    XorParity { level: u8 },
}

impl ChunkPartType {
    pub fn is_standard(self) -> bool {
        matches!(self, ChunkPartType::Standard)
    }

    pub fn is_xor(self) -> bool {
        !self.is_standard()
    }

    pub fn is_parity(self) -> bool {
        matches!(self, ChunkPartType::XorParity { .. })
    }

    /// The XOR level, if this is an XOR part.
    pub fn xor_level(self) -> Option<u8> {
        match self {
            ChunkPartType::Standard => None,
            ChunkPartType::XorData { level, .. } | ChunkPartType::XorParity { level } => {
                Some(level)
            }
        }
    }

    /// All part types required by a goal: one entry per XOR part for XOR
    /// goals, a single `Standard` for ordinary goals (which want `goal`
    /// interchangeable copies of it).
    pub fn required_for(goal: Goal) -> Vec<ChunkPartType> {
        match goal.xor_level() {
            Some(level) => {
                let mut parts = Vec::with_capacity(level as usize + 1);
                for part in 1..=level {
                    parts.push(ChunkPartType::XorData { level, part });
                }
                parts.push(ChunkPartType::XorParity { level });
                parts
            }
            None => vec![ChunkPartType::Standard],
        }
    }

    /// Byte length of this part for a chunk of `chunk_length` bytes.
    ///
    /// Blocks are assigned round-robin to data parts 1..=level; the parity
    /// part has one block per stripe, so it is exactly as long as data
    /// part 1.
    pub fn part_length(self, chunk_length: u32) -> u32 {
        match self {
            ChunkPartType::Standard => chunk_length,
            ChunkPartType::XorData { level, part } => xor_data_length(chunk_length, level, part),
            ChunkPartType::XorParity { level } => xor_data_length(chunk_length, level, 1),
        }
    }
}

fn xor_data_length(chunk_length: u32, level: u8, part: u8) -> u32 {
    let level = level as u32;
    let part = part as u32;
    let full_blocks = chunk_length / BLOCK_SIZE;
    let remainder = chunk_length % BLOCK_SIZE;

    let mut bytes = (full_blocks / level) * BLOCK_SIZE;
    if part <= full_blocks % level {
        bytes += BLOCK_SIZE;
    }
    // The trailing partial block lands on the next part in rotation.
    if remainder > 0 && full_blocks % level + 1 == part {
        bytes += remainder;
    }
    bytes
}

impl fmt::Debug for ChunkPartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkPartType::Standard => write!(f, "std"),
            ChunkPartType::XorData { level, part } => write!(f, "xor{}/d{}", level, part),
            ChunkPartType::XorParity { level } => write!(f, "xor{}/p", level),
        }
    }
}

impl fmt::Display for ChunkPartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
