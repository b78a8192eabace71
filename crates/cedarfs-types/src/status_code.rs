/// Numeric status code carried by [`crate::Status`].
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const INVALID_FORMAT: status_code_t = 5;
    pub const IO_ERROR: status_code_t = 6;
    pub const FOUND_BUG: status_code_t = 998;
    pub const UNKNOWN: status_code_t = 999;
}

/// Chunk manager status codes (1xxx).
///
/// These are the errors surfaced to the namespace layer by chunk
/// operations; see the chunk manager crate for the operations themselves.
pub mod ChunkCode {
    use super::status_code_t;

    /// Unknown chunk id.
    pub const NO_CHUNK: status_code_t = 1000;
    /// No valid copy exists; also used for structural inconsistencies
    /// between the namespace and the chunk index.
    pub const CHUNK_LOST: status_code_t = 1001;
    /// Another multi-server operation is already in flight.
    pub const CHUNK_BUSY: status_code_t = 1002;
    /// A write lease is held by someone else.
    pub const LOCKED: status_code_t = 1003;
    /// Unlock attempted but no lease exists.
    pub const NOT_LOCKED: status_code_t = 1004;
    /// Unlock or modify with a non-matching lock id.
    pub const WRONG_LOCKID: status_code_t = 1005;
    /// The registry has chunkservers but none with free space.
    pub const NO_SPACE: status_code_t = 1006;
    /// The registry has no chunkservers at all.
    pub const NO_CHUNKSERVERS: status_code_t = 1007;
    /// The operation finished with no surviving valid copy.
    pub const NOT_DONE: status_code_t = 1008;
}

/// Map a status code to its symbolic name.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::INVALID_FORMAT => "InvalidFormat",
        StatusCode::IO_ERROR => "IoError",
        StatusCode::FOUND_BUG => "FoundBug",
        StatusCode::UNKNOWN => "Unknown",
        ChunkCode::NO_CHUNK => "Chunk::NoChunk",
        ChunkCode::CHUNK_LOST => "Chunk::ChunkLost",
        ChunkCode::CHUNK_BUSY => "Chunk::ChunkBusy",
        ChunkCode::LOCKED => "Chunk::Locked",
        ChunkCode::NOT_LOCKED => "Chunk::NotLocked",
        ChunkCode::WRONG_LOCKID => "Chunk::WrongLockId",
        ChunkCode::NO_SPACE => "Chunk::NoSpace",
        ChunkCode::NO_CHUNKSERVERS => "Chunk::NoChunkservers",
        ChunkCode::NOT_DONE => "Chunk::NotDone",
        _ => "Unrecognized",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_names() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(ChunkCode::NO_CHUNK), "Chunk::NoChunk");
        assert_eq!(to_string(ChunkCode::WRONG_LOCKID), "Chunk::WrongLockId");
        assert_eq!(to_string(12345), "Unrecognized");
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            ChunkCode::NO_CHUNK,
            ChunkCode::CHUNK_LOST,
            ChunkCode::CHUNK_BUSY,
            ChunkCode::LOCKED,
            ChunkCode::NOT_LOCKED,
            ChunkCode::WRONG_LOCKID,
            ChunkCode::NO_SPACE,
            ChunkCode::NO_CHUNKSERVERS,
            ChunkCode::NOT_DONE,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
