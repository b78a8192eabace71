use cedarfs_chunk::ChunkPartType;
use cedarfs_types::ServerId;

/// State of one server's copy of a chunk part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    /// Wrong version, or an I/O error was reported; awaiting deletion.
    Invalid,
    /// A deletion request is outstanding.
    Del,
    /// Participating in an in-flight operation.
    Busy,
    /// Healthy, matches the chunk version.
    Valid,
    /// Busy, on a directory being retired.
    TdBusy,
    /// Valid, on a directory being retired; serves reads but does not count
    /// toward regular replication.
    TdValid,
}

/// One chunkserver's holding of one chunk part.
#[derive(Debug, Clone)]
pub struct ChunkCopy {
    pub server: ServerId,
    pub part_type: ChunkPartType,
    pub version: u32,
    pub state: CopyState,
}

impl ChunkCopy {
    pub fn new(server: ServerId, state: CopyState, version: u32, part_type: ChunkPartType) -> Self {
        Self {
            server,
            part_type,
            version,
            state,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, CopyState::Busy | CopyState::TdBusy)
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.state, CopyState::Invalid | CopyState::Del)
    }

    pub fn is_todel(&self) -> bool {
        matches!(self.state, CopyState::TdValid | CopyState::TdBusy)
    }

    pub fn mark_busy(&mut self) {
        self.state = match self.state {
            CopyState::Valid => CopyState::Busy,
            CopyState::TdValid => CopyState::TdBusy,
            other => panic!("mark_busy on copy in state {:?}", other),
        };
    }

    pub fn unmark_busy(&mut self) {
        self.state = match self.state {
            CopyState::Busy => CopyState::Valid,
            CopyState::TdBusy => CopyState::TdValid,
            other => panic!("unmark_busy on copy in state {:?}", other),
        };
    }

    pub fn mark_todel(&mut self) {
        self.state = match self.state {
            CopyState::Valid => CopyState::TdValid,
            CopyState::Busy => CopyState::TdBusy,
            other => panic!("mark_todel on copy in state {:?}", other),
        };
    }

    pub fn unmark_todel(&mut self) {
        self.state = match self.state {
            CopyState::TdValid => CopyState::Valid,
            CopyState::TdBusy => CopyState::Busy,
            other => panic!("unmark_todel on copy in state {:?}", other),
        };
    }
}
