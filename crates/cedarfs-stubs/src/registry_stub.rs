use cedarfs_chunk::{ChunkPartType, Goal};
use cedarfs_chunk_manager::registry::{
    pack_server_version, ChunkserverRegistry, NetworkLocation, ServersByUsage, UsageSnapshot,
};
use cedarfs_types::{ChunkId, ServerId};

/// One scripted chunkserver.
#[derive(Debug, Clone)]
pub struct StubServer {
    pub id: ServerId,
    pub version: u32,
    pub location: NetworkLocation,
    /// Disk usage fraction in [0, 1].
    pub usage: f64,
    pub deletions_in_flight: u32,
    pub reads_in_flight: u32,
    pub writes_in_flight: u32,
}

/// A command the manager dispatched through the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCommand {
    Create {
        server: ServerId,
        chunk: ChunkId,
        part_type: ChunkPartType,
        version: u32,
    },
    SetVersion {
        server: ServerId,
        chunk: ChunkId,
        new_version: u32,
        old_version: u32,
        part_type: ChunkPartType,
    },
    Duplicate {
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source_chunk: ChunkId,
        source_version: u32,
    },
    Truncate {
        server: ServerId,
        chunk: ChunkId,
        part_type: ChunkPartType,
        part_length: u32,
        new_version: u32,
        old_version: u32,
    },
    DupTrunc {
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source_chunk: ChunkId,
        source_version: u32,
        length: u32,
    },
    Delete {
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        part_type: ChunkPartType,
    },
    Replicate {
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source: ServerId,
    },
    MultiSourceReplicate {
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        part_type: ChunkPartType,
        sources: Vec<ServerId>,
        available_parts: Vec<ChunkPartType>,
    },
}

/// A scripted, recording chunkserver registry.
///
/// Dispatching a command also bumps the matching in-flight counter on the
/// affected servers, so the manager's rate limiting can be observed without
/// extra scripting.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    pub servers: Vec<StubServer>,
    pub commands: Vec<RegistryCommand>,
    /// Answer placement queries for new chunks with an empty set, as a
    /// registry with no viable destinations would.
    pub refuse_new_chunks: bool,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server with sane defaults: a current software version, half
    /// disk usage and an address derived from the id.
    pub fn add_server(&mut self, id: u32) -> &mut StubServer {
        self.servers.push(StubServer {
            id: ServerId(id),
            version: pack_server_version(3, 0, 0),
            location: NetworkLocation {
                ip: u32::from_be_bytes([10, 0, 0, id as u8]),
                port: 9422,
            },
            usage: 0.5,
            deletions_in_flight: 0,
            reads_in_flight: 0,
            writes_in_flight: 0,
        });
        self.servers.last_mut().expect("just pushed")
    }

    pub fn server_mut(&mut self, id: u32) -> &mut StubServer {
        self.servers
            .iter_mut()
            .find(|s| s.id == ServerId(id))
            .expect("unknown stub server")
    }

    fn server(&self, id: ServerId) -> Option<&StubServer> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Drain the recorded commands.
    pub fn take_commands(&mut self) -> Vec<RegistryCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Zero every in-flight counter, as if all dispatched work completed.
    pub fn settle(&mut self) {
        for server in &mut self.servers {
            server.deletions_in_flight = 0;
            server.reads_in_flight = 0;
            server.writes_in_flight = 0;
        }
    }

    fn mean_usage(&self) -> f64 {
        if self.servers.is_empty() {
            return 0.0;
        }
        self.servers.iter().map(|s| s.usage).sum::<f64>() / self.servers.len() as f64
    }
}

impl ChunkserverRegistry for RecordingRegistry {
    fn servers_for_new_chunk(&mut self, goal: Goal) -> Vec<(ServerId, ChunkPartType)> {
        if self.servers.is_empty() || self.refuse_new_chunks {
            return Vec::new();
        }
        let parts = ChunkPartType::required_for(goal);
        if goal.is_ordinary() {
            // One whole replica per distinct server.
            let wanted = goal.as_u8() as usize;
            self.servers
                .iter()
                .take(wanted)
                .map(|s| (s.id, ChunkPartType::Standard))
                .collect()
        } else {
            // XOR parts round-robin over the servers.
            parts
                .into_iter()
                .enumerate()
                .map(|(k, part)| (self.servers[k % self.servers.len()].id, part))
                .collect()
        }
    }

    fn servers_with_replication_slots(&self, max_write_repl: u32) -> Vec<ServerId> {
        self.servers
            .iter()
            .filter(|s| s.writes_in_flight < max_write_repl)
            .map(|s| s.id)
            .collect()
    }

    fn servers_ordered_by_usage(&self, tolerance: f64) -> ServersByUsage {
        let mut sorted: Vec<&StubServer> = self.servers.iter().collect();
        sorted.sort_by(|a, b| a.usage.total_cmp(&b.usage));
        let mean = self.mean_usage();
        ServersByUsage {
            below_min: sorted.iter().filter(|s| s.usage < mean - tolerance).count() as u32,
            above_max: sorted.iter().filter(|s| s.usage > mean + tolerance).count() as u32,
            servers: sorted.into_iter().map(|s| s.id).collect(),
        }
    }

    fn usage_difference(&self) -> UsageSnapshot {
        let min_usage = self
            .servers
            .iter()
            .map(|s| s.usage)
            .fold(f64::INFINITY, f64::min);
        let max_usage = self
            .servers
            .iter()
            .map(|s| s.usage)
            .fold(f64::NEG_INFINITY, f64::max);
        UsageSnapshot {
            min_usage,
            max_usage,
            usable_servers: self.servers.len() as u16,
            total_servers: self.servers.len() as u16,
        }
    }

    fn server_version(&self, server: ServerId) -> u32 {
        self.server(server).map_or(0, |s| s.version)
    }

    fn server_location(&self, server: ServerId) -> Option<NetworkLocation> {
        self.server(server).map(|s| s.location)
    }

    fn server_label(&self, server: ServerId) -> String {
        format!("cs{}", server)
    }

    fn deletion_counter(&self, server: ServerId) -> u32 {
        self.server(server).map_or(0, |s| s.deletions_in_flight)
    }

    fn replication_read_counter(&self, server: ServerId) -> u32 {
        self.server(server).map_or(0, |s| s.reads_in_flight)
    }

    fn replication_write_counter(&self, server: ServerId) -> u32 {
        self.server(server).map_or(0, |s| s.writes_in_flight)
    }

    fn send_create_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        part_type: ChunkPartType,
        version: u32,
    ) {
        self.commands.push(RegistryCommand::Create {
            server,
            chunk,
            part_type,
            version,
        });
    }

    fn send_set_chunk_version(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        new_version: u32,
        old_version: u32,
        part_type: ChunkPartType,
    ) {
        self.commands.push(RegistryCommand::SetVersion {
            server,
            chunk,
            new_version,
            old_version,
            part_type,
        });
    }

    fn send_duplicate_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source_chunk: ChunkId,
        source_version: u32,
    ) {
        self.commands.push(RegistryCommand::Duplicate {
            server,
            chunk,
            version,
            source_chunk,
            source_version,
        });
    }

    fn send_truncate_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        part_type: ChunkPartType,
        part_length: u32,
        new_version: u32,
        old_version: u32,
    ) {
        self.commands.push(RegistryCommand::Truncate {
            server,
            chunk,
            part_type,
            part_length,
            new_version,
            old_version,
        });
    }

    fn send_duptrunc_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source_chunk: ChunkId,
        source_version: u32,
        length: u32,
    ) {
        self.commands.push(RegistryCommand::DupTrunc {
            server,
            chunk,
            version,
            source_chunk,
            source_version,
            length,
        });
    }

    fn send_delete_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        part_type: ChunkPartType,
    ) {
        if let Some(s) = self.servers.iter_mut().find(|s| s.id == server) {
            s.deletions_in_flight += 1;
        }
        self.commands.push(RegistryCommand::Delete {
            server,
            chunk,
            version,
            part_type,
        });
    }

    fn send_replicate_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        source: ServerId,
    ) {
        if let Some(s) = self.servers.iter_mut().find(|s| s.id == server) {
            s.writes_in_flight += 1;
        }
        if let Some(s) = self.servers.iter_mut().find(|s| s.id == source) {
            s.reads_in_flight += 1;
        }
        self.commands.push(RegistryCommand::Replicate {
            server,
            chunk,
            version,
            source,
        });
    }

    fn send_multi_source_replicate_chunk(
        &mut self,
        server: ServerId,
        chunk: ChunkId,
        version: u32,
        part_type: ChunkPartType,
        sources: &[ServerId],
        available_parts: &[ChunkPartType],
    ) {
        if let Some(s) = self.servers.iter_mut().find(|s| s.id == server) {
            s.writes_in_flight += 1;
        }
        for source in sources {
            if let Some(s) = self.servers.iter_mut().find(|s| s.id == *source) {
                s.reads_in_flight += 1;
            }
        }
        self.commands.push(RegistryCommand::MultiSourceReplicate {
            server,
            chunk,
            version,
            part_type,
            sources: sources.to_vec(),
            available_parts: available_parts.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servers_for_new_ordinary_chunk() {
        let mut reg = RecordingRegistry::new();
        reg.add_server(1);
        reg.add_server(2);
        reg.add_server(3);
        let picked = reg.servers_for_new_chunk(Goal::ordinary(2));
        assert_eq!(picked.len(), 2);
        assert!(picked.iter().all(|(_, p)| p.is_standard()));
        assert_ne!(picked[0].0, picked[1].0);
    }

    #[test]
    fn test_servers_for_new_xor_chunk() {
        let mut reg = RecordingRegistry::new();
        reg.add_server(1);
        reg.add_server(2);
        let picked = reg.servers_for_new_chunk(Goal::xor(2));
        // Three parts for level 2, cycled over two servers.
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().any(|(_, p)| p.is_parity()));
    }

    #[test]
    fn test_no_servers_means_no_placement() {
        let mut reg = RecordingRegistry::new();
        assert!(reg.servers_for_new_chunk(Goal::ordinary(2)).is_empty());
    }

    #[test]
    fn test_ordering_by_usage() {
        let mut reg = RecordingRegistry::new();
        reg.add_server(1).usage = 0.9;
        reg.add_server(2).usage = 0.1;
        reg.add_server(3).usage = 0.5;
        let ordered = reg.servers_ordered_by_usage(0.05);
        assert_eq!(
            ordered.servers,
            vec![ServerId(2), ServerId(3), ServerId(1)]
        );
        assert_eq!(ordered.below_min, 1);
        assert_eq!(ordered.above_max, 1);
    }

    #[test]
    fn test_send_delete_bumps_counter() {
        let mut reg = RecordingRegistry::new();
        reg.add_server(1);
        reg.send_delete_chunk(ServerId(1), ChunkId(5), 0, ChunkPartType::Standard);
        assert_eq!(reg.deletion_counter(ServerId(1)), 1);
        assert_eq!(reg.take_commands().len(), 1);
        reg.settle();
        assert_eq!(reg.deletion_counter(ServerId(1)), 0);
    }
}
