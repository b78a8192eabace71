//! Chunk manager configuration.
//!
//! Options are read from TOML (or built programmatically), validated once at
//! startup, and may be re-applied at runtime: `reload` keeps the manager
//! running on the previous values wherever the new ones are unusable.

use cedarfs_types::{make_error_msg, Result, Status, StatusCode};
use serde::{Deserialize, Serialize};

pub const MIN_LOOP_TIME: u32 = 1;
pub const MAX_LOOP_TIME: u32 = 7200;
pub const MIN_CPS: u32 = 10_000;
pub const MAX_CPS: u32 = 10_000_000;
pub const MIN_ACCEPTABLE_DIFFERENCE: f64 = 0.001;
pub const MAX_ACCEPTABLE_DIFFERENCE: f64 = 10.0;

/// Raw, serde-facing options with the on-disk key names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkManagerOptions {
    /// Startup grace before any reconciliation work, in seconds.
    pub replications_delay_init: u32,
    /// Replication grace after a chunkserver disconnects, in seconds.
    pub replications_delay_disconnect: u32,
    /// Disable copy deletion entirely.
    pub disable_chunks_del: bool,
    /// Per-server deletion rate the worker starts from.
    pub chunks_soft_del_limit: u32,
    /// Per-server deletion rate ceiling; defaults to three times the soft
    /// limit.
    pub chunks_hard_del_limit: Option<u32>,
    pub chunks_write_rep_limit: u32,
    pub chunks_read_rep_limit: u32,
    /// Deprecated: full-scan period with the visit rate uncapped.
    pub chunks_loop_time: Option<u32>,
    /// Minimum full-scan period, in seconds.
    pub chunks_loop_min_time: u32,
    /// Ceiling on chunk visits per second.
    pub chunks_loop_max_cps: u32,
    /// Disk-usage gap between servers tolerated without rebalancing.
    pub acceptable_difference: f64,
}

impl Default for ChunkManagerOptions {
    fn default() -> Self {
        Self {
            replications_delay_init: 300,
            replications_delay_disconnect: 3600,
            disable_chunks_del: false,
            chunks_soft_del_limit: 10,
            chunks_hard_del_limit: None,
            chunks_write_rep_limit: 2,
            chunks_read_rep_limit: 10,
            chunks_loop_time: None,
            chunks_loop_min_time: 300,
            chunks_loop_max_cps: 100_000,
            acceptable_difference: 0.1,
        }
    }
}

impl ChunkManagerOptions {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Status::with_message(StatusCode::INVALID_CONFIG, e.to_string()))
    }

    fn delete_limits(&self) -> (u32, u32) {
        if self.disable_chunks_del {
            return (0, 0);
        }
        let mut soft = self.chunks_soft_del_limit;
        let hard = self.chunks_hard_del_limit.unwrap_or(3 * soft);
        if hard < soft {
            tracing::warn!(
                soft,
                hard,
                "soft delete limit is greater than the hard limit, using the hard limit for both"
            );
            soft = hard;
        }
        (soft, hard)
    }

    fn loop_shape(&self, hash_size: u32) -> (u32, u32) {
        if let Some(loop_time) = self.chunks_loop_time {
            tracing::warn!(
                "chunks_loop_time is deprecated, use chunks_loop_min_time and chunks_loop_max_cps"
            );
            let loop_time = clamp_logged("chunks_loop_time", loop_time, MIN_LOOP_TIME, MAX_LOOP_TIME);
            (1 + hash_size / loop_time, u32::MAX)
        } else {
            let loop_time = clamp_logged(
                "chunks_loop_min_time",
                self.chunks_loop_min_time,
                MIN_LOOP_TIME,
                MAX_LOOP_TIME,
            );
            let cps = clamp_logged("chunks_loop_max_cps", self.chunks_loop_max_cps, MIN_CPS, MAX_CPS);
            (1 + hash_size / loop_time, cps)
        }
    }

    /// Validate the options and derive the resolved configuration for a
    /// chunk index of `hash_size` buckets.
    pub fn resolve(&self, hash_size: u32) -> Result<ChunkManagerConfig> {
        let (soft, hard) = self.delete_limits();
        if !self.disable_chunks_del && soft == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "delete limit is zero");
        }
        if self.chunks_write_rep_limit == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "write replication limit is zero");
        }
        if self.chunks_read_rep_limit == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "read replication limit is zero");
        }
        let (hash_steps, hash_cps) = self.loop_shape(hash_size);
        Ok(ChunkManagerConfig {
            replications_delay_init: self.replications_delay_init,
            replications_delay_disconnect: self.replications_delay_disconnect,
            max_del_soft_limit: soft,
            max_del_hard_limit: hard,
            max_write_repl: self.chunks_write_rep_limit,
            max_read_repl: self.chunks_read_rep_limit,
            hash_steps,
            hash_cps,
            acceptable_difference: self.acceptable_difference.clamp(
                MIN_ACCEPTABLE_DIFFERENCE,
                MAX_ACCEPTABLE_DIFFERENCE,
            ),
        })
    }
}

fn clamp_logged(name: &str, value: u32, min: u32, max: u32) -> u32 {
    if value < min {
        tracing::warn!(option = name, value, adjusted = min, "value too low, increased");
        min
    } else if value > max {
        tracing::warn!(option = name, value, adjusted = max, "value too high, decreased");
        max
    } else {
        value
    }
}

/// Resolved, validated configuration the manager runs on.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkManagerConfig {
    pub replications_delay_init: u32,
    pub replications_delay_disconnect: u32,
    pub max_del_soft_limit: u32,
    pub max_del_hard_limit: u32,
    pub max_write_repl: u32,
    pub max_read_repl: u32,
    pub hash_steps: u32,
    pub hash_cps: u32,
    pub acceptable_difference: f64,
}

impl ChunkManagerConfig {
    /// Apply a live reload on top of the running configuration.
    ///
    /// Unusable new values keep the previous ones: a zeroed delete limit
    /// (without `disable_chunks_del`) and zeroed replication limits are
    /// ignored.
    pub fn apply_reload(&mut self, opts: &ChunkManagerOptions, hash_size: u32) {
        self.replications_delay_init = opts.replications_delay_init;
        self.replications_delay_disconnect = opts.replications_delay_disconnect;

        let (soft, hard) = opts.delete_limits();
        if opts.disable_chunks_del || soft > 0 {
            self.max_del_soft_limit = soft;
            self.max_del_hard_limit = hard;
        } else {
            tracing::warn!("ignoring zero delete limit on reload");
        }
        if opts.chunks_write_rep_limit > 0 {
            self.max_write_repl = opts.chunks_write_rep_limit;
        }
        if opts.chunks_read_rep_limit > 0 {
            self.max_read_repl = opts.chunks_read_rep_limit;
        }
        let (hash_steps, hash_cps) = opts.loop_shape(hash_size);
        self.hash_steps = hash_steps;
        self.hash_cps = hash_cps;
        self.acceptable_difference = opts
            .acceptable_difference
            .clamp(MIN_ACCEPTABLE_DIFFERENCE, MAX_ACCEPTABLE_DIFFERENCE);
    }
}
