//! Replica role and cluster slot-migration flags.
//!
//! No replication stream is carried here. The role gates writes to the
//! namespace map, and the migration flags let FLUSHDB and FLUSHALL pause a
//! running slot migration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationRole {
    Master,
    Replica,
}

#[derive(Debug)]
pub struct ReplicationState {
    pub role: ReplicationRole,
    pub master_replid: String,
    pub master_repl_offset: i64,
    pub master_host: Option<String>,
    pub master_port: Option<u16>,
}

impl Default for ReplicationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationState {
    pub fn new() -> Self {
        ReplicationState {
            role: ReplicationRole::Master,
            master_replid: generate_replid(),
            master_repl_offset: 0,
            master_host: None,
            master_port: None,
        }
    }

    pub fn is_replica(&self) -> bool {
        self.role == ReplicationRole::Replica
    }

    /// Become a replica of `host:port`.
    pub fn set_master(&mut self, host: String, port: u16) {
        self.role = ReplicationRole::Replica;
        self.master_host = Some(host);
        self.master_port = Some(port);
    }

    /// `SLAVEOF NO ONE`: promote back to master under a fresh replication id.
    pub fn clear_master(&mut self) {
        if self.is_replica() {
            self.master_replid = generate_replid();
        }
        self.role = ReplicationRole::Master;
        self.master_host = None;
        self.master_port = None;
    }
}

/// Generate a 40-character hex replication ID.
fn generate_replid() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 20] = rng.r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub type SharedReplicationState = Arc<RwLock<ReplicationState>>;

/// Slot-migration flags consulted by FLUSHDB and FLUSHALL.
#[derive(Debug, Default)]
pub struct MigrationFlags {
    in_progress: AtomicBool,
    stop: AtomicBool,
}

impl MigrationFlags {
    pub fn new() -> Self {
        MigrationFlags::default()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn set_in_progress(&self, running: bool) {
        self.in_progress.store(running, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn set_stop(&self, stop: bool) {
        self.stop.store(stop, Ordering::Release);
    }

    /// Ask a running migration to stop. Returns whether one was running.
    pub fn stop_if_running(&self) -> bool {
        if self.is_in_progress() {
            self.set_stop(true);
            true
        } else {
            false
        }
    }
}
