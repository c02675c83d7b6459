//! Shared fixtures: an in-process cluster (monitor + N servers on loopback,
//! each with a tempfile-backed region) and slot inspection helpers.

use crate::{Client, ClientConfig};
use monitor::Monitor;
use server::{Server, ServerConfig};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestCluster {
    pub monitor: Arc<Monitor>,
    pub servers: Vec<Arc<Server>>,
    pub slots: u64,
    #[allow(dead_code)]
    dirs: Vec<TempDir>,
}

impl TestCluster {
    /// Starts a monitor and `n` servers, each with a `slots`-slot region.
    /// Servers get monitor-assigned ids 1..=n in start order.
    pub fn start(n: usize, slots: u64) -> Self {
        let monitor = Monitor::bind("127.0.0.1:0").unwrap();
        {
            let m = Arc::clone(&monitor);
            std::thread::spawn(move || m.run());
        }

        let mut servers = Vec::new();
        let mut dirs = Vec::new();
        for _ in 0..n {
            let dir = tempfile::tempdir().unwrap();
            let cfg = ServerConfig {
                monitor_address: monitor.local_addr().to_string(),
                listen_addr: "127.0.0.1:0".into(),
                region_path: dir.path().join("region.pm").display().to_string(),
                region_slots: slots,
                ..ServerConfig::default()
            };
            let server = Server::create(&cfg, false).unwrap();
            {
                let s = Arc::clone(&server);
                std::thread::spawn(move || s.run());
            }
            servers.push(server);
            dirs.push(dir);
        }

        TestCluster {
            monitor,
            servers,
            slots,
            dirs,
        }
    }

    /// Connects a client with `replicas` as R and defaults otherwise.
    pub fn client(&self, id: u32, replicas: usize) -> Client {
        self.client_with(id, |cfg| cfg.num_replicas = replicas)
    }

    pub fn client_with(&self, id: u32, tweak: impl FnOnce(&mut ClientConfig)) -> Client {
        let mut cfg = ClientConfig {
            monitor_address: self.monitor.local_addr().to_string(),
            ..ClientConfig::default()
        };
        tweak(&mut cfg);
        Client::connect(id, cfg).unwrap()
    }

    pub fn server_by_id(&self, id: u32) -> &Arc<Server> {
        self.servers
            .iter()
            .find(|s| s.id() == id)
            .expect("no such server id")
    }

    /// Raw bytes of slot `index` on the server with `id`.
    pub fn slot_of(&self, id: u32, index: u64) -> &[u8] {
        let region = self.server_by_id(id).region();
        let off = index as usize * slot::SLOT_LEN;
        &region.bytes()[off..off + slot::SLOT_LEN]
    }

    /// The ordered replica ids the engine will derive for `key`.
    pub fn replica_ids(&self, key: &str, r: usize) -> Vec<u32> {
        let listing = self
            .servers
            .iter()
            .map(|s| (s.id(), s.local_addr().to_string()))
            .collect();
        placement::Mapper::new(listing)
            .unwrap()
            .map(slot::key_fingerprint(key), r)
    }

    /// Home slot index of `key` (same capacity on every server here).
    pub fn home_index(&self, key: &str) -> u64 {
        u64::from(slot::key_fingerprint(key)) % self.slots
    }
}

/// Finds `n` distinct keys whose home slot in a `capacity`-slot table is
/// `index`.
pub fn colliding_keys(capacity: u64, index: u64, n: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0u64;
    while out.len() < n {
        let k = format!("key-{i}");
        if u64::from(slot::key_fingerprint(&k)) % capacity == index {
            out.push(k);
        }
        i += 1;
    }
    out
}
