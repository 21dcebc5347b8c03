//! Colocation-to-shard routing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::gid::Gid;
use crate::shard::Shard;

/// Maps colocations onto a fixed, ordered list of shard hosts.
///
/// The host list length is baked into the mapping (`colo % hosts.len()`), so
/// it must never change once data has been written. Shards are constructed
/// lazily, at most one per host: a shard wraps the single connection for its
/// `(host, dbname)` pair.
#[derive(Debug)]
pub(crate) struct Router {
    hosts: Vec<String>,
    dbname: String,
    shards: Mutex<HashMap<usize, Arc<Shard>>>,
}

impl Router {
    pub fn new(hosts: Vec<String>, dbname: String) -> Self {
        debug_assert!(!hosts.is_empty(), "router requires at least one host");
        Self {
            hosts,
            dbname,
            shards: Mutex::new(HashMap::new()),
        }
    }

    pub fn num_hosts(&self) -> usize {
        self.hosts.len()
    }

    pub fn host_index(&self, colo: u32) -> usize {
        colo as usize % self.hosts.len()
    }

    pub fn shard_for_gid(&self, gid: Gid) -> Result<Arc<Shard>> {
        self.shard_for_colo(gid.colo())
    }

    pub fn shard_for_colo(&self, colo: u32) -> Result<Arc<Shard>> {
        self.host_shard(self.host_index(colo))
    }

    pub fn host_shard(&self, host_index: usize) -> Result<Arc<Shard>> {
        let mut shards = self.shards.lock();
        if let Some(shard) = shards.get(&host_index) {
            return Ok(Arc::clone(shard));
        }
        let shard = Arc::new(Shard::open(&self.hosts[host_index], &self.dbname)?);
        shards.insert(host_index, Arc::clone(&shard));
        Ok(shard)
    }
}
