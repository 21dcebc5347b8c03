//! Store façade: routing, fan-out queries, and the colocation lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use rand::Rng;

use crate::config::StoreConfig;
use crate::edge::{AddOutcome, Edge, IndexQuery, IndexSpec};
use crate::error::{Error, Result};
use crate::gid::{check_colo, Gid, MAX_COLO};
use crate::router::Router;
use crate::shard::{DbGuard, Shard};

/// The sharded edge store.
///
/// Routes every operation to the shard owning the parent gid's colocation,
/// fans unscoped queries out across all hosts, and scopes the per-colocation
/// lock. One instance per logical database name; see [`StoreRegistry`].
#[derive(Debug)]
pub struct EdgeStore {
    router: Router,
    locked: Arc<Mutex<HashSet<(ThreadId, u32)>>>,
}

impl EdgeStore {
    /// Opens a store over the configured shard hosts.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_sharding(
            config.sharding.hosts.clone(),
            config.sharding.dbname.clone(),
        ))
    }

    pub(crate) fn with_sharding(hosts: Vec<String>, dbname: String) -> Self {
        Self {
            router: Router::new(hosts, dbname),
            locked: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Allocates a fresh gid.
    ///
    /// The colocation comes from `colo`, or is inherited from `sibling`, or
    /// is drawn uniformly at random from `[1, MAX_COLO]` when neither is
    /// given. Supplying both is a contract violation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GidSpecConflict`] when both `sibling` and `colo` are
    /// supplied, or [`Error::InvalidColo`] for a colocation of 0.
    pub fn generate_gid(&self, sibling: Option<Gid>, colo: Option<u32>) -> Result<Gid> {
        if sibling.is_some() && colo.is_some() {
            return Err(Error::GidSpecConflict);
        }
        let colo = match (sibling, colo) {
            (Some(gid), None) => gid.colo(),
            (None, Some(colo)) => colo,
            _ => rand::thread_rng().gen_range(1..=MAX_COLO),
        };
        check_colo(colo)?;
        self.router.shard_for_colo(colo)?.generate_gid(colo)
    }

    /// Writes an edge and its index entries; see [`Shard::add`].
    ///
    /// # Errors
    ///
    /// Propagates the shard's errors unchanged.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        edge_type: u32,
        gid1: Gid,
        gid2: Gid,
        encoding: u32,
        data: &[u8],
        indices: &[IndexSpec],
        overwrite: bool,
    ) -> Result<AddOutcome> {
        self.router
            .shard_for_gid(gid1)?
            .add(edge_type, gid1, gid2, encoding, data, indices, overwrite)
    }

    /// Deletes an edge; see [`Shard::delete`].
    ///
    /// # Errors
    ///
    /// Propagates the shard's errors unchanged.
    pub fn delete(
        &self,
        edge_type: u32,
        gid1: Gid,
        gid2: Gid,
        index_types: &[u32],
    ) -> Result<bool> {
        self.router
            .shard_for_gid(gid1)?
            .delete(edge_type, gid1, gid2, index_types)
    }

    /// Fetches a single edge; see [`Shard::get`].
    ///
    /// # Errors
    ///
    /// Propagates the shard's errors unchanged.
    pub fn get(
        &self,
        edge_type: u32,
        gid1: Gid,
        gid2: Gid,
        index: Option<&IndexQuery>,
    ) -> Result<Option<Edge>> {
        self.router
            .shard_for_gid(gid1)?
            .get(edge_type, gid1, gid2, index)
    }

    /// Returns the live edge count under `(edge_type, gid1)`.
    ///
    /// # Errors
    ///
    /// Propagates the shard's errors unchanged.
    pub fn count(&self, edge_type: u32, gid1: Gid) -> Result<u64> {
        self.router.shard_for_gid(gid1)?.count(edge_type, gid1)
    }

    /// Queries edges of one type.
    ///
    /// Scoped by `gid1` or `colo` (mutually exclusive), the query runs on a
    /// single shard. Unscoped, it requires an index and fans out across
    /// every host shard, returning the concatenation with no global order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryScopeConflict`] when both `gid1` and `colo` are
    /// supplied, and [`Error::UnindexedQuery`] when the query has neither a
    /// parent gid nor an index.
    pub fn query(
        &self,
        edge_type: u32,
        index: Option<&IndexQuery>,
        gid1: Option<Gid>,
        colo: Option<u32>,
    ) -> Result<Vec<Edge>> {
        if gid1.is_some() && colo.is_some() {
            return Err(Error::QueryScopeConflict);
        }

        if let Some(colo) = colo.or(gid1.map(Gid::colo)) {
            return self.router.shard_for_colo(colo)?.query(edge_type, index, gid1);
        }

        let Some(index) = index else {
            return Err(Error::UnindexedQuery);
        };

        let mut edges = Vec::new();
        for host_index in 0..self.router.num_hosts() {
            let shard = self.router.host_shard(host_index)?;
            edges.extend(shard.query(edge_type, Some(index), None)?);
        }
        tracing::trace!(
            edge_type,
            hosts = self.router.num_hosts(),
            results = edges.len(),
            "fan-out query"
        );
        Ok(edges)
    }

    /// Acquires the colocation lock for `colo`.
    ///
    /// The returned guard owns a transaction on the colocation's shard;
    /// every operation this thread issues against that shard joins it until
    /// the guard is committed or dropped (rollback). Re-acquiring a
    /// colocation already locked by this thread yields a sentinel guard
    /// whose commit and release are no-ops; the outermost guard owns the
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the shard cannot be reached or the lock probe
    /// fails; the re-entrancy marker is released on every failure path.
    pub fn lock(&self, colo: u32) -> Result<ColoLock> {
        check_colo(colo)?;
        let key = (thread::current().id(), colo);
        {
            let mut locked = self.locked.lock();
            if locked.contains(&key) {
                return Ok(ColoLock { inner: None });
            }
            locked.insert(key);
        }

        match self.lock_inner(colo, key) {
            Ok(lock) => Ok(lock),
            Err(err) => {
                self.locked.lock().remove(&key);
                Err(err)
            }
        }
    }

    fn lock_inner(&self, colo: u32, key: (ThreadId, u32)) -> Result<ColoLock> {
        let shard = self.router.shard_for_colo(colo)?;
        let db = shard.acquire();
        db.begin_level()?;
        if let Err(err) = Shard::lock_probe(&db, colo) {
            let _ = db.rollback_level();
            return Err(err);
        }

        tracing::debug!(colo, "colocation locked");
        Ok(ColoLock {
            inner: Some(LockInner {
                key,
                db,
                locked: Arc::clone(&self.locked),
                committed: false,
            }),
        })
    }

    /// True while the calling thread holds the lock for `colo`.
    #[must_use]
    pub fn is_locked(&self, colo: u32) -> bool {
        self.locked.lock().contains(&(thread::current().id(), colo))
    }

    /// True while the calling thread is inside any colocation lock scope.
    #[must_use]
    pub fn inside_lock(&self) -> bool {
        let me = thread::current().id();
        self.locked.lock().iter().any(|(tid, _)| *tid == me)
    }
}

/// Scoped colocation lock handle.
///
/// Commit the guard to make the work done under the lock durable; dropping
/// it without committing rolls the transaction back. Sentinel guards from
/// nested acquisitions do neither.
#[must_use = "dropping a colocation lock rolls back its transaction"]
pub struct ColoLock {
    inner: Option<LockInner>,
}

struct LockInner {
    key: (ThreadId, u32),
    db: DbGuard,
    locked: Arc<Mutex<HashSet<(ThreadId, u32)>>>,
    committed: bool,
}

impl ColoLock {
    /// True when this guard is a nested no-op acquisition.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.inner.is_none()
    }

    /// Commits the lock's transaction and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn commit(mut self) -> Result<()> {
        if let Some(inner) = self.inner.as_mut() {
            inner.committed = true;
            inner.db.commit_level()?;
        }
        Ok(())
    }
}

impl Drop for LockInner {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.db.rollback_level();
        }
        self.locked.lock().remove(&self.key);
    }
}

/// Explicit per-dbname store registry, owned by the application entry point.
///
/// Stores share the configured shard hosts; each logical database name maps
/// to its own [`EdgeStore`], opened on first use.
#[derive(Debug)]
pub struct StoreRegistry {
    config: StoreConfig,
    stores: Mutex<HashMap<String, Arc<EdgeStore>>>,
}

impl StoreRegistry {
    /// Creates a registry over a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the store for `dbname`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Currently infallible beyond configuration errors already caught at
    /// construction; kept fallible for parity with store opening.
    pub fn get(&self, dbname: &str) -> Result<Arc<EdgeStore>> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(dbname) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(EdgeStore::with_sharding(
            self.config.sharding.hosts.clone(),
            dbname.to_string(),
        ));
        stores.insert(dbname.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Returns the store for the configured default database name.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreRegistry::get`] errors.
    pub fn default_store(&self) -> Result<Arc<EdgeStore>> {
        self.get(&self.config.sharding.dbname)
    }
}
