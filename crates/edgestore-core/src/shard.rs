//! Per-shard storage engine.
//!
//! A shard owns one database connection and implements the edge operations
//! against it: id generation, add/delete/get/query/count, revision
//! bookkeeping, index maintenance, and the colocation lock probe.
//!
//! Every public operation runs inside a transaction on the shard's
//! connection. The connection sits behind a re-entrant mutex so a thread
//! holding a colocation lock keeps issuing operations on the same connection
//! (they join the lock's transaction) while other threads serialize.
//!
//! # Revision protocol
//!
//! [`increment_revision`](Shard) is the sole source of revision numbers: an
//! upsert on `edgemeta` that initializes `(revision = 1, count = 0)` on first
//! write, otherwise bumps `revision`, and hands the new value back through
//! the `RETURNING` channel. Every mutation starts with it, so revisions are
//! strictly monotonic and gap-free per `(edge_type, gid1)` — deletes advance
//! the revision too, which keeps stale index rows unambiguously keyable.

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use rusqlite::params;

use crate::db::Db;
use crate::edge::{AddOutcome, Edge, IndexQuery, IndexSpec};
use crate::error::{Error, Result};
use crate::gid::{Gid, LOCK_COUNTER};

/// Connection guard held for the duration of a colocation lock scope.
pub(crate) type DbGuard = parking_lot::lock_api::ArcReentrantMutexGuard<
    parking_lot::RawMutex,
    parking_lot::RawThreadId,
    Db,
>;

const GENERATE_GID_SQL: &str = "\
INSERT INTO colo (colo, counter) VALUES (?1, ?2)
ON CONFLICT (colo) DO UPDATE SET counter = counter + 1
RETURNING counter";

const INCREMENT_REVISION_SQL: &str = "\
INSERT INTO edgemeta (edgetype, gid1, revision, count) VALUES (?1, ?2, 1, 0)
ON CONFLICT (edgetype, gid1) DO UPDATE SET revision = revision + 1
RETURNING revision";

const BUMP_COUNT_SQL: &str = "\
UPDATE edgemeta SET count = count + ?1 WHERE edgetype = ?2 AND gid1 = ?3";

const ADD_SQL: &str = "\
INSERT INTO edgedata (edgetype, gid1, gid2, revision, encoding, data)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const ADD_OVERWRITE_SQL: &str = "\
INSERT INTO edgedata (edgetype, gid1, gid2, revision, encoding, data)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (edgetype, gid1, gid2) DO UPDATE SET
    revision = excluded.revision,
    encoding = excluded.encoding,
    data     = excluded.data";

const PREV_REVISION_SQL: &str = "\
SELECT revision FROM edgedata
WHERE edgetype = ?1 AND gid1 = ?2 AND gid2 = ?3";

const UNIQUE_INDEX_SQL: &str = "\
SELECT COUNT(1) FROM edgeindex
WHERE indextype = ?1 AND indexvalue = ?2";

const ADD_INDEX_SQL: &str = "\
INSERT INTO edgeindex (indextype, indexvalue, gid1, revision)
VALUES (?1, ?2, ?3, ?4)";

const DELETE_INDEX_SQL: &str = "\
DELETE FROM edgeindex
WHERE indextype = ?1 AND gid1 = ?2 AND revision = ?3";

const DELETE_SQL: &str = "\
DELETE FROM edgedata
WHERE edgetype = ?1 AND gid1 = ?2 AND gid2 = ?3
RETURNING revision";

const GET_SQL: &str = "\
SELECT edgetype, gid1, gid2, revision, encoding, data
FROM edgedata
WHERE edgetype = ?1 AND gid1 = ?2 AND gid2 = ?3";

// CROSS JOIN pins the index-first plan; a planner picking edgedata as the
// outer loop would defeat the index.
const GET_INDEX_SQL: &str = "\
SELECT e.edgetype, e.gid1, e.gid2, e.revision, e.encoding, e.data
FROM edgeindex AS i CROSS JOIN edgedata AS e
    ON e.edgetype = ?1 AND e.gid1 = ?2 AND e.gid2 = ?3
   AND i.gid1 = e.gid1 AND i.revision = e.revision
WHERE i.indextype = ?4 AND i.indexvalue BETWEEN ?5 AND ?6";

const LIST_SQL: &str = "\
SELECT edgetype, gid1, gid2, revision, encoding, data
FROM edgedata
WHERE edgetype = ?1 AND gid1 = ?2
ORDER BY revision DESC";

const LIST_INDEX_SQL: &str = "\
SELECT e.edgetype, e.gid1, e.gid2, e.revision, e.encoding, e.data
FROM edgeindex AS i CROSS JOIN edgedata AS e
    ON e.edgetype = ?1 AND e.gid1 = ?2
   AND i.gid1 = e.gid1 AND i.revision = e.revision
WHERE i.indextype = ?3 AND i.indexvalue BETWEEN ?4 AND ?5
ORDER BY i.indexvalue ASC, i.revision DESC";

const SEARCH_INDEX_SQL: &str = "\
SELECT e.edgetype, e.gid1, e.gid2, e.revision, e.encoding, e.data
FROM edgeindex AS i CROSS JOIN edgedata AS e
    ON e.edgetype = ?1
   AND e.gid1 = i.gid1 AND e.revision = i.revision
WHERE i.indextype = ?2 AND i.indexvalue BETWEEN ?3 AND ?4
ORDER BY i.indexvalue ASC, i.revision DESC";

const COUNT_SQL: &str = "\
SELECT count FROM edgemeta WHERE edgetype = ?1 AND gid1 = ?2";

/// The storage engine bound to a single shard host.
#[derive(Debug)]
pub struct Shard {
    db: Arc<ReentrantMutex<Db>>,
}

impl Shard {
    /// Opens the shard database for `dbname` under the `host` directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(host: &str, dbname: &str) -> Result<Self> {
        Ok(Self {
            db: Arc::new(ReentrantMutex::new(Db::open(host, dbname)?)),
        })
    }

    /// Takes exclusive ownership of the shard connection for a lock scope.
    pub(crate) fn acquire(&self) -> DbGuard {
        self.db.lock_arc()
    }

    /// Allocates the next gid in `colo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation fails.
    pub fn generate_gid(&self, colo: u32) -> Result<Gid> {
        let db = self.db.lock();
        let txn = db.transaction()?;
        let gid = Self::generate_gid_in(&db, colo, 1)?;
        txn.commit()?;
        Ok(gid)
    }

    /// Upsert on the colo counter row: insert `(colo, start)` when absent,
    /// otherwise bump the counter; either way the resulting counter comes
    /// back through the `RETURNING` channel.
    fn generate_gid_in(db: &Db, colo: u32, start: u32) -> Result<Gid> {
        let counter = db
            .run_returning(GENERATE_GID_SQL, params![colo, start])?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        Ok(Gid::new(colo, counter as u32))
    }

    fn increment_revision(db: &Db, edge_type: u32, gid1: Gid) -> Result<u64> {
        let revision = db
            .run_returning(INCREMENT_REVISION_SQL, params![edge_type, gid1.to_db()])?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        Ok(revision as u64)
    }

    /// Writes an edge and its index entries.
    ///
    /// Without `overwrite`, an existing edge at the same primary key fails
    /// the add. With `overwrite`, an existing edge has its payload and
    /// revision replaced; the row's previous revision is read inside the
    /// transaction both to key the stale index rows for deletion and to
    /// self-check that no other writer issued a revision between the bump
    /// and the write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EdgeExists`] on a primary-key collision without
    /// `overwrite`, [`Error::UniqueIndexViolation`] when a unique index value
    /// is already taken, and [`Error::RevisionMismatch`] when the
    /// prev-revision self-check fails. Any error rolls the transaction back.
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
        let db = self.db.lock();
        let txn = db.transaction()?;

        let revision = Self::increment_revision(&db, edge_type, gid1)?;

        let prev_revision = if overwrite {
            db.query_one(
                PREV_REVISION_SQL,
                params![edge_type, gid1.to_db(), gid2.to_db()],
                |row| row.get::<_, i64>(0),
            )?
            .map(|r| r as u64)
        } else {
            None
        };

        let sql = if overwrite { ADD_OVERWRITE_SQL } else { ADD_SQL };
        match db.run(
            sql,
            params![
                edge_type,
                gid1.to_db(),
                gid2.to_db(),
                revision as i64,
                encoding,
                data
            ],
        ) {
            Ok(_) => {}
            Err(Error::Storage(rusqlite::Error::SqliteFailure(e, _)))
                if !overwrite && e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(Error::EdgeExists {
                    edge_type,
                    gid1,
                    gid2,
                });
            }
            Err(err) => return Err(err),
        }

        if let Some(prev) = prev_revision {
            // nobody else may issue a revision between the bump and the write
            if prev != revision - 1 {
                return Err(Error::RevisionMismatch {
                    expected: revision - 1,
                    found: prev,
                });
            }
        } else {
            db.run(BUMP_COUNT_SQL, params![1, edge_type, gid1.to_db()])?;
        }

        for index in indices {
            if let Some(prev) = prev_revision {
                db.run(
                    DELETE_INDEX_SQL,
                    params![index.index_type, gid1.to_db(), prev as i64],
                )?;
            }

            if index.unique {
                let existing: i64 = db
                    .query_one(UNIQUE_INDEX_SQL, params![index.index_type, index.value], |row| {
                        row.get(0)
                    })?
                    .unwrap_or(0);
                if existing != 0 {
                    return Err(Error::UniqueIndexViolation {
                        index_type: index.index_type,
                        value: index.value.clone(),
                    });
                }
            }

            db.run(
                ADD_INDEX_SQL,
                params![index.index_type, index.value, gid1.to_db(), revision as i64],
            )?;
        }

        txn.commit()?;

        tracing::trace!(edge_type, %gid1, %gid2, revision, "edge added");
        Ok(AddOutcome {
            edge: Edge {
                edge_type,
                gid1,
                gid2,
                revision,
                encoding,
                data: data.to_vec(),
            },
            overwritten: prev_revision.is_some(),
        })
    }

    /// Deletes an edge, returning whether a row was deleted.
    ///
    /// The revision advances even when the edge is missing. When a row was
    /// deleted, its revision (from the `RETURNING` channel) keys the index
    /// rows to remove for each type in `index_types`.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the transaction rolls back.
    pub fn delete(
        &self,
        edge_type: u32,
        gid1: Gid,
        gid2: Gid,
        index_types: &[u32],
    ) -> Result<bool> {
        let db = self.db.lock();
        let txn = db.transaction()?;

        Self::increment_revision(&db, edge_type, gid1)?;

        let deleted =
            db.run_returning(DELETE_SQL, params![edge_type, gid1.to_db(), gid2.to_db()])?;

        if let Some(revision) = deleted {
            db.run(BUMP_COUNT_SQL, params![-1, edge_type, gid1.to_db()])?;
            for &index_type in index_types {
                db.run(DELETE_INDEX_SQL, params![index_type, gid1.to_db(), revision])?;
            }
        }

        txn.commit()?;

        tracing::trace!(edge_type, %gid1, %gid2, deleted = deleted.is_some(), "edge delete");
        Ok(deleted.is_some())
    }

    /// Fetches a single edge, or `None`.
    ///
    /// With an index query, the lookup additionally requires the edge's
    /// current index entry for that type to fall inside the value range.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(
        &self,
        edge_type: u32,
        gid1: Gid,
        gid2: Gid,
        index: Option<&IndexQuery>,
    ) -> Result<Option<Edge>> {
        let db = self.db.lock();
        let txn = db.transaction()?;

        let edge = match index {
            Some(ix) => db.query_one(
                GET_INDEX_SQL,
                params![
                    edge_type,
                    gid1.to_db(),
                    gid2.to_db(),
                    ix.index_type,
                    ix.start,
                    ix.end
                ],
                edge_from_row,
            )?,
            None => db.query_one(
                GET_SQL,
                params![edge_type, gid1.to_db(), gid2.to_db()],
                edge_from_row,
            )?,
        };

        txn.commit()?;
        Ok(edge)
    }

    /// Queries edges on this shard.
    ///
    /// Scoped by `gid1` alone it lists the parent's edges by descending
    /// revision; with an index it range-scans the parent's indexed edges;
    /// with only an index it range-scans across all parents on this shard.
    /// At least one of the two must be given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnindexedQuery`] when neither `gid1` nor `index` is
    /// supplied.
    pub fn query(
        &self,
        edge_type: u32,
        index: Option<&IndexQuery>,
        gid1: Option<Gid>,
    ) -> Result<Vec<Edge>> {
        if gid1.is_none() && index.is_none() {
            return Err(Error::UnindexedQuery);
        }

        let db = self.db.lock();
        let txn = db.transaction()?;

        let edges = match (gid1, index) {
            (Some(gid1), Some(ix)) => db.query(
                LIST_INDEX_SQL,
                params![edge_type, gid1.to_db(), ix.index_type, ix.start, ix.end],
                edge_from_row,
            )?,
            (Some(gid1), None) => {
                db.query(LIST_SQL, params![edge_type, gid1.to_db()], edge_from_row)?
            }
            (None, Some(ix)) => db.query(
                SEARCH_INDEX_SQL,
                params![edge_type, ix.index_type, ix.start, ix.end],
                edge_from_row,
            )?,
            (None, None) => unreachable!(),
        };

        txn.commit()?;
        Ok(edges)
    }

    /// Returns the number of live edges under `(edge_type, gid1)`, `0` when
    /// the parent has never been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, edge_type: u32, gid1: Gid) -> Result<u64> {
        let db = self.db.lock();
        let txn = db.transaction()?;
        let count = db
            .query_one(COUNT_SQL, params![edge_type, gid1.to_db()], |row| {
                row.get::<_, i64>(0)
            })?
            .unwrap_or(0);
        txn.commit()?;
        Ok(count.max(0) as u64)
    }

    /// Acquires the colocation row lock by writing the reserved counter-0
    /// row. The caller must already hold an open transaction on this shard;
    /// the write keeps the row locked until that transaction ends, which
    /// serializes every other locker of the same colocation. The allocated
    /// gid is discarded.
    pub(crate) fn lock_probe(db: &Db, colo: u32) -> Result<()> {
        if !db.in_transaction() {
            return Err(Error::LockWithoutTransaction);
        }
        Self::generate_gid_in(db, colo, LOCK_COUNTER)?;
        Ok(())
    }
}

fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    Ok(Edge {
        edge_type: row.get::<_, i64>(0)? as u32,
        gid1: Gid::from_db(row.get(1)?),
        gid2: Gid::from_db(row.get(2)?),
        revision: row.get::<_, i64>(3)? as u64,
        encoding: row.get::<_, i64>(4)? as u32,
        data: row.get(5)?,
    })
}
