//! SQLite-backed driver layer.
//!
//! One connection per `(host, dbname)` pair, owned by its shard. The engine
//! needs a narrow surface from the database: parameterized execution, row
//! queries, an in-band value channel for statements that compute a scalar
//! while they mutate (`RETURNING`), and scoped transactions that nest.
//!
//! The `RETURNING` channel stands in for an assignable per-connection
//! last-insert-id register: statements write the channel via a `RETURNING`
//! clause and the caller reads the value in-band, within the same
//! transaction.

use std::cell::Cell;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Params, Row};

use crate::error::Result;

/// Schema bootstrap, applied idempotently on open.
const BOOTSTRAP: &str = "
CREATE TABLE IF NOT EXISTS edgedata (
    edgetype INTEGER NOT NULL,
    gid1     INTEGER NOT NULL,
    gid2     INTEGER NOT NULL,
    revision INTEGER NOT NULL,
    encoding INTEGER NOT NULL,
    data     BLOB    NOT NULL,
    PRIMARY KEY (edgetype, gid1, gid2)
);

CREATE TABLE IF NOT EXISTS edgemeta (
    edgetype INTEGER NOT NULL,
    gid1     INTEGER NOT NULL,
    revision INTEGER NOT NULL,
    count    INTEGER NOT NULL,
    PRIMARY KEY (edgetype, gid1)
);

CREATE TABLE IF NOT EXISTS edgeindex (
    indextype  INTEGER NOT NULL,
    indexvalue TEXT    NOT NULL,
    gid1       INTEGER NOT NULL,
    revision   INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS edgeindex_value
    ON edgeindex (indextype, indexvalue);
CREATE INDEX IF NOT EXISTS edgeindex_backref
    ON edgeindex (indextype, gid1, revision);

CREATE TABLE IF NOT EXISTS colo (
    colo    INTEGER NOT NULL PRIMARY KEY,
    counter INTEGER NOT NULL
);
";

/// A single shard connection.
///
/// At most one transaction is open on a connection at a time; nested
/// [`Db::transaction`] calls join the ongoing one.
#[derive(Debug)]
pub struct Db {
    conn: Connection,
    txn_depth: Cell<u32>,
}

impl Db {
    /// Opens (and bootstraps) the database for `dbname` under the `host`
    /// directory. A host named `:memory:` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened or bootstrapped.
    pub fn open(host: &str, dbname: &str) -> Result<Self> {
        let conn = if host == ":memory:" {
            Connection::open_in_memory()?
        } else {
            std::fs::create_dir_all(host)?;
            Connection::open(Path::new(host).join(format!("{dbname}.db")))?
        };

        // journal_mode reports the resulting mode as a row, so it cannot go
        // through execute().
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(BOOTSTRAP)?;

        tracing::debug!(host, dbname, "opened shard database");
        Ok(Self {
            conn,
            txn_depth: Cell::new(0),
        })
    }

    /// Executes a parameterized statement, returning the affected row count.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn run<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    /// Executes a statement carrying a `RETURNING` clause and yields its
    /// scalar. `None` means the statement matched no row.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn run_returning<P: Params>(&self, sql: &str, params: P) -> Result<Option<i64>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, |row| row.get(0)).optional()?)
    }

    /// Runs a row query, mapping each row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or row mapping fails.
    pub fn query<T, P, F>(&self, sql: &str, params: P, mut map: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| map(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Runs a query expected to yield at most one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or row mapping fails.
    pub fn query_one<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, map).optional()?)
    }

    /// True while a transaction is open on this connection.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txn_depth.get() > 0
    }

    /// Opens a scoped transaction.
    ///
    /// A call on a connection already inside a transaction joins it: the
    /// returned guard's commit and rollback only close the transaction at the
    /// outermost level. `BEGIN IMMEDIATE` takes the write lock up front.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub fn transaction(&self) -> Result<TxnGuard<'_>> {
        self.begin_level()?;
        Ok(TxnGuard {
            db: self,
            done: false,
        })
    }

    pub(crate) fn begin_level(&self) -> rusqlite::Result<()> {
        if self.txn_depth.get() == 0 {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        self.txn_depth.set(self.txn_depth.get() + 1);
        Ok(())
    }

    pub(crate) fn commit_level(&self) -> rusqlite::Result<()> {
        let depth = self.txn_depth.get();
        debug_assert!(depth > 0, "commit without an open transaction");
        self.txn_depth.set(depth - 1);
        if depth == 1 {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    pub(crate) fn rollback_level(&self) -> rusqlite::Result<()> {
        let depth = self.txn_depth.get();
        debug_assert!(depth > 0, "rollback without an open transaction");
        self.txn_depth.set(depth - 1);
        if depth == 1 {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

/// Scoped transaction guard.
///
/// [`TxnGuard::commit`] consumes the guard; dropping it without committing
/// rolls back. Nested guards are no-ops at commit and rollback; the outermost
/// guard owns the transaction.
pub struct TxnGuard<'a> {
    db: &'a Db,
    done: bool,
}

impl TxnGuard<'_> {
    /// Commits this transaction level.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.db.commit_level()?;
        Ok(())
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.db.rollback_level();
        }
    }
}
