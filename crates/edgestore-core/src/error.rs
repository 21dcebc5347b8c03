//! Error types for `EdgeStore`.
//!
//! One unified error enum for all store operations. Error codes follow the
//! pattern `EDGE-XXX` for easy debugging. Not-found is never an error: `get`
//! returns `None`, `delete` returns `false`, `count` returns `0`.

use thiserror::Error;

use crate::gid::Gid;

/// Result type alias for `EdgeStore` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `EdgeStore` operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Both a sibling gid and an explicit colocation were supplied (EDGE-001).
    #[error("[EDGE-001] cannot specify both a sibling gid and a colocation")]
    GidSpecConflict,

    /// Colocation id out of range (EDGE-002).
    #[error("[EDGE-002] colocation id {0} is out of range [1, 4294967295]")]
    InvalidColo(u32),

    /// Query scoped by both a parent gid and a colocation (EDGE-003).
    #[error("[EDGE-003] cannot query with both a parent gid and a colocation")]
    QueryScopeConflict,

    /// Query without a parent gid requires an index range (EDGE-004).
    #[error("[EDGE-004] a query not scoped to a parent gid requires an index range")]
    UnindexedQuery,

    /// Edge already exists (EDGE-005).
    ///
    /// Raised by a non-overwrite add whose primary key is already taken.
    #[error("[EDGE-005] edge ({edge_type}, {gid1}, {gid2}) already exists")]
    EdgeExists {
        /// Edge schema tag.
        edge_type: u32,
        /// Parent identifier.
        gid1: Gid,
        /// Child identifier.
        gid2: Gid,
    },

    /// Unique index violation (EDGE-006).
    #[error("[EDGE-006] value '{value}' already present in unique index {index_type}")]
    UniqueIndexViolation {
        /// Index schema tag.
        index_type: u32,
        /// Value that collided.
        value: String,
    },

    /// Revision self-check failure (EDGE-007).
    ///
    /// An overwrite found the stored row at a revision other than the one
    /// immediately preceding the revision it just issued. Signals a
    /// concurrent writer slipping between the revision bump and the edge
    /// write, or a storage-layer anomaly. The transaction rolls back.
    #[error("[EDGE-007] revision mismatch on overwrite: expected {expected}, found {found}")]
    RevisionMismatch {
        /// Revision the row was expected to hold.
        expected: u64,
        /// Revision actually found.
        found: u64,
    },

    /// Lock probe outside a transaction (EDGE-008).
    #[error("[EDGE-008] colocation lock requires an ongoing transaction")]
    LockWithoutTransaction,

    /// Configuration error (EDGE-009).
    #[error("[EDGE-009] configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Underlying database error (EDGE-010).
    #[error("[EDGE-010] storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error (EDGE-011).
    #[error("[EDGE-011] io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the error code (e.g., "EDGE-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::GidSpecConflict => "EDGE-001",
            Self::InvalidColo(_) => "EDGE-002",
            Self::QueryScopeConflict => "EDGE-003",
            Self::UnindexedQuery => "EDGE-004",
            Self::EdgeExists { .. } => "EDGE-005",
            Self::UniqueIndexViolation { .. } => "EDGE-006",
            Self::RevisionMismatch { .. } => "EDGE-007",
            Self::LockWithoutTransaction => "EDGE-008",
            Self::Config(_) => "EDGE-009",
            Self::Storage(_) => "EDGE-010",
            Self::Io(_) => "EDGE-011",
        }
    }

    /// True when the error is a consistency self-check failure rather than a
    /// caller mistake; these must surface and never be swallowed.
    #[must_use]
    pub const fn is_consistency_failure(&self) -> bool {
        matches!(self, Self::RevisionMismatch { .. })
    }
}
