//! Edge records and query descriptors.

use serde::{Deserialize, Serialize};

use crate::gid::Gid;

/// A directed, typed, versioned edge.
///
/// Edges run from a parent (`gid1`, which determines shard placement) to a
/// child (`gid2`) and carry an opaque payload tagged with an encoding. The
/// `revision` is scoped to `(edge_type, gid1)` and advances on every mutation
/// of any edge under that parent. The primary key is
/// `(edge_type, gid1, gid2)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Schema tag for this edge.
    pub edge_type: u32,
    /// Parent identifier; routes the edge to its shard.
    pub gid1: Gid,
    /// Child identifier; opaque to routing.
    pub gid2: Gid,
    /// Monotonic per-`(edge_type, gid1)` revision, starting at 1.
    pub revision: u64,
    /// Tag describing how `data` is serialized.
    pub encoding: u32,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

/// A secondary index entry written alongside an edge version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index schema tag.
    pub index_type: u32,
    /// Indexed value; ordered lexicographically for range scans.
    pub value: String,
    /// When set, at most one `(index_type, value)` entry may exist.
    pub unique: bool,
}

impl IndexSpec {
    /// Creates a non-unique index entry.
    #[must_use]
    pub fn new(index_type: u32, value: impl Into<String>) -> Self {
        Self {
            index_type,
            value: value.into(),
            unique: false,
        }
    }

    /// Marks this entry as unique (builder pattern).
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// An inclusive index value range over one index type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    /// Index schema tag to scan.
    pub index_type: u32,
    /// Inclusive lower bound.
    pub start: String,
    /// Inclusive upper bound.
    pub end: String,
}

impl IndexQuery {
    /// Creates a range query over `[start, end]`.
    #[must_use]
    pub fn new(index_type: u32, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            index_type,
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Result of an add: the edge as written, plus whether an existing edge was
/// overwritten rather than a new one inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    /// The edge row as it now exists.
    pub edge: Edge,
    /// True when the write replaced an existing edge version.
    pub overwritten: bool,
}
