//! Global identifier model.
//!
//! A [`Gid`] packs a colocation id into its high 32 bits and a per-colocation
//! counter into its low 32 bits. The colocation id is the unit of locality:
//! it selects the shard that owns every edge rooted at the gid, so routing
//! stays stable for the lifetime of the data. Counters are allocated
//! monotonically per colocation and never reused.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest valid colocation id. Colocation ids live in `[1, MAX_COLO]`.
pub const MAX_COLO: u32 = u32::MAX;

/// Counter value reserved for colocation lock probes.
///
/// Normal allocation starts at 1, so counter 0 only ever exists as the row
/// written by a lock probe.
pub(crate) const LOCK_COUNTER: u32 = 0;

/// A 64-bit global identifier: `(colo << 32) | counter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(u64);

impl Gid {
    /// Composes a gid from a colocation id and a counter.
    #[must_use]
    pub const fn new(colo: u32, counter: u32) -> Self {
        Self(((colo as u64) << 32) | counter as u64)
    }

    /// Reconstructs a gid from its raw 64-bit value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the colocation id (high 32 bits).
    #[must_use]
    pub const fn colo(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the per-colocation counter (low 32 bits).
    #[must_use]
    pub const fn counter(self) -> u32 {
        self.0 as u32
    }

    /// SQLite integers are 64-bit signed; gids round-trip by bit-cast so the
    /// full unsigned range survives storage.
    pub(crate) const fn to_db(self) -> i64 {
        self.0 as i64
    }

    pub(crate) const fn from_db(value: i64) -> Self {
        Self(value as u64)
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Gid {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<u64> for Gid {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Rejects colocation ids outside `[1, MAX_COLO]`.
pub(crate) fn check_colo(colo: u32) -> Result<()> {
    if colo == 0 {
        return Err(Error::InvalidColo(colo));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_pack_unpack() {
        let gid = Gid::new(5, 1);
        assert_eq!(gid.raw(), (5 << 32) | 1);
        assert_eq!(gid.colo(), 5);
        assert_eq!(gid.counter(), 1);
    }

    #[test]
    fn test_max_colo_survives_db_cast() {
        let gid = Gid::new(MAX_COLO, 7);
        assert_eq!(Gid::from_db(gid.to_db()), gid);
        assert_eq!(gid.colo(), MAX_COLO);
    }

    #[test]
    fn test_check_colo_rejects_zero() {
        assert!(check_colo(0).is_err());
        assert!(check_colo(1).is_ok());
        assert!(check_colo(MAX_COLO).is_ok());
    }

    #[test]
    fn test_display_from_str_roundtrip() {
        let gid = Gid::new(42, 9);
        let parsed: Gid = gid.to_string().parse().unwrap();
        assert_eq!(parsed, gid);
    }

    proptest! {
        #[test]
        fn prop_pack_unpack_roundtrip(colo: u32, counter: u32) {
            let gid = Gid::new(colo, counter);
            prop_assert_eq!(gid.colo(), colo);
            prop_assert_eq!(gid.counter(), counter);
        }

        #[test]
        fn prop_db_cast_roundtrip(raw: u64) {
            let gid = Gid::from_raw(raw);
            prop_assert_eq!(Gid::from_db(gid.to_db()), gid);
        }
    }
}
