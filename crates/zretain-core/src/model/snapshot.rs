//! Snapshot identity
//!
//! Snapshots created by zretain are named after their creation time in
//! whole unix seconds, so name order is timeline order.

use crate::errors::ZrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of a managed snapshot: a second-granularity unix timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotName(u64);

impl SnapshotName {
    pub fn from_unix_seconds(secs: u64) -> Self {
        Self(secs)
    }

    pub fn unix_seconds(&self) -> u64 {
        self.0
    }

    /// Name for a snapshot taken now, strictly after `newest` when given
    ///
    /// Keeps names unique and monotonic even when two cycles land in the
    /// same second or the clock steps backwards.
    ///
    /// # Errors
    ///
    /// [`ZrError::InvalidSnapshotName`] when `newest` is `u64::MAX`, since no
    /// later name exists.
    pub fn next_after(now_unix_seconds: u64, newest: Option<SnapshotName>) -> Result<Self, ZrError> {
        match newest {
            Some(SnapshotName(prev)) if prev >= now_unix_seconds => prev
                .checked_add(1)
                .map(Self)
                .ok_or_else(|| ZrError::InvalidSnapshotName {
                    name: prev.to_string(),
                }),
            _ => Ok(Self(now_unix_seconds)),
        }
    }

    /// Parse a raw name, returning `None` for snapshots zretain does not manage
    pub fn parse_managed(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnapshotName {
    type Err = ZrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Reject signs, whitespace and leading zeros so that Display round-trips
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        if !canonical {
            return Err(ZrError::InvalidSnapshotName {
                name: s.to_string(),
            });
        }
        s.parse::<u64>()
            .map(SnapshotName)
            .map_err(|_| ZrError::InvalidSnapshotName {
                name: s.to_string(),
            })
    }
}

/// A snapshot of one dataset, `dataset@name`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    pub dataset: String,
    pub name: SnapshotName,
}

impl Snapshot {
    pub fn new(dataset: impl Into<String>, name: SnapshotName) -> Self {
        Self {
            dataset: dataset.into(),
            name,
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset, self.name)
    }
}

/// Split `dataset@name` into its parts without interpreting the name
pub fn split_snapshot_ref(reference: &str) -> Result<(&str, &str), ZrError> {
    match reference.split_once('@') {
        Some((dataset, name)) if !dataset.is_empty() && !name.is_empty() && !name.contains('@') => {
            Ok((dataset, name))
        }
        _ => Err(ZrError::InvalidSnapshotRef {
            reference: reference.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_name() {
        let name: SnapshotName = "1700000000".parse().unwrap();
        assert_eq!(name.unix_seconds(), 1_700_000_000);
        assert_eq!(name.to_string(), "1700000000");
    }

    #[test]
    fn test_foreign_names_are_not_managed() {
        assert!(SnapshotName::parse_managed("manual-before-upgrade").is_none());
        assert!(SnapshotName::parse_managed("+17").is_none());
        assert!(SnapshotName::parse_managed("0017").is_none());
        assert!(SnapshotName::parse_managed("").is_none());
    }

    #[test]
    fn test_next_after_is_strictly_monotonic() {
        let prev = SnapshotName::from_unix_seconds(100);
        let next = |now, newest| SnapshotName::next_after(now, newest).unwrap().unix_seconds();
        assert_eq!(next(100, Some(prev)), 101);
        assert_eq!(next(90, Some(prev)), 101);
        assert_eq!(next(150, Some(prev)), 150);
        assert_eq!(next(150, None), 150);
    }

    #[test]
    fn test_next_after_largest_name_fails() {
        let max: SnapshotName = "18446744073709551615".parse().unwrap();
        let err = SnapshotName::next_after(1_000, Some(max)).unwrap_err();
        assert!(matches!(err, ZrError::InvalidSnapshotName { .. }));
    }

    #[test]
    fn test_order_is_numeric_not_lexical() {
        let short = SnapshotName::from_unix_seconds(999);
        let long = SnapshotName::from_unix_seconds(1000);
        assert!(short < long);
    }

    #[test]
    fn test_snapshot_display() {
        let snap = Snapshot::new("tank/home", SnapshotName::from_unix_seconds(42));
        assert_eq!(snap.to_string(), "tank/home@42");
    }

    #[test]
    fn test_split_snapshot_ref() {
        assert_eq!(split_snapshot_ref("tank/a@5").unwrap(), ("tank/a", "5"));
        assert!(split_snapshot_ref("tank/a").is_err());
        assert!(split_snapshot_ref("@5").is_err());
        assert!(split_snapshot_ref("tank/a@").is_err());
    }
}
