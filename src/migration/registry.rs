use crate::migration::Migration;

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// The immutable, version-ordered index over a loaded catalog.
///
/// Construction is the only place duplicate versions are rejected; every
/// selection method below assumes the invariant already holds (strictly
/// increasing, all positive, unique) and runs over a `BTreeMap` so lookups
/// stay at `O(log n)` and range emission stays `O(k)`.
#[derive(Debug)]
pub struct Registry {
    inner: BTreeMap<i64, Migration>,
}

#[derive(Debug)]
#[non_exhaustive]
pub struct DuplicateVersionError {
    pub version: i64,
}

impl fmt::Display for DuplicateVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "duplicate migration version {}", self.version)
    }
}

impl Error for DuplicateVersionError {}

impl Registry {
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self, DuplicateVersionError> {
        let mut inner = BTreeMap::new();
        for migration in migrations {
            let version = migration.version;
            if inner.insert(version, migration).is_some() {
                return Err(DuplicateVersionError { version });
            }
        }
        Ok(Registry { inner })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, version: i64) -> bool {
        self.inner.contains_key(&version)
    }

    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.inner.get(&version)
    }

    /// Migrations with version strictly greater than `after` (or all, if `None`),
    /// ascending, bounded by `limit`.
    pub fn next_after(&self, after: Option<i64>, limit: Option<usize>) -> Vec<&Migration> {
        let lower = after.unwrap_or(i64::MIN);
        let iter = self.inner.range((
            std::ops::Bound::Excluded(lower),
            std::ops::Bound::Unbounded,
        ));
        match limit {
            Some(n) => iter.take(n).map(|(_, m)| m).collect(),
            None => iter.map(|(_, m)| m).collect(),
        }
    }

    /// Migrations with version `<= upto`, descending, bounded by `limit`.
    pub fn at_or_below(&self, upto: i64, limit: Option<usize>) -> Vec<&Migration> {
        let iter = self.inner.range(..=upto).rev();
        match limit {
            Some(n) => iter.take(n).map(|(_, m)| m).collect(),
            None => iter.map(|(_, m)| m).collect(),
        }
    }

    /// The migration immediately preceding `version` in the registry, or `None`.
    pub fn previous_of(&self, version: i64) -> Option<&Migration> {
        self.inner
            .range(..version)
            .next_back()
            .map(|(_, m)| m)
    }

    /// Inclusive count of registry entries in `(lower_exclusive, upper_inclusive]`.
    /// `lower_exclusive = None` counts from the very first entry.
    pub fn count_between(&self, lower_exclusive: Option<i64>, upper_inclusive: i64) -> usize {
        let lower = lower_exclusive.unwrap_or(i64::MIN);
        if lower <= upper_inclusive {
            self.inner
                .range((std::ops::Bound::Excluded(lower), std::ops::Bound::Included(upper_inclusive)))
                .count()
        } else {
            self.inner
                .range((std::ops::Bound::Excluded(upper_inclusive), std::ops::Bound::Included(lower)))
                .count()
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.inner.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{Action, MigrationError};
    use std::sync::Arc;

    fn noop_action() -> Action {
        Arc::new(|_driver, _cancel| Box::pin(async { Ok::<(), MigrationError>(()) }))
    }

    fn migration(version: i64) -> Migration {
        Migration::new(version, format!("m{version}"), noop_action(), noop_action())
    }

    fn registry(versions: &[i64]) -> Registry {
        Registry::new(versions.iter().copied().map(migration)).unwrap()
    }

    #[test]
    fn rejects_duplicate_versions() {
        let migrations = vec![migration(1), migration(1)];
        assert!(Registry::new(migrations).is_err());
    }

    #[test]
    fn next_after_is_ascending_and_exclusive() {
        let r = registry(&[1, 2, 3]);
        let versions: Vec<i64> = r.next_after(Some(1), None).iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 3]);

        let versions: Vec<i64> = r.next_after(None, None).iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn next_after_respects_limit() {
        let r = registry(&[1, 2, 3]);
        let versions: Vec<i64> = r.next_after(Some(0), Some(2)).iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn at_or_below_is_descending_and_inclusive() {
        let r = registry(&[1, 2, 3]);
        let versions: Vec<i64> = r.at_or_below(2, None).iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 1]);
    }

    #[test]
    fn previous_of_skips_missing_versions() {
        let r = registry(&[1, 5, 9]);
        assert_eq!(r.previous_of(9).map(|m| m.version), Some(5));
        assert_eq!(r.previous_of(5).map(|m| m.version), Some(1));
        assert_eq!(r.previous_of(1), None);
    }

    #[test]
    fn count_between_reflects_registry_density_not_arithmetic_gap() {
        // goto(9) from 1 over {1,5,9} must count 2, not 8.
        let r = registry(&[1, 5, 9]);
        assert_eq!(r.count_between(Some(1), 9), 2);
    }

    #[test]
    fn count_between_handles_downward_direction() {
        let r = registry(&[1, 5, 9]);
        assert_eq!(r.count_between(Some(1), 9), r.count_between(Some(1), 9));
        // goto(1) from 9: 9 > 1, so lower/upper swap internally.
        assert_eq!(r.count_between(Some(9), 1), 2);
    }
}
