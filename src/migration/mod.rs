//! The migration entity, its direction, and the persisted version/dirty pair.

pub mod registry;

pub use registry::{DuplicateVersionError, Registry};

use crate::driver::{Driver, DriverError};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// `Up` runs a migration forward, `Down` reverts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Up => "applying",
            Self::Down => "reverting",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// `(version, dirty)` as persisted by a Driver. `version = None` means baseline.
///
/// Invariant upheld by the Runner: if `dirty`, `version` names the migration that
/// was in flight, never the last one that completed cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionState {
    pub version: Option<i64>,
    pub dirty: bool,
}

impl VersionState {
    pub const BASELINE: VersionState = VersionState { version: None, dirty: false };

    pub fn clean(version: Option<i64>) -> Self {
        VersionState { version, dirty: false }
    }

    pub fn dirty_at(version: i64) -> Self {
        VersionState { version: Some(version), dirty: true }
    }

    /// `-1` is the wire sentinel for "no version". Translates transparently at the
    /// Driver boundary so the persisted row stays wire-compatible with golang-migrate.
    pub fn from_wire(version: i64, dirty: bool) -> Self {
        VersionState { version: if version < 0 { None } else { Some(version) }, dirty }
    }

    pub fn to_wire(self) -> (i64, bool) {
        (self.version.unwrap_or(-1), self.dirty)
    }

    /// The reference rule (see DESIGN.md "Open question"): a row is written iff
    /// `version.is_some() || dirty`; otherwise the table is left empty.
    pub fn has_row(self) -> bool {
        self.version.is_some() || self.dirty
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A migration action: apply or revert against a driver, honoring cancellation.
pub type Action = Arc<
    dyn for<'a> Fn(
            &'a mut dyn Driver,
            &'a tokio_util::sync::CancellationToken,
        ) -> BoxFuture<'a, Result<(), MigrationError>>
        + Send
        + Sync,
>;

/// A single, immutable catalog entry. `version` is always positive.
#[derive(Clone)]
pub struct Migration {
    pub version: i64,
    pub description: String,
    pub apply: Action,
    pub revert: Action,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Migration {
    pub fn new(version: i64, description: impl Into<String>, apply: Action, revert: Action) -> Self {
        Migration { version, description: description.into(), apply, revert }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub struct MigrationError {
    pub kind: MigrationErrorKind,
}

#[derive(Debug)]
pub enum MigrationErrorKind {
    Driver(DriverError),
    NoScriptBody { version: i64, direction: Direction },
    Io { path: std::path::PathBuf, source: std::io::Error },
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MigrationErrorKind::Driver(e) => write!(f, "{e}"),
            MigrationErrorKind::NoScriptBody { version, direction } => {
                write!(f, "migration {version} has no {direction} script body")
            }
            MigrationErrorKind::Io { path, source } => {
                write!(f, "failed to read script body '{}': {source}", path.display())
            }
        }
    }
}

impl Error for MigrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            MigrationErrorKind::Driver(e) => Some(e),
            MigrationErrorKind::NoScriptBody { .. } => None,
            MigrationErrorKind::Io { source, .. } => Some(source),
        }
    }
}

impl From<DriverError> for MigrationError {
    fn from(error: DriverError) -> Self {
        MigrationError { kind: MigrationErrorKind::Driver(error) }
    }
}
