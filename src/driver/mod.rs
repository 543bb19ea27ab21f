//! The Driver contract: lock/unlock, version-state persistence, drop, and
//! (for Script Drivers) script execution. Kept `dyn`-compatible by returning
//! boxed futures directly rather than using native `async fn in trait` or the
//! `async-trait` macro, the same way `sqlx_core::migrate::Migrate` stays
//! object-safe across its own `Acquire`-erased connection types.

mod postgres;
mod statement_split;

pub use postgres::PostgresDriver;
pub use statement_split::split_statements;

use crate::migration::{BoxFuture, VersionState};
use std::error::Error;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
#[non_exhaustive]
pub struct DriverError {
    pub kind: DriverErrorKind,
}

#[derive(Debug)]
pub enum DriverErrorKind {
    LockTimeout { timeout: Duration },
    Lock(String),
    NotAScriptDriver,
    Sqlx(sqlx::Error),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverError: {}", self.kind)
    }
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockTimeout { timeout } => write!(f, "timed out after {timeout:?} acquiring the migration lock"),
            Self::Lock(msg) => write!(f, "failed to acquire or release the migration lock: {msg}"),
            Self::NotAScriptDriver => write!(f, "driver does not support script execution"),
            Self::Sqlx(e) => write!(f, "{e}"),
        }
    }
}

impl Error for DriverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            DriverErrorKind::Sqlx(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DriverError {
    fn from(error: sqlx::Error) -> Self {
        DriverError { kind: DriverErrorKind::Sqlx(error) }
    }
}

/// The capability set every Driver implements: locking, version-state
/// persistence, and namespace drop. Re-entrant `lock`/idempotent `unlock`,
/// per the contract.
pub trait Driver: Send {
    fn lock(&mut self) -> BoxFuture<'_, Result<(), DriverError>>;

    /// Always called from an uncancellable scope by the Runner; must not fail
    /// to release a held lock short of an unrecoverable connection loss.
    fn unlock(&mut self) -> BoxFuture<'_, Result<(), DriverError>>;

    /// May be called without holding the lock (best-effort read).
    fn version_state(&mut self) -> BoxFuture<'_, Result<VersionState, DriverError>>;

    fn set_version(&mut self, state: VersionState) -> BoxFuture<'_, Result<(), DriverError>>;

    fn drop_all(&mut self) -> BoxFuture<'_, Result<(), DriverError>>;

    /// Capability detection: migrations backed by a script body need the
    /// extended `ScriptDriver` capability; a custom `Migration::apply` does not.
    fn as_script_driver(&mut self) -> Option<&mut dyn ScriptDriver>;
}

/// A Driver specialization that accepts a textual script body and runs it.
pub trait ScriptDriver: Driver {
    fn execute_script(&mut self, body: &str) -> BoxFuture<'_, Result<(), DriverError>>;
}
