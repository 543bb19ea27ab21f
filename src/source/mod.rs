//! Catalog loading. A Source enumerates the full set of migrations exactly
//! once per Runner; it never interprets script content.

mod filesystem;

pub use filesystem::FilesystemSource;

use crate::migration::Migration;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
#[non_exhaustive]
pub struct SourceError {
    pub kind: SourceErrorKind,
}

#[derive(Debug)]
pub enum SourceErrorKind {
    InvalidDirectory(PathBuf),
    Io { path: PathBuf, source: std::io::Error },
    UnparseableFilename(String),
    DuplicatePair { version: i64, direction: crate::migration::Direction },
    MissingUpScript { version: i64 },
    NonPositiveVersion { version: i64 },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceError: {}", self.kind)
    }
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDirectory(path) => write!(f, "'{}' does not exist or is not a directory", path.display()),
            Self::Io { path, source } => write!(f, "failed to read '{}': {source}", path.display()),
            Self::UnparseableFilename(name) => write!(f, "unparseable migration filename: '{name}'"),
            Self::DuplicatePair { version, direction } => {
                write!(f, "duplicate {direction} script for version {version}")
            }
            Self::MissingUpScript { version } => write!(f, "version {version} has no up script"),
            Self::NonPositiveVersion { version } => write!(f, "migration version {version} is not positive"),
        }
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            SourceErrorKind::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Loads the complete, closed-set catalog of migrations. Must be deterministic
/// within a run and must enumerate fully before returning.
pub trait Source: Send + Sync {
    fn load(&self) -> Result<Vec<Migration>, SourceError>;
}
