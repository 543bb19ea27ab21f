use crate::runner::RunnerError;
use crate::source::SourceError;

use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use tracing::subscriber::SetGlobalDefaultError;

#[derive(Debug)]
#[non_exhaustive]
pub struct CliError {
    pub kind: CliErrorKind,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            CliErrorKind::Runner(e) => Some(e),
            CliErrorKind::Source(e) => Some(e),
            CliErrorKind::IoDirectoryCreate { source, .. } => Some(source),
            CliErrorKind::IoFileWrite { source, .. } => Some(source),
            CliErrorKind::SetGlobalDefault(e) => Some(e),
        }
    }
}

#[derive(Debug)]
pub enum CliErrorKind {
    Runner(RunnerError),
    Source(SourceError),
    IoDirectoryCreate { source: std::io::Error, path: PathBuf },
    IoFileWrite { source: std::io::Error, path: PathBuf },
    SetGlobalDefault(SetGlobalDefaultError),
}

impl fmt::Display for CliErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runner(e) => write!(f, "{e}"),
            Self::Source(e) => write!(f, "{e}"),
            Self::IoDirectoryCreate { path, .. } => write!(f, "failed to create directory '{}'", path.display()),
            Self::IoFileWrite { path, .. } => write!(f, "failed to write file '{}'", path.display()),
            Self::SetGlobalDefault(e) => write!(f, "failed to set global default subscriber: {e}"),
        }
    }
}

impl From<RunnerError> for CliError {
    fn from(error: RunnerError) -> Self {
        CliError { kind: CliErrorKind::Runner(error) }
    }
}

impl From<SourceError> for CliError {
    fn from(error: SourceError) -> Self {
        CliError { kind: CliErrorKind::Source(error) }
    }
}

impl From<SetGlobalDefaultError> for CliError {
    fn from(error: SetGlobalDefaultError) -> Self {
        CliError { kind: CliErrorKind::SetGlobalDefault(error) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn display_formats_io_errors_with_path() {
        let err = CliError {
            kind: CliErrorKind::IoFileWrite {
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
                path: PathBuf::from("/tmp/1_seed.up.sql"),
            },
        };
        let text = err.to_string();
        assert!(text.contains("1_seed.up.sql"));
    }
}
