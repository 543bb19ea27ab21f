//! The reference Source: a directory of `<version>_<description>.<up|down>.<ext>`
//! files. Bodies are read from disk lazily, at most once per migration action,
//! the same way the reference crate's `Migration::from_file` deferred parsing
//! until a version actually fell inside the requested interval.

use super::{SourceError, SourceErrorKind};
use crate::driver::{Driver, DriverError, DriverErrorKind};
use crate::migration::{Action, BoxFuture, Direction, Migration, MigrationError, MigrationErrorKind};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A directory-backed `Source`. Recognizes `<version>_<description>.<up|down>.<ext>`;
/// any other entry in the directory is ignored.
pub struct FilesystemSource {
    root: PathBuf,
}

impl FilesystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemSource { root: root.into() }
    }

    /// Accepts `file://<path>` or a bare path, matching the CLI's `--source` flag.
    pub fn from_uri(uri: &str) -> Self {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        Self::new(path)
    }
}

struct ParsedName {
    version: i64,
    description: String,
    direction: Direction,
}

fn parse_filename(name: &str) -> Option<ParsedName> {
    let (version_str, rest) = name.split_once('_')?;
    if version_str.is_empty() || !version_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version: i64 = version_str.parse().ok()?;

    // rest looks like "create_users.up.sql" — split from the right so the
    // description itself may contain dots (an unusual but not forbidden file stem).
    let mut parts = rest.rsplitn(3, '.');
    let _ext = parts.next()?;
    let direction_str = parts.next()?;
    let description = parts.next()?;

    let direction = match direction_str.to_ascii_lowercase().as_str() {
        "up" => Direction::Up,
        "down" => Direction::Down,
        _ => return None,
    };

    Some(ParsedName {
        version,
        description: description.replace('_', " "),
        direction,
    })
}

fn script_action(path: PathBuf) -> Action {
    Arc::new(move |driver: &mut dyn Driver, _cancel: &tokio_util::sync::CancellationToken| {
        let path = path.clone();
        let fut: BoxFuture<'_, Result<(), MigrationError>> = Box::pin(async move {
            let script_driver = driver.as_script_driver().ok_or_else(|| {
                MigrationError::from(DriverError { kind: DriverErrorKind::NotAScriptDriver })
            })?;
            let body = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| MigrationError { kind: MigrationErrorKind::Io { path: path.clone(), source } })?;
            script_driver.execute_script(&body).await?;
            Ok(())
        });
        fut
    })
}

fn missing_action(version: i64, direction: Direction) -> Action {
    Arc::new(move |_driver: &mut dyn Driver, _cancel: &tokio_util::sync::CancellationToken| {
        let fut: BoxFuture<'_, Result<(), MigrationError>> =
            Box::pin(async move { Err(MigrationError { kind: MigrationErrorKind::NoScriptBody { version, direction } }) });
        fut
    })
}

impl super::Source for FilesystemSource {
    fn load(&self) -> Result<Vec<Migration>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError { kind: SourceErrorKind::InvalidDirectory(self.root.clone()) });
        }

        let entries = fs::read_dir(&self.root)
            .map_err(|source| SourceError { kind: SourceErrorKind::Io { path: self.root.clone(), source } })?;

        let mut up: BTreeMap<i64, (String, PathBuf)> = BTreeMap::new();
        let mut down: BTreeMap<i64, PathBuf> = BTreeMap::new();

        for entry in entries {
            let entry = entry.map_err(|source| SourceError { kind: SourceErrorKind::Io { path: self.root.clone(), source } })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(parsed) = parse_filename(name) else { continue };

            if parsed.version <= 0 {
                return Err(SourceError { kind: SourceErrorKind::NonPositiveVersion { version: parsed.version } });
            }

            match parsed.direction {
                Direction::Up => {
                    if up.insert(parsed.version, (parsed.description, path)).is_some() {
                        return Err(SourceError {
                            kind: SourceErrorKind::DuplicatePair { version: parsed.version, direction: Direction::Up },
                        });
                    }
                }
                Direction::Down => {
                    if down.insert(parsed.version, path).is_some() {
                        return Err(SourceError {
                            kind: SourceErrorKind::DuplicatePair { version: parsed.version, direction: Direction::Down },
                        });
                    }
                }
            }
        }

        let mut migrations = Vec::with_capacity(up.len());
        for (version, (description, up_path)) in up {
            let apply = script_action(up_path);
            let revert = match down.remove(&version) {
                Some(down_path) => script_action(down_path),
                None => missing_action(version, Direction::Down),
            };
            migrations.push(Migration::new(version, description, apply, revert));
        }

        if let Some((&version, _)) = down.iter().next() {
            return Err(SourceError { kind: SourceErrorKind::MissingUpScript { version } });
        }

        Ok(migrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_description_and_direction() {
        let parsed = parse_filename("0001_create_users.up.sql").unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.description, "create users");
        assert!(matches!(parsed.direction, Direction::Up));
    }

    #[test]
    fn direction_is_case_insensitive() {
        let parsed = parse_filename("2_seed.DOWN.sql").unwrap();
        assert!(matches!(parsed.direction, Direction::Down));
    }

    #[test]
    fn ignores_filenames_without_an_underscore() {
        assert!(parse_filename("README.md").is_none());
    }

    #[test]
    fn ignores_filenames_with_non_numeric_version() {
        assert!(parse_filename("abc_thing.up.sql").is_none());
    }

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn load_pairs_up_and_down_by_version() {
        let dir = tempdir();
        write(&dir, "1_create_users.up.sql", "CREATE TABLE users();");
        write(&dir, "1_create_users.down.sql", "DROP TABLE users;");
        write(&dir, "2_add_email.up.sql", "ALTER TABLE users ADD email TEXT;");

        let source = FilesystemSource::new(&dir);
        let migrations = super::super::Source::load(&source).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[0].description, "create users");
        assert_eq!(migrations[1].version, 2);
    }

    #[test]
    fn load_rejects_duplicate_up_pair() {
        let dir = tempdir();
        write(&dir, "1_a.up.sql", "SELECT 1;");
        write(&dir, "1_b.up.sql", "SELECT 2;");

        let source = FilesystemSource::new(&dir);
        let err = super::super::Source::load(&source).unwrap_err();
        assert!(matches!(err.kind, SourceErrorKind::DuplicatePair { version: 1, direction: Direction::Up }));
    }

    #[test]
    fn load_rejects_down_without_up() {
        let dir = tempdir();
        write(&dir, "1_a.down.sql", "SELECT 1;");

        let source = FilesystemSource::new(&dir);
        let err = super::super::Source::load(&source).unwrap_err();
        assert!(matches!(err.kind, SourceErrorKind::MissingUpScript { version: 1 }));
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("schemadrift-test-{}-{}", std::process::id(), NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed)));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
}
