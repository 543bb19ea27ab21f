use crate::cli::error::{CliError, CliErrorKind};
use crate::cli::ux;
use crate::runner::Runner;

use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn up(runner: &mut Runner, n: Option<usize>, cancel: &CancellationToken) -> Result<(), CliError> {
    let applied = runner.up(n, cancel).await?;
    ux::show_steps_applied("applied", applied);
    Ok(())
}

pub async fn down(runner: &mut Runner, n: Option<usize>, all: bool, cancel: &CancellationToken) -> Result<(), CliError> {
    let limit = if all { None } else { Some(n.unwrap_or(1)) };
    let reverted = runner.down(limit, cancel).await?;
    ux::show_steps_applied("reverted", reverted);
    Ok(())
}

pub async fn steps(runner: &mut Runner, n: i64, cancel: &CancellationToken) -> Result<(), CliError> {
    let applied = runner.steps(n, cancel).await?;
    ux::show_steps_applied(if n >= 0 { "applied" } else { "reverted" }, applied);
    Ok(())
}

pub async fn goto(runner: &mut Runner, version: i64, cancel: &CancellationToken) -> Result<(), CliError> {
    let applied = runner.goto(version, cancel).await?;
    ux::show_steps_applied("ran", applied);
    Ok(())
}

pub async fn force(runner: &mut Runner, version: i64) -> Result<(), CliError> {
    runner.force(version).await?;
    tracing::info!(version, "version forced");
    Ok(())
}

pub async fn drop(runner: &mut Runner, force: bool) -> Result<(), CliError> {
    runner.drop(force).await?;
    tracing::info!("namespace dropped, reset to baseline");
    Ok(())
}

pub async fn version(runner: &mut Runner) -> Result<(), CliError> {
    let state = runner.version().await?;
    ux::show_version(state);
    Ok(())
}

/// Scaffolds `<next-version>_<name>.up.sql` / `.down.sql` in `source_root`, the
/// next version being one past the highest version currently present.
pub fn create(source_root: &str, name: &str) -> Result<(), CliError> {
    let root = Path::new(source_root.strip_prefix("file://").unwrap_or(source_root));
    fs::create_dir_all(root).map_err(|source| CliError { kind: CliErrorKind::IoDirectoryCreate { source, path: root.to_path_buf() } })?;

    let next_version = next_available_version(root)?;
    let slug = name.replace(' ', "_");

    let up_path = root.join(format!("{next_version}_{slug}.up.sql"));
    let down_path = root.join(format!("{next_version}_{slug}.down.sql"));

    fs::write(&up_path, "").map_err(|source| CliError { kind: CliErrorKind::IoFileWrite { source, path: up_path.clone() } })?;
    fs::write(&down_path, "").map_err(|source| CliError { kind: CliErrorKind::IoFileWrite { source, path: down_path.clone() } })?;

    tracing::info!(version = next_version, "created {}", up_path.display());
    tracing::info!(version = next_version, "created {}", down_path.display());
    Ok(())
}

fn next_available_version(root: &Path) -> Result<i64, CliError> {
    let entries = fs::read_dir(root).map_err(|source| CliError { kind: CliErrorKind::IoDirectoryCreate { source, path: root.to_path_buf() } })?;

    let mut highest = 0i64;
    for entry in entries {
        let entry = entry.map_err(|source| CliError { kind: CliErrorKind::IoDirectoryCreate { source, path: root.to_path_buf() } })?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
        let Some((version_str, _)) = name.split_once('_') else { continue };
        if let Ok(version) = version_str.parse::<i64>() {
            highest = highest.max(version);
        }
    }

    Ok(highest + 1)
}
