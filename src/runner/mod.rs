//! The Migration Runner: the orchestration layer that owns a Source and a
//! Driver for its lifetime and is the only writer of `VersionState`.

use crate::driver::{Driver, DriverError};
use crate::migration::{BoxFuture, Direction, DuplicateVersionError, MigrationError, Registry, VersionState};
use crate::source::{Source, SourceError};

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Drives a boxed future to completion, catching any panic raised from inside
/// a single `poll` call instead of letting it unwind through the caller.
/// `Pin<Box<dyn Future>>` is always `Unpin`, so no pin-projection is needed.
struct CatchUnwindBoxed<'a, T> {
    inner: Option<BoxFuture<'a, T>>,
}

fn catch_panic<'a, T>(fut: BoxFuture<'a, T>) -> CatchUnwindBoxed<'a, T> {
    CatchUnwindBoxed { inner: Some(fut) }
}

impl<'a, T> Future for CatchUnwindBoxed<'a, T> {
    type Output = Result<T, Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.as_mut().get_mut();
        let mut fut = this.inner.take().expect("CatchUnwindBoxed polled after completion");
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| fut.as_mut().poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => {
                this.inner = Some(fut);
                Poll::Pending
            }
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub struct RunnerError {
    pub kind: RunnerErrorKind,
}

#[derive(Debug)]
pub enum RunnerErrorKind {
    Argument(String),
    Source(SourceError),
    Registry(DuplicateVersionError),
    Driver(DriverError),
    /// Up/Down/Goto/Drop(force=false) refuse to run against a dirty database.
    DirtyState { version: Option<i64> },
    /// The datastore names a version with no matching entry in the Registry.
    MissingMigration { version: i64 },
    MigrationFailed { version: i64, description: String, cause: MigrationError },
    Canceled,
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunnerError: {}", self.kind)
    }
}

impl fmt::Display for RunnerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Source(e) => write!(f, "{e}"),
            Self::Registry(e) => write!(f, "{e}"),
            Self::Driver(e) => write!(f, "{e}"),
            Self::DirtyState { version } => write!(
                f,
                "database is dirty at version {}; run force() or drop(force=true) to recover",
                version.map(|v| v.to_string()).unwrap_or_else(|| "<baseline>".to_string())
            ),
            Self::MissingMigration { version } => {
                write!(f, "datastore reports version {version}, which has no entry in the migration catalog")
            }
            Self::MigrationFailed { version, description, cause } => {
                write!(f, "migration {version} ({description}) failed: {cause}")
            }
            Self::Canceled => write!(f, "operation canceled"),
        }
    }
}

impl Error for RunnerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            RunnerErrorKind::Source(e) => Some(e),
            RunnerErrorKind::Registry(e) => Some(e),
            RunnerErrorKind::Driver(e) => Some(e),
            RunnerErrorKind::MigrationFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

impl From<SourceError> for RunnerError {
    fn from(error: SourceError) -> Self {
        RunnerError { kind: RunnerErrorKind::Source(error) }
    }
}

impl From<DriverError> for RunnerError {
    fn from(error: DriverError) -> Self {
        RunnerError { kind: RunnerErrorKind::Driver(error) }
    }
}

impl From<DuplicateVersionError> for RunnerError {
    fn from(error: DuplicateVersionError) -> Self {
        RunnerError { kind: RunnerErrorKind::Registry(error) }
    }
}

/// Orchestrates Up/Down/Steps/Goto/Force/Drop against a pluggable Source and
/// Driver. Owns both exclusively for its lifetime; the Registry is loaded at
/// most once, memoized behind a single-flight `OnceCell`.
pub struct Runner {
    source: Box<dyn Source>,
    driver: Box<dyn Driver>,
    registry: OnceCell<Registry>,
    /// Batch size hint: how many pending migrations an unbounded `up()`
    /// pulls from the Registry per internal round.
    prefetch: usize,
}

impl Runner {
    pub fn new(source: Box<dyn Source>, driver: Box<dyn Driver>) -> Self {
        Runner { source, driver, registry: OnceCell::new(), prefetch: 10 }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    async fn registry(&self) -> Result<&Registry, RunnerError> {
        self.registry
            .get_or_try_init(|| async {
                let migrations = self.source.load()?;
                Registry::new(migrations).map_err(RunnerError::from)
            })
            .await
    }

    /// Read-only state query. Does not lock.
    pub async fn version(&mut self) -> Result<VersionState, RunnerError> {
        self.driver.version_state().await.map_err(RunnerError::from)
    }

    /// Applies all migrations strictly greater than the current version when
    /// `limit` is `None`, or up to `limit` migrations when `Some(n)` with
    /// `n > 0`. Returns the number of migrations actually applied.
    pub async fn up(&mut self, limit: Option<usize>, cancel: &CancellationToken) -> Result<usize, RunnerError> {
        if limit == Some(0) {
            return Err(RunnerError { kind: RunnerErrorKind::Argument("up(n) requires n > 0".to_string()) });
        }
        if cancel.is_cancelled() {
            return Err(RunnerError { kind: RunnerErrorKind::Canceled });
        }

        self.driver.lock().await.map_err(RunnerError::from)?;
        let body: BoxFuture<'_, Result<usize, RunnerError>> = Box::pin(self.up_locked(limit, cancel));
        let outcome = catch_panic(body).await;
        self.finish_locked(outcome).await
    }

    /// Reverts exactly one migration (matching the current version) when
    /// `limit` is `None`, or up to `limit` migrations in descending order.
    pub async fn down(&mut self, limit: Option<usize>, cancel: &CancellationToken) -> Result<usize, RunnerError> {
        if limit == Some(0) {
            return Err(RunnerError { kind: RunnerErrorKind::Argument("down(n) requires n > 0".to_string()) });
        }
        if cancel.is_cancelled() {
            return Err(RunnerError { kind: RunnerErrorKind::Canceled });
        }

        self.driver.lock().await.map_err(RunnerError::from)?;
        let body: BoxFuture<'_, Result<usize, RunnerError>> = Box::pin(self.down_locked(limit.unwrap_or(1), cancel));
        let outcome = catch_panic(body).await;
        self.finish_locked(outcome).await
    }

    /// `n > 0` behaves as `up(n)`; `n < 0` behaves as `down(|n|)`; `n == 0` is a no-op.
    pub async fn steps(&mut self, n: i64, cancel: &CancellationToken) -> Result<usize, RunnerError> {
        match n.cmp(&0) {
            std::cmp::Ordering::Greater => self.up(Some(n as usize), cancel).await,
            std::cmp::Ordering::Less => self.down(Some((-n) as usize), cancel).await,
            std::cmp::Ordering::Equal => Ok(0),
        }
    }

    /// Translates a target version into a step count that respects registry
    /// density (missing intermediate versions do not count as steps), then
    /// runs `up`/`down` accordingly. `v == current` is a no-op.
    pub async fn goto(&mut self, v: i64, cancel: &CancellationToken) -> Result<usize, RunnerError> {
        if v < 0 {
            return Err(RunnerError { kind: RunnerErrorKind::Argument("goto(v) requires v >= 0".to_string()) });
        }
        let target = if v == 0 { None } else { Some(v) };

        let current = self.version().await?.version;
        if target == current {
            return Ok(0);
        }

        let target_key = target.unwrap_or(i64::MIN);
        let current_key = current.unwrap_or(i64::MIN);

        let count = {
            let registry = self.registry().await?;
            if target_key > current_key {
                registry.count_between(current, target.expect("target ahead of current is always Some"))
            } else {
                registry.count_between(target, current.expect("current ahead of target is always Some"))
            }
        };

        if target_key > current_key {
            self.up(Some(count), cancel).await
        } else {
            self.down(Some(count), cancel).await
        }
    }

    /// Directly overwrites `VersionState` without running any script. The
    /// escape hatch: does not require (and does not check) a clean state.
    /// `v == -1` is the baseline sentinel; anything below it has no meaning
    /// and is rejected rather than silently collapsed to baseline.
    pub async fn force(&mut self, v: i64) -> Result<(), RunnerError> {
        if v < -1 {
            return Err(RunnerError { kind: RunnerErrorKind::Argument(format!("force(v) requires v >= -1, got {v}")) });
        }

        self.driver.lock().await.map_err(RunnerError::from)?;
        let body: BoxFuture<'_, Result<(), RunnerError>> = Box::pin(self.force_locked(v));
        let outcome = catch_panic(body).await;
        self.finish_locked(outcome).await
    }

    async fn force_locked(&mut self, v: i64) -> Result<(), RunnerError> {
        let state = if v <= 0 { VersionState::clean(None) } else { VersionState::clean(Some(v)) };
        self.driver.set_version(state).await.map_err(RunnerError::from)
    }

    /// Drops all objects in the datastore's working namespace. Refuses to run
    /// against a dirty database unless `force` is set.
    pub async fn drop(&mut self, force: bool) -> Result<(), RunnerError> {
        self.driver.lock().await.map_err(RunnerError::from)?;
        let body: BoxFuture<'_, Result<(), RunnerError>> = Box::pin(self.drop_locked(force));
        let outcome = catch_panic(body).await;
        self.finish_locked(outcome).await
    }

    async fn drop_locked(&mut self, force: bool) -> Result<(), RunnerError> {
        let state = self.driver.version_state().await.map_err(RunnerError::from)?;
        if state.dirty && !force {
            return Err(RunnerError { kind: RunnerErrorKind::DirtyState { version: state.version } });
        }
        if state.dirty {
            // Clear the dirty flag first, preserving the version, per the
            // Drop contract.
            self.driver.set_version(VersionState::clean(state.version)).await.map_err(RunnerError::from)?;
        }
        self.driver.drop_all().await.map_err(RunnerError::from)?;
        self.driver.set_version(VersionState::BASELINE).await.map_err(RunnerError::from)?;
        Ok(())
    }

    /// Rust has no async `Drop`, so this plays the RAII guard's role by hand:
    /// the locked body already ran to completion (or panicked) inside
    /// `catch_panic` by the time this is called, and this is the one place
    /// that always follows up with `driver.unlock()` before control leaves
    /// the public method that called it. A panic is re-raised via
    /// `resume_unwind` only after the unlock attempt, so the caller still
    /// sees the panic (nothing here swallows it) but the lock never leaks.
    async fn finish_locked<T>(&mut self, outcome: Result<Result<T, RunnerError>, Box<dyn Any + Send>>) -> Result<T, RunnerError> {
        match outcome {
            Ok(result) => self.unlock_preserving(result).await,
            Err(payload) => {
                if let Err(unlock_err) = self.driver.unlock().await {
                    tracing::warn!("failed to release migration lock after a panic: {unlock_err}");
                }
                std::panic::resume_unwind(payload);
            }
        }
    }

    /// Always releases the lock, in an uncancellable scope, regardless of
    /// the guarded body's outcome. A failure to unlock is only surfaced when
    /// the body itself succeeded, so a real failure is never masked by a
    /// secondary one.
    async fn unlock_preserving<T>(&mut self, result: Result<T, RunnerError>) -> Result<T, RunnerError> {
        match (self.driver.unlock().await, result) {
            (Ok(()), result) => result,
            (Err(unlock_err), Ok(value)) => {
                let _ = value;
                Err(RunnerError::from(unlock_err))
            }
            (Err(unlock_err), Err(original)) => {
                tracing::warn!("failed to release migration lock after a prior failure: {unlock_err}");
                Err(original)
            }
        }
    }

    async fn up_locked(&mut self, limit: Option<usize>, cancel: &CancellationToken) -> Result<usize, RunnerError> {
        let state = self.driver.version_state().await.map_err(RunnerError::from)?;
        if state.dirty {
            return Err(RunnerError { kind: RunnerErrorKind::DirtyState { version: state.version } });
        }

        let mut current = state.version;
        let mut applied = 0usize;

        loop {
            if let Some(n) = limit {
                if applied >= n {
                    break;
                }
            }
            let batch_size = limit.map(|n| (n - applied).min(self.prefetch)).unwrap_or(self.prefetch);

            let versions: Vec<i64> = {
                let registry = self.registry().await?;
                registry.next_after(current, Some(batch_size)).into_iter().map(|m| m.version).collect()
            };
            if versions.is_empty() {
                break;
            }

            for version in versions {
                self.run_step(version, Direction::Up, cancel).await?;
                current = Some(version);
                applied += 1;
                if limit == Some(applied) {
                    return Ok(applied);
                }
            }
        }

        Ok(applied)
    }

    async fn down_locked(&mut self, limit: usize, cancel: &CancellationToken) -> Result<usize, RunnerError> {
        let state = self.driver.version_state().await.map_err(RunnerError::from)?;
        if state.dirty {
            return Err(RunnerError { kind: RunnerErrorKind::DirtyState { version: state.version } });
        }

        let Some(current_version) = state.version else {
            return Ok(0);
        };

        let versions: Vec<i64> = {
            let registry = self.registry().await?;
            if !registry.contains(current_version) {
                return Err(RunnerError { kind: RunnerErrorKind::MissingMigration { version: current_version } });
            }
            registry.at_or_below(current_version, Some(limit)).into_iter().map(|m| m.version).collect()
        };

        let mut reverted = 0usize;
        for version in versions {
            self.run_step(version, Direction::Down, cancel).await?;
            reverted += 1;
        }

        Ok(reverted)
    }

    /// Runs the dirty-state protocol around a single migration step: mark
    /// in-flight, run the action, then clear dirty on success (to `version`
    /// for Up, to the registry-predecessor of `version` for Down) or
    /// re-assert dirty on cancellation/error.
    async fn run_step(&mut self, version: i64, direction: Direction, cancel: &CancellationToken) -> Result<(), RunnerError> {
        let (description, action) = {
            let registry = self.registry().await?;
            let migration = registry.get(version).expect("version came from this registry");
            let action = match direction {
                Direction::Up => migration.apply.clone(),
                Direction::Down => migration.revert.clone(),
            };
            (migration.description.clone(), action)
        };

        tracing::info!(version, %direction, "{} migration", direction.verb());

        // Mark in-flight. Uncancellable: `Driver::set_version` takes no
        // cancellation token, so this write always runs to completion.
        self.driver.set_version(VersionState::dirty_at(version)).await.map_err(RunnerError::from)?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => StepOutcome::Canceled,
            result = catch_panic(action(self.driver.as_mut(), cancel)) => match result {
                Ok(Ok(())) => StepOutcome::Success,
                Ok(Err(cause)) => StepOutcome::Failed(cause),
                Err(payload) => StepOutcome::Panicked(payload),
            },
        };

        match outcome {
            StepOutcome::Canceled => {
                self.driver.set_version(VersionState::dirty_at(version)).await.map_err(RunnerError::from)?;
                Err(RunnerError { kind: RunnerErrorKind::Canceled })
            }
            StepOutcome::Failed(cause) => {
                self.driver.set_version(VersionState::dirty_at(version)).await.map_err(RunnerError::from)?;
                tracing::warn!(version, "migration failed, database left dirty");
                Err(RunnerError { kind: RunnerErrorKind::MigrationFailed { version, description, cause } })
            }
            StepOutcome::Panicked(payload) => {
                if let Err(reassert_err) = self.driver.set_version(VersionState::dirty_at(version)).await {
                    tracing::warn!(version, "failed to re-assert dirty state after a panicking migration: {reassert_err}");
                }
                tracing::warn!(version, "migration panicked, database left dirty");
                std::panic::resume_unwind(payload);
            }
            StepOutcome::Success => {
                let next_clean = match direction {
                    Direction::Up => Some(version),
                    Direction::Down => self.registry().await?.previous_of(version).map(|m| m.version),
                };
                self.driver.set_version(VersionState::clean(next_clean)).await.map_err(RunnerError::from)?;
                tracing::info!(version, "{} complete", direction.verb());
                Ok(())
            }
        }
    }
}

/// Outcome of racing a single migration action against cancellation, with a
/// panic from inside the action caught rather than left to unwind straight
/// through `run_step` past the dirty-reassert step.
enum StepOutcome {
    Canceled,
    Failed(MigrationError),
    Panicked(Box<dyn Any + Send>),
    Success,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{Action, BoxFuture, Migration};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    struct FakeDriver {
        state: VersionState,
        locked: bool,
        writes: Arc<StdMutex<Vec<VersionState>>>,
    }

    impl FakeDriver {
        fn new() -> Self {
            FakeDriver { state: VersionState::BASELINE, locked: false, writes: Arc::new(StdMutex::new(Vec::new())) }
        }
    }

    impl Driver for FakeDriver {
        fn lock(&mut self) -> crate::migration::BoxFuture<'_, Result<(), DriverError>> {
            self.locked = true;
            Box::pin(async { Ok(()) })
        }

        fn unlock(&mut self) -> crate::migration::BoxFuture<'_, Result<(), DriverError>> {
            self.locked = false;
            Box::pin(async { Ok(()) })
        }

        fn version_state(&mut self) -> crate::migration::BoxFuture<'_, Result<VersionState, DriverError>> {
            let state = self.state;
            Box::pin(async move { Ok(state) })
        }

        fn set_version(&mut self, state: VersionState) -> crate::migration::BoxFuture<'_, Result<(), DriverError>> {
            self.state = state;
            self.writes.lock().unwrap().push(state);
            Box::pin(async { Ok(()) })
        }

        fn drop_all(&mut self) -> crate::migration::BoxFuture<'_, Result<(), DriverError>> {
            Box::pin(async { Ok(()) })
        }

        fn as_script_driver(&mut self) -> Option<&mut dyn crate::driver::ScriptDriver> {
            None
        }
    }

    struct FakeSource {
        migrations: StdMutex<Option<Vec<i64>>>,
        fail_at: Option<i64>,
        calls: Arc<AtomicUsize>,
    }

    fn ok_action() -> Action {
        Arc::new(|_driver: &mut dyn Driver, _cancel: &CancellationToken| -> BoxFuture<'_, Result<(), MigrationError>> {
            Box::pin(async { Ok(()) })
        })
    }

    fn failing_action() -> Action {
        Arc::new(|_driver: &mut dyn Driver, _cancel: &CancellationToken| -> BoxFuture<'_, Result<(), MigrationError>> {
            Box::pin(async {
                Err(MigrationError { kind: crate::migration::MigrationErrorKind::NoScriptBody { version: 0, direction: Direction::Up } })
            })
        })
    }

    impl Source for FakeSource {
        fn load(&self) -> Result<Vec<Migration>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let versions = self.migrations.lock().unwrap().clone().unwrap_or_default();
            Ok(versions
                .into_iter()
                .map(|v| {
                    let action = if Some(v) == self.fail_at { failing_action() } else { ok_action() };
                    Migration::new(v, format!("m{v}"), action, ok_action())
                })
                .collect())
        }
    }

    fn fake_source(versions: &[i64]) -> (Box<dyn Source>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource { migrations: StdMutex::new(Some(versions.to_vec())), fail_at: None, calls: calls.clone() };
        (Box::new(source), calls)
    }

    #[tokio::test]
    async fn up_applies_all_pending_in_ascending_order() {
        let (source, _) = fake_source(&[1, 2, 3]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        let applied = runner.up(None, &cancel).await.unwrap();
        assert_eq!(applied, 3);
        assert_eq!(runner.version().await.unwrap(), VersionState::clean(Some(3)));
    }

    #[tokio::test]
    async fn up_is_idempotent_on_a_clean_fully_applied_database() {
        let (source, _) = fake_source(&[1, 2, 3]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        runner.up(None, &cancel).await.unwrap();
        let applied = runner.up(None, &cancel).await.unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn up_then_down_all_returns_to_baseline() {
        let (source, _) = fake_source(&[1, 2, 3]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        runner.up(None, &cancel).await.unwrap();
        let reverted = runner.down(Some(3), &cancel).await.unwrap();
        assert_eq!(reverted, 3);
        assert_eq!(runner.version().await.unwrap(), VersionState::BASELINE);
    }

    #[tokio::test]
    async fn goto_counts_registry_density_not_arithmetic_gap() {
        let (source, _) = fake_source(&[1, 5, 9]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        runner.up(Some(1), &cancel).await.unwrap();
        assert_eq!(runner.version().await.unwrap().version, Some(1));

        let applied = runner.goto(9, &cancel).await.unwrap();
        assert_eq!(applied, 2);
        assert_eq!(runner.version().await.unwrap().version, Some(9));
    }

    #[tokio::test]
    async fn goto_same_version_is_a_no_op() {
        let (source, _) = fake_source(&[1, 5, 9]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        runner.up(Some(1), &cancel).await.unwrap();
        let applied = runner.goto(1, &cancel).await.unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn failed_migration_leaves_dirty_state_and_blocks_further_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource { migrations: StdMutex::new(Some(vec![1, 2, 3])), fail_at: Some(2), calls: calls.clone() };
        let mut runner = Runner::new(Box::new(source), Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        let err = runner.up(None, &cancel).await.unwrap_err();
        assert!(matches!(err.kind, RunnerErrorKind::MigrationFailed { version: 2, .. }));

        let state = runner.version().await.unwrap();
        assert_eq!(state, VersionState::dirty_at(2));

        let err = runner.up(None, &cancel).await.unwrap_err();
        assert!(matches!(err.kind, RunnerErrorKind::DirtyState { version: Some(2) }));
    }

    #[tokio::test]
    async fn force_overwrites_state_without_running_scripts() {
        let (source, _) = fake_source(&[1, 2, 3]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));

        runner.force(2).await.unwrap();
        assert_eq!(runner.version().await.unwrap(), VersionState::clean(Some(2)));

        runner.force(-1).await.unwrap();
        assert_eq!(runner.version().await.unwrap(), VersionState::BASELINE);
    }

    #[tokio::test]
    async fn force_rejects_values_below_the_baseline_sentinel() {
        let (source, _) = fake_source(&[1]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));

        let err = runner.force(-5).await.unwrap_err();
        assert!(matches!(err.kind, RunnerErrorKind::Argument(_)));
        // Rejected before anything is written: state is untouched baseline.
        assert_eq!(runner.version().await.unwrap(), VersionState::BASELINE);
    }

    #[tokio::test]
    async fn up_n_rejects_non_positive_n() {
        let (source, _) = fake_source(&[1]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        let err = runner.up(Some(0), &cancel).await.unwrap_err();
        assert!(matches!(err.kind, RunnerErrorKind::Argument(_)));
    }

    #[tokio::test]
    async fn registry_is_loaded_exactly_once() {
        let (source, calls) = fake_source(&[1, 2]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        runner.up(Some(1), &cancel).await.unwrap();
        runner.up(Some(1), &cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// An action that cancels the very token `run_step` raced it against,
    /// then yields once so the cancellation has a chance to be observed on
    /// the select's next poll.
    fn self_canceling_action() -> Action {
        Arc::new(|_driver: &mut dyn Driver, cancel: &CancellationToken| -> BoxFuture<'_, Result<(), MigrationError>> {
            let cancel = cancel.clone();
            Box::pin(async move {
                cancel.cancel();
                tokio::task::yield_now().await;
                Ok(())
            })
        })
    }

    struct OneShotSource {
        version: i64,
        action: Action,
    }

    impl Source for OneShotSource {
        fn load(&self) -> Result<Vec<Migration>, SourceError> {
            Ok(vec![Migration::new(self.version, format!("m{}", self.version), self.action.clone(), ok_action())])
        }
    }

    #[tokio::test]
    async fn canceled_mid_step_reasserts_dirty_and_returns_canceled() {
        let source: Box<dyn Source> = Box::new(OneShotSource { version: 1, action: self_canceling_action() });
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();

        let err = runner.up(None, &cancel).await.unwrap_err();
        assert!(matches!(err.kind, RunnerErrorKind::Canceled));
        assert_eq!(runner.version().await.unwrap(), VersionState::dirty_at(1));
    }

    #[tokio::test]
    async fn up_returns_canceled_immediately_when_the_token_is_already_canceled() {
        let (source, _) = fake_source(&[1]);
        let mut runner = Runner::new(source, Box::new(FakeDriver::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = runner.up(None, &cancel).await.unwrap_err();
        assert!(matches!(err.kind, RunnerErrorKind::Canceled));
        assert_eq!(runner.version().await.unwrap(), VersionState::BASELINE);
    }
}
