mod cli;
mod driver;
mod migration;
mod runner;
mod source;

use cli::{commands, Cli, Commands, Parser};
use driver::PostgresDriver;
use runner::Runner;
use source::FilesystemSource;
use tokio_util::sync::CancellationToken;

/// Entry point for the schemadrift CLI. Wires the Runner onto a filesystem
/// Source rooted at `--source` and a Postgres Driver connected to
/// `--database`. A SIGINT/SIGTERM installs a CancellationToken so an
/// in-flight migration gets canceled rather than killed mid-write.
#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Cli::parse();

    if let Err(e) = cli::ux::setup_logging(args.verbose, args.quiet) {
        eprintln!("error: failed to set up logging: {e}");
        return std::process::ExitCode::from(1);
    }

    match run(args).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            std::process::ExitCode::from(1)
        }
    }
}

async fn run(args: Cli) -> Result<(), cli::error::CliError> {
    // `create` only touches the filesystem and never needs a database
    // connection, a lock, or a cancellation token.
    if let Commands::Create { name } = &args.command {
        return commands::create(&args.source, name);
    }

    let source = FilesystemSource::from_uri(&args.source);
    let driver = PostgresDriver::new(&args.database).with_lock_timeout(args.lock_timeout());
    let mut runner = Runner::new(Box::new(source), Box::new(driver)).with_prefetch(args.prefetch);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::warn!("shutdown signal received, canceling the in-flight migration");
        watcher.cancel();
    });

    match args.command {
        Commands::Up { n } => commands::up(&mut runner, n, &cancel).await,
        Commands::Down { n, all } => commands::down(&mut runner, n, all, &cancel).await,
        Commands::Steps { n } => commands::steps(&mut runner, n, &cancel).await,
        Commands::Goto { version } => commands::goto(&mut runner, version, &cancel).await,
        Commands::Force { version } => commands::force(&mut runner, version).await,
        Commands::Drop { force } => commands::drop(&mut runner, force).await,
        Commands::Version {} => commands::version(&mut runner).await,
        Commands::Create { .. } => unreachable!("handled above"),
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
