pub mod commands;
pub mod error;
pub mod ux;

pub use clap::Parser;
use clap::Subcommand;

use std::time::Duration;

/// Top-level CLI shell wiring the library's Runner onto a filesystem Source
/// and a Postgres Driver.
#[derive(Parser)]
#[command(name = "schemadrift", version, about = "schemadrift applies and reverts versioned SQL migrations against a Postgres database.")]
pub struct Cli {
    #[arg(
        long = "source",
        help = "Directory (or file:// URI) containing migration scripts",
        env = "SCHEMADRIFT_SOURCE",
    )]
    pub source: String,

    #[arg(
        long = "database",
        help = "Database connection string, e.g. postgresql://<user>:<password>@<host>:<port>/<database>",
        env = "SCHEMADRIFT_DATABASE",
        hide_env_values = true,
    )]
    pub database: String,

    #[arg(
        long = "lock-timeout",
        help = "Seconds to wait for the migration lock before giving up",
        default_value_t = 15,
        env = "SCHEMADRIFT_LOCK_TIMEOUT",
    )]
    pub lock_timeout_secs: u64,

    #[arg(
        long = "prefetch",
        help = "How many pending migrations the Runner pulls from the registry per internal batch",
        default_value_t = 10,
        env = "SCHEMADRIFT_PREFETCH",
    )]
    pub prefetch: usize,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Set level of verbosity. [default: INFO]\n\t-v: DEBUG\n\t-vv: TRACE\n--quiet takes precedence over --verbose.",
    )]
    pub verbose: u8,

    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Disable all informational logs (only ERROR level logs are shown).\n--quiet takes precedence over --verbose.",
    )]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply pending migrations forward. With no N, applies all pending migrations.")]
    Up {
        #[arg(help = "Apply at most N pending migrations")]
        n: Option<usize>,
    },

    #[command(about = "Revert applied migrations. With no N, reverts exactly one.")]
    Down {
        #[arg(help = "Revert at most N migrations")]
        n: Option<usize>,

        #[arg(long, conflicts_with = "n", help = "Revert every applied migration")]
        all: bool,
    },

    #[command(about = "Apply (N > 0) or revert (N < 0) exactly |N| migrations.")]
    Steps {
        #[arg(allow_hyphen_values = true)]
        n: i64,
    },

    #[command(about = "Migrate to a specific version (0 means baseline).")]
    Goto { version: i64 },

    #[command(about = "Overwrite the persisted version/dirty state without running any script.")]
    Force {
        #[arg(allow_hyphen_values = true)]
        version: i64,
    },

    #[command(about = "Drop every object in the datastore's working namespace and reset to baseline.")]
    Drop {
        #[arg(long, help = "Drop even if the database is currently dirty")]
        force: bool,
    },

    #[command(about = "Print the current version and dirty state.")]
    Version {},

    #[command(about = "Scaffold a new <next-version>_<name>.up.sql / .down.sql pair in the source directory.")]
    Create { name: String },
}

impl std::fmt::Display for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Commands::Up { .. } => "up",
            Commands::Down { .. } => "down",
            Commands::Steps { .. } => "steps",
            Commands::Goto { .. } => "goto",
            Commands::Force { .. } => "force",
            Commands::Drop { .. } => "drop",
            Commands::Version {} => "version",
            Commands::Create { .. } => "create",
        };
        write!(f, "{name}")
    }
}
