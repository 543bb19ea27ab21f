use crate::migration::VersionState;

pub fn setup_logging(verbose: u8, quiet: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = if quiet {
        tracing::Level::ERROR
    } else {
        match verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder().with_max_level(level).finish();

    tracing::subscriber::set_global_default(subscriber)
}

pub fn show_version(state: VersionState) {
    match (state.version, state.dirty) {
        (Some(version), false) => println!("{version}"),
        (Some(version), true) => println!("{version} (dirty)"),
        (None, false) => println!("baseline (no migrations applied)"),
        (None, true) => println!("baseline (dirty)"),
    }
}

pub fn show_steps_applied(verb: &str, count: usize) {
    match count {
        0 => println!("nothing to {verb}"),
        1 => println!("{verb} 1 migration"),
        n => println!("{verb} {n} migrations"),
    }
}
