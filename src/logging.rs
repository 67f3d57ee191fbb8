//! Diagnostic logging on stderr via `tracing`.
//!
//! Progress lines meant for the user go to stdout with `println!`; this is
//! only for `-v` output and `RUST_LOG`.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Map a `-v` count to a level: none → warn, `-v` → info, `-vv` → debug,
/// more → trace.
pub fn level_from_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn build_env_filter(level: Level) -> EnvFilter {
    // RUST_LOG wins; otherwise keep dependencies at warn
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,build_updater={}",
            level.as_str().to_lowercase()
        ))
    })
}

/// Install the global subscriber. Call once, before any work.
pub fn init_logging(verbosity: u8, with_ansi: bool) {
    let filter = build_env_filter(level_from_verbosity(verbosity));
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(with_ansi)
        .with_target(false)
        .without_time()
        .try_init();

    if let Err(e) = result {
        eprintln!("warning: logging already initialized: {}", e);
    }
}
