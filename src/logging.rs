//! Setting up log output.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Setup logging of events reported by the scheduler and dialers.
///
/// Use the RUST_LOG environment variable to override the defaults.
///
/// E.g. To enable debug level logging:
///   RUST_LOG=DEBUG
///
/// Or to only see what the dialers are doing:
///   RUST_LOG=netprobe::net::dialer=TRACE
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .without_time()
        .try_init()
        .ok();
}

/// Setup logging with a default level taken from task settings.
///
/// RUST_LOG still takes precedence for anything it mentions.
pub fn init_logging_with_level(level: LogLevel) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level.as_level()).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .without_time()
        .try_init()
        .ok();
}
