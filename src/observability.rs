//! Structured logging (C11): initializes `tracing-subscriber` from a
//! [`crate::config::LoggingConfig`] and wraps the spans the engine and CLI
//! emit around a step.

use crate::config::LoggingConfig;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber. Call once, at process start.
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}

/// The level a `--verbose` flag bumps the configured level to, clamped at
/// `trace` (one flag = debug, two or more = trace).
pub fn level_for_verbosity(base: &str, verbose_count: u8) -> Level {
    if verbose_count == 0 {
        return base.parse().unwrap_or(Level::INFO);
    }
    match verbose_count {
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// A span around one `Engine::fire`/`goto`/`forward`/`back`/`random_run`
/// call, carrying the identifiers a reader would want in a log line.
#[macro_export]
macro_rules! step_span {
    ($op:expr, $position:expr) => {
        tracing::info_span!("engine_step", op = $op, position = $position)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_escalates_level() {
        assert_eq!(level_for_verbosity("info", 0), Level::INFO);
        assert_eq!(level_for_verbosity("info", 1), Level::DEBUG);
        assert_eq!(level_for_verbosity("info", 5), Level::TRACE);
    }
}
