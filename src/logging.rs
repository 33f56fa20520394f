//! Logging setup for the CLI.
//!
//! Diagnostics go to stderr so stdout stays clean for listings and piping.
//! `RUST_LOG` takes precedence over the configured level.

use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Parse a level name; unknown names fall back to `info`.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Effective level: `-v` forces at least `debug`, `-vv` forces `trace`.
fn effective_level(level: &str, verbose: u8) -> Level {
    let configured = parse_level(level);
    match verbose {
        0 => configured,
        // More verbose levels compare greater
        1 => configured.max(Level::DEBUG),
        _ => Level::TRACE,
    }
}

fn build_filter(level: &str, verbose: u8) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(effective_level(level, verbose).as_str()))
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(level: &str, verbose: u8) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose > 0)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .with(build_filter(level, verbose))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
    }

    #[test]
    fn test_parse_level_default() {
        assert_eq!(parse_level("invalid"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_verbose_forces_debug() {
        assert_eq!(effective_level("info", 0), Level::INFO);
        assert_eq!(effective_level("error", 0), Level::ERROR);
        assert_eq!(effective_level("error", 1), Level::DEBUG);
        assert_eq!(effective_level("info", 1), Level::DEBUG);
        assert_eq!(effective_level("trace", 1), Level::TRACE);
        assert_eq!(effective_level("error", 2), Level::TRACE);
    }

    #[test]
    fn test_init_twice() {
        init("info", 0);
        init("debug", 1);
    }
}
