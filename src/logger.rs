//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after config is resolved. A level given on
//! the command line beats `RUST_LOG`; a level from config or
//! `SITE_BOOTSTRAP_LOG_LEVEL` yields to it.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Where the level handed to [`init`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    /// `--log-level`: overrides `RUST_LOG`.
    Flag,
    /// Config file or env override: `RUST_LOG` wins when it parses.
    Config,
}

/// Initialise the global tracing subscriber, writing to stderr.
///
/// `level` accepts standard level strings: `"error"`, `"warn"`, `"info"`,
/// `"debug"`, `"trace"`.
pub fn init(level: &str, source: LevelSource) -> Result<(), AppError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, source, rust_log.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

fn build_filter(level: &str, source: LevelSource, rust_log: Option<&str>) -> Result<EnvFilter, AppError> {
    let level = parse_level(level)?;
    let from_env = match source {
        LevelSource::Flag => None,
        LevelSource::Config => rust_log.and_then(|directives| EnvFilter::try_new(directives).ok()),
    };
    Ok(from_env.unwrap_or_else(|| EnvFilter::default().add_directive(level.into())))
}

/// Parse a log level string into a [`LevelFilter`], returning an error on
/// unrecognised values. Config validation uses this before [`init`].
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_level(filter: EnvFilter) -> Option<LevelFilter> {
        filter.max_level_hint()
    }

    #[test]
    fn valid_levels_parse() {
        for l in &["error", "warn", "info", "debug", "trace"] {
            assert!(parse_level(l).is_ok(), "expected '{l}' to be valid");
        }
    }

    #[test]
    fn invalid_level_errors() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("").is_err());
        assert!(parse_level("INFO_LEVEL").is_err());
    }

    #[test]
    fn flag_level_overrides_rust_log() {
        let filter = build_filter("warn", LevelSource::Flag, Some("trace")).unwrap();
        assert_eq!(max_level(filter), Some(LevelFilter::WARN));
    }

    #[test]
    fn rust_log_overrides_config_level() {
        let filter = build_filter("warn", LevelSource::Config, Some("trace")).unwrap();
        assert_eq!(max_level(filter), Some(LevelFilter::TRACE));
    }

    #[test]
    fn config_level_applies_without_usable_rust_log() {
        let unset = build_filter("debug", LevelSource::Config, None).unwrap();
        assert_eq!(max_level(unset), Some(LevelFilter::DEBUG));
        let garbage = build_filter("debug", LevelSource::Config, Some("site_bootstrap=loud")).unwrap();
        assert_eq!(max_level(garbage), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn invalid_flag_level_is_an_error() {
        let err = build_filter("loud", LevelSource::Flag, None).unwrap_err();
        assert!(matches!(err, AppError::Logger(ref m) if m.contains("loud")));
    }

    #[test]
    fn init_info_succeeds_or_already_init() {
        // Another test in this process may have installed a subscriber first.
        match init("info", LevelSource::Flag) {
            Ok(()) => {}
            Err(AppError::Logger(msg)) if msg.contains("set subscriber") => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
