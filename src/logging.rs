use std::str::FromStr;

use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use thiserror::Error;

use crate::core::types::GlobalPolicy;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log-level `{0}` (expected error, warn, info, debug or trace)")]
    InvalidLevel(String),
    #[error("logger already initialised")]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// `info` by default, `debug` in dev mode, `log-level` over both.
pub fn level_for(global: &GlobalPolicy) -> Result<LevelFilter, LoggingError> {
    match global.log_level.as_deref() {
        Some(level) => LevelFilter::from_str(level.trim())
            .map_err(|_| LoggingError::InvalidLevel(level.to_string())),
        None if global.dev => Ok(LevelFilter::Debug),
        None => Ok(LevelFilter::Info),
    }
}

/// Installs the process logger. `RUST_LOG` wins over the configured level.
pub fn init(global: &GlobalPolicy) -> Result<(), LoggingError> {
    let level = level_for(global)?;
    builder(level).try_init()?;
    Ok(())
}

/// Logger for failures that happen before the configuration is readable.
pub fn init_default() {
    // A logger installed earlier stays in place.
    let _ = builder(LevelFilter::Info).try_init();
}

fn builder(level: LevelFilter) -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level.as_str()));
    builder.target(Target::Stdout).format_timestamp_secs();
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse, resolve};
    use std::path::Path;

    fn global(body: &str) -> GlobalPolicy {
        let path = Path::new("/etc/lego/config.toml");
        resolve(parse(body, path).unwrap(), path).unwrap().global
    }

    #[test]
    fn level_precedence() {
        assert_eq!(level_for(&global("")).unwrap(), LevelFilter::Info);
        assert_eq!(level_for(&global("dev = true")).unwrap(), LevelFilter::Debug);
        assert_eq!(
            level_for(&global("dev = true\nlog-level = \"warn\"")).unwrap(),
            LevelFilter::Warn
        );
        assert_eq!(level_for(&global("log-level = \"TRACE\"")).unwrap(), LevelFilter::Trace);
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(matches!(
            level_for(&global("log-level = \"loud\"")),
            Err(LoggingError::InvalidLevel(level)) if level == "loud"
        ));
    }
}
