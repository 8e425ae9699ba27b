//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level. Installing twice
//! (e.g. from several tests) is not an error.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Filter from `RUST_LOG`, or `level` when it is unset or unparsable.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber described by `config`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_from_config(config: &ApplicationConfig) -> bool {
    let filter = env_filter(&config.log_level);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.log_format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = ApplicationConfig::default();
        let _ = init_from_config(&config);
        assert!(!init_from_config(&config));
    }
}
