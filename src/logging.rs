//! Diagnostic logging through `tracing`, always on stderr.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Variable that overrides the level filter, e.g. `NSENSO_LOG=nsenso=trace`.
pub const LOG_ENV: &str = "NSENSO_LOG";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: String::from("warn"),
            with_target: false,
        }
    }
}

impl LogConfig {
    pub fn verbose(verbose: bool) -> Self {
        if verbose {
            Self {
                level: String::from("debug"),
                with_target: true,
            }
        } else {
            Self::default()
        }
    }
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_logging(config: &LogConfig) {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level));

    let fmt_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(config.with_target);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_level() {
        assert_eq!(LogConfig::verbose(true).level, "debug");
        assert_eq!(LogConfig::verbose(false).level, "warn");
    }
}
