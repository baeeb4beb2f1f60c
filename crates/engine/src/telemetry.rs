use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

const DEFAULT_FILTER: &str = "info";

/// Config filter first, then `RUST_LOG`, then `info`. An invalid config filter
/// is reported once the subscriber is up.
fn build_filter(config: &LoggingConfig) -> (EnvFilter, Option<String>) {
    if let Some(directives) = config.filter.as_deref() {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return (filter, None),
            Err(e) => {
                let fallback = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
                return (fallback, Some(format!("invalid log filter {directives:?}: {e}")));
            }
        }
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    (filter, None)
}

/// Install the global fmt subscriber. Returns false when one is already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let (filter, invalid) = build_filter(config);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .is_ok();

    if let Some(message) = invalid {
        tracing::warn!("{message}");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filter_is_reported() {
        let config = LoggingConfig {
            filter: Some("uwan_engine=notalevel".into()),
            format: LogFormat::Compact,
        };
        let (_, invalid) = build_filter(&config);
        assert!(invalid.is_some());

        let config = LoggingConfig {
            filter: Some("uwan_engine=debug".into()),
            format: LogFormat::Json,
        };
        assert!(build_filter(&config).1.is_none());
    }

    #[test]
    fn second_init_is_a_no_op() {
        let config = LoggingConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
