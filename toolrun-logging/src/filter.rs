use anyhow::{Context, Result};
use toolrun_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Build the `EnvFilter` for a logging configuration.
///
/// The configured level is the default directive; `filter` directives are
/// appended after it, so per-target entries override the level.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut directives = config.level.as_str().to_string();
    if let Some(ref extra) = config.filter {
        directives.push(',');
        directives.push_str(extra.trim());
    }

    EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter directives: {}", directives))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolrun_config::domains::logging::LogLevel;

    #[test]
    fn test_filter_from_level() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            ..Default::default()
        };
        let filter = build_env_filter(&config).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_filter_with_target_directives() {
        let config = LoggingConfig {
            filter: Some("toolrun_execution=trace".to_string()),
            ..Default::default()
        };
        let filter = build_env_filter(&config).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("toolrun_execution=trace"));
        assert!(rendered.contains("info"));
    }

    #[test]
    fn test_invalid_directives_rejected() {
        let config = LoggingConfig {
            filter: Some("toolrun_core=loudest".to_string()),
            ..Default::default()
        };
        assert!(build_env_filter(&config).is_err());
    }
}
