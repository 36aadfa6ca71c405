//! Integration tests for toolrun-config

use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;
use toolrun_config::domains::logging::{LogFormat, LogLevel};
use toolrun_config::*;

#[test]
fn test_default_config_validation() {
    let config = ToolrunConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("TOOLRUN_CONTAINER_NETWORK", Some("sandbox")),
        ("TOOLRUN_EXECUTION_TIMEOUT", Some("60")),
        ("TOOLRUN_CONTEXT_BACKEND", Some("sqlite")),
        ("TOOLRUN_DATABASE_URL", Some("sqlite::memory:")),
        ("TOOLRUN_LOG_LEVEL", Some("debug")),
        ("TOOLRUN_KEEPALIVE_INTERVAL", Some("10")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.execution.container_network, "sandbox");
        assert_eq!(config.execution.default_timeout, Duration::from_secs(60));
        assert_eq!(config.context_store.backend, ContextBackendKind::Sqlite);
        assert_eq!(config.context_store.database_url, "sqlite::memory:");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.streaming.keepalive_interval, Duration::from_secs(10));
    });
}

#[test]
fn test_invalid_env_value_is_reported() {
    with_vars(vec![("TOOLRUN_EXECUTION_TIMEOUT", Some("soon"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
        assert!(err.to_string().contains("EXECUTION_TIMEOUT"));
    });

    with_vars(vec![("TOOLRUN_CONTEXT_BACKEND", Some("redis"))], || {
        assert!(ConfigLoader::new().from_env().is_err());
    });
}

#[test]
fn test_zero_ttl_disables_expiry() {
    with_vars(vec![("TOOLRUN_CONTEXT_TTL", Some("0"))], || {
        let config = ConfigLoader::new().from_env().unwrap();
        assert_eq!(config.context_store.ttl, None);
    });
}

#[test]
fn test_custom_prefix() {
    with_vars(vec![("MCP_CONTAINER_NETWORK", Some("other"))], || {
        let config = ConfigLoader::with_prefix("MCP").from_env().unwrap();
        assert_eq!(config.execution.container_network, "other");
    });
}

#[test]
fn test_yaml_config_serialization() {
    let yaml = ToolrunConfig::generate_sample();
    let parsed: ToolrunConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed.execution.image_prefix, "mcp/tool-");
}

#[test]
fn test_comprehensive_config_file() {
    let yaml = r#"
execution:
  container_network: "tools"
  default_timeout: 120
  stop_grace_period: 5
  poll_interval: 500
  image_prefix: "registry.local/tool-"

context_store:
  backend: sqlite
  database_url: "sqlite://runs.db"
  ttl: 3600
  max_connections: 2

streaming:
  keepalive_interval: 15
  subscriber_queue_capacity: 64

logging:
  level: warn
  format: json
  include_location: true

runtime:
  docker_host: "unix:///var/run/docker.sock"
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(vec![("TOOLRUN_LOG_FORMAT", None::<&str>)], || {
        let config = ConfigLoader::new().from_file(file.path()).unwrap();

        assert_eq!(config.execution.container_network, "tools");
        assert_eq!(config.execution.default_timeout, Duration::from_secs(120));
        assert_eq!(config.execution.poll_interval, Duration::from_millis(500));
        assert_eq!(config.context_store.ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.streaming.subscriber_queue_capacity, 64);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.include_location);
        assert_eq!(
            config.runtime.docker_host.as_deref(),
            Some("unix:///var/run/docker.sock")
        );
    });
}

#[test]
fn test_env_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "execution:\n  container_network: from-file").unwrap();

    with_vars(vec![("TOOLRUN_CONTAINER_NETWORK", Some("from-env"))], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();
        assert_eq!(config.execution.container_network, "from-env");
    });
}

#[test]
fn test_invalid_file_fails_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "execution:\n  default_timeout: 0").unwrap();

    with_vars(vec![("TOOLRUN_EXECUTION_TIMEOUT", None::<&str>)], || {
        let err = ConfigLoader::new().from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::DomainError { .. }));
    });
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .from_file("/nonexistent/toolrun.yaml")
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileReadError(_)));
}
