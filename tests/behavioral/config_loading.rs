// ABOUTME: Behavioral tests for configuration loading and validation
// Verifies defaults, rejection of invalid values at construction, and TOML files on disk

use std::io::Write;
use std::time::Duration;

use cache_pool::{ClientConfig, ConfigError, FailurePolicy, PoolSettings, SocketPoolConfig};
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

/// Test that the default configuration matches the documented defaults
#[test]
fn test_default_config_has_sensible_values() {
    let config = SocketPoolConfig::default();

    assert_eq!(config.min_pool_size(), 10);
    assert_eq!(config.max_pool_size(), 20);
    assert_eq!(config.connection_timeout(), Duration::from_secs(10));
    assert_eq!(config.queue_timeout(), Duration::from_millis(100));
    assert_eq!(config.receive_timeout(), Duration::from_secs(10));
    assert_eq!(config.dead_timeout(), Duration::from_secs(10));
    assert_eq!(config.linger(), None);
    assert!(!config.tcp_keep_alive_enabled());
    assert_eq!(config.tcp_keep_alive_time(), Duration::from_secs(2 * 60 * 60));
    assert_eq!(config.tcp_keep_alive_interval(), Duration::from_secs(1));
    assert_eq!(
        config.failure_policy(),
        FailurePolicy::Throttling {
            threshold: 5,
            window: Duration::from_secs(2)
        }
    );
}

/// min > max is rejected at construction for every combination tried
#[test]
fn test_min_greater_than_max_always_rejected() {
    for max in 1..8 {
        for min in (max + 1)..(max + 4) {
            let result = PoolSettings {
                min_pool_size: min,
                max_pool_size: max,
                ..PoolSettings::default()
            }
            .build();
            assert_eq!(result, Err(ConfigError::MinExceedsMax { min, max }));
        }
    }
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let toml = r#"
        servers = ["10.0.0.1:11211"]

        [socket_pool]
        min_pool_size = 30
        max_pool_size = 20
    "#;

    let err = ClientConfig::from_toml_str(toml).unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)), "{err:?}");
    assert!(err.to_string().contains("min_pool_size"));
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
servers = ["cache-1:11211", "cache-2:11211"]

[socket_pool]
min_pool_size = 2
max_pool_size = 8
queue_timeout = 250
linger_enabled = true
linger_time = 0

[socket_pool.failure_policy]
kind = "always_alive"
"#
    )
    .unwrap();

    let config = ClientConfig::load(file.path()).unwrap();
    assert_eq!(config.servers.len(), 2);
    assert_eq!(config.socket_pool.max_pool_size(), 8);
    assert_eq!(config.socket_pool.min_pool_size(), 2);
    assert_eq!(config.socket_pool.queue_timeout(), Duration::from_millis(250));
    assert_eq!(config.socket_pool.linger(), Some(Duration::ZERO));
    assert_eq!(config.socket_pool.failure_policy(), FailurePolicy::AlwaysAlive);
}

#[test]
fn test_rendered_config_loads_back() {
    let original = ClientConfig::new(
        vec!["cache-1:11211".parse().unwrap()],
        PoolSettings {
            min_pool_size: 1,
            max_pool_size: 3,
            ..PoolSettings::default()
        }
        .build()
        .unwrap(),
    )
    .unwrap();

    let rendered = original.to_toml_string().unwrap();
    assert_eq!(ClientConfig::from_toml_str(&rendered).unwrap(), original);
}
