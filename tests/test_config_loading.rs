//! Integration tests for configuration files and bootstrap resolution

use connio_device::config::{Bootstrap, ConfigError, DeviceConfig};
use connio_device::session::ClaimType;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
[broker]
url = "mqtt://localhost:1884"
keep_alive_secs = 20

[device]

[telemetry]
frequency_secs = 3
"#,
    );

    let config = DeviceConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.broker.url, "mqtt://localhost:1884");
    assert_eq!(config.keep_alive(), Duration::from_secs(20));
    assert!(config.device.is_some());
    assert_eq!(
        config.telemetry.initial_snapshot().frequency(),
        Duration::from_secs(3)
    );
}

#[test]
fn test_missing_file() {
    let result = DeviceConfig::load_from_file(std::path::Path::new("/nonexistent/device.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_toml() {
    let file = write_config("[broker\nurl = ");
    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_round_trip_through_toml() {
    let config = DeviceConfig::default();
    let rendered = config.to_toml().unwrap();
    let file = write_config(&rendered);
    assert_eq!(DeviceConfig::load_from_file(file.path()).unwrap(), config);
}

#[test]
fn test_credentials_bootstrap_from_environment() {
    std::env::set_var("CONNIO_IT_DEVICE_ID_7C1E", "dev-42");
    std::env::set_var("CONNIO_IT_KEY_ID_7C1E", "key-42");
    std::env::set_var("CONNIO_IT_KEY_SECRET_7C1E", "secret-42");

    let config = DeviceConfig::from_toml(
        r#"
[broker]
url = "mqtts://broker.example.com"

[device]
id_env = "CONNIO_IT_DEVICE_ID_7C1E"
key_id_env = "CONNIO_IT_KEY_ID_7C1E"
key_secret_env = "CONNIO_IT_KEY_SECRET_7C1E"
"#,
    )
    .unwrap();

    match config.bootstrap().unwrap() {
        Bootstrap::Credentials { params } => {
            assert_eq!(params.client_id, "dev-42");
            assert_eq!(params.username, "key-42");
            assert_eq!(params.password, "secret-42");
            assert_eq!(params.host, "broker.example.com");
            assert_eq!(params.port, 8883);
            assert!(params.tls);
            assert!(!format!("{params:?}").contains("secret-42"));
        }
        other => panic!("Expected credentials bootstrap, got {other:?}"),
    }
}

#[test]
fn test_provisioning_bootstrap_from_environment() {
    std::env::set_var("CONNIO_IT_PROV_KEY_9D3B", "prov-key");
    std::env::set_var("CONNIO_IT_PROV_SECRET_9D3B", "prov-secret");
    std::env::set_var("CONNIO_IT_SERIAL_9D3B", "SN-123");

    let config = DeviceConfig::from_toml(
        r#"
[broker]
url = "mqtt://localhost"

[provisioning]
key_id_env = "CONNIO_IT_PROV_KEY_9D3B"
key_secret_env = "CONNIO_IT_PROV_SECRET_9D3B"
claim_value_env = "CONNIO_IT_SERIAL_9D3B"
timeout_secs = 15
"#,
    )
    .unwrap();

    match config.bootstrap().unwrap() {
        Bootstrap::Provisioning {
            params,
            claim,
            config_property,
            timeout,
            keep_alive,
        } => {
            assert_eq!(params.username, "prov-key");
            assert_eq!(params.port, 1883);
            assert!(!params.client_id.is_empty());
            assert_eq!(claim.identifier_type, ClaimType::SerialNumber);
            assert_eq!(claim.identifier_value, "SN-123");
            assert_eq!(config_property.as_deref(), Some("config"));
            assert_eq!(timeout, Duration::from_secs(15));
            assert_eq!(keep_alive, Duration::from_secs(60));
        }
        other => panic!("Expected provisioning bootstrap, got {other:?}"),
    }
}

#[test]
fn test_empty_env_var_counts_as_missing() {
    std::env::set_var("CONNIO_IT_EMPTY_ID_2B8F", "");

    let config =
        DeviceConfig::from_toml("[device]\nid_env = \"CONNIO_IT_EMPTY_ID_2B8F\"\n").unwrap();

    assert!(matches!(
        config.bootstrap(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "CONNIO_IT_EMPTY_ID_2B8F"
    ));
}
