use std::collections::HashSet;
use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::config::schema::WatchConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/watch-config-v1.json");

/// Overrides `base_url` when set.
pub const ENV_BASE_URL: &str = "EVALWATCH_BASE_URL";
/// Overrides `ws_root` when set.
pub const ENV_WS_ROOT: &str = "EVALWATCH_WS_ROOT";

/// Location checked when no config path is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("evalwatch").join("config.json"))
}

/// Loads a config file, picking YAML or JSON by extension.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<WatchConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => load_config_from_yaml_str(&content),
        _ => load_config_from_str(&content),
    }
}

pub fn load_config_from_str(content: &str) -> Result<WatchConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;
    load_config_from_value(json_value)
}

pub fn load_config_from_yaml_str(content: &str) -> Result<WatchConfig, ConfigError> {
    let json_value: serde_json::Value = serde_yaml::from_str(content)?;
    load_config_from_value(json_value)
}

fn load_config_from_value(json_value: serde_json::Value) -> Result<WatchConfig, ConfigError> {
    validate_schema(&json_value)?;

    let config: WatchConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Resolves the effective config: an explicit path must load, the default
/// path is used only if present, otherwise built-in defaults apply.
/// Environment overrides are applied last.
pub fn resolve_config(explicit: Option<&Path>) -> Result<WatchConfig, ConfigError> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => {
                log::info!("Using config file {:?}", path);
                load_config(&path)?
            }
            _ => WatchConfig::default(),
        },
    };

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

pub fn apply_env_overrides(config: &mut WatchConfig) {
    if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
        if !base_url.trim().is_empty() {
            log::debug!("{} overrides base_url", ENV_BASE_URL);
            config.base_url = base_url.trim().to_string();
        }
    }
    if let Ok(ws_root) = std::env::var(ENV_WS_ROOT) {
        log::debug!("{} overrides ws_root", ENV_WS_ROOT);
        config.ws_root = ws_root.trim().to_string();
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &WatchConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let url = Url::parse(&config.base_url).map_err(|e| ConfigError::InvalidUrl {
        url: config.base_url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            url: config.base_url.clone(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if config.channels.is_empty() {
        return Err(ConfigError::Validation {
            message: "At least one channel must be configured".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for channel in &config.channels {
        if !seen.insert(channel) {
            return Err(ConfigError::Validation {
                message: format!("Duplicate channel: {}", channel),
            });
        }
    }

    let durations = [
        ("reconnect_delay_ms", Some(config.timing.reconnect_delay_ms)),
        ("poll_interval_ms", config.timing.poll_interval_ms),
        ("request_timeout_ms", Some(config.http.request_timeout_ms)),
        ("connect_timeout_ms", Some(config.http.connect_timeout_ms)),
    ];
    for (name, value) in durations {
        if value == Some(0) {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    if config.update_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "update_capacity must be greater than zero".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Channel;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config, WatchConfig::default());
        assert_eq!(config.channels.len(), 4);
        assert_eq!(config.timing.reconnect_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "base_url": "https://eval.example.com",
            "ws_root": "live",
            "channels": ["evaluation-status", "qcm-updates"],
            "timing": {
                "reconnect_delay_ms": 500,
                "reconciliation_delay_ms": 250,
                "poll_interval_ms": 10000
            },
            "http": { "request_timeout_ms": 5000 },
            "update_capacity": 32
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.base_url, "https://eval.example.com");
        assert_eq!(config.ws_root, "live");
        assert_eq!(
            config.channels,
            vec![Channel::EvaluationStatus, Channel::QcmUpdates]
        );
        assert_eq!(config.timing.poll_interval(), Some(Duration::from_secs(10)));
        assert_eq!(config.http.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.http.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.update_capacity, 32);
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_unknown_channel_rejected_by_schema() {
        let result = load_config_from_str(r#"{ "version": "1.0", "channels": ["chat"] }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let result = load_config_from_str(r#"{ "version": "1.0", "retries": 3 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_duplicate_channel() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "channels": ["notifications", "notifications"] }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_non_http_base_url() {
        let result =
            load_config_from_str(r#"{ "version": "1.0", "base_url": "ftp://example.com" }"#);
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let mut config = WatchConfig::default();
        config.timing.poll_interval_ms = Some(0);
        match validate_config(&config) {
            Err(ConfigError::Validation { message }) => {
                assert!(message.contains("poll_interval_ms"))
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let mut config = WatchConfig::default();
        config.http.connect_timeout_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));

        let mut config = WatchConfig::default();
        config.http.request_timeout_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));

        let mut config = WatchConfig::default();
        config.timing.poll_interval_ms = Some(250);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "version: \"1.0\"").unwrap();
        writeln!(file, "base_url: http://10.0.0.5:8000").unwrap();
        writeln!(file, "timing:").unwrap();
        writeln!(file, "  reconnect_delay_ms: 750").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.base_url, "http://10.0.0.5:8000");
        assert_eq!(config.timing.reconnect_delay_ms, 750);
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/evalwatch.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_BASE_URL, "https://override.example.com");
        std::env::set_var(ENV_WS_ROOT, "sockets");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "version": "1.0" }"#).unwrap();
        let config = resolve_config(Some(&path));

        std::env::remove_var(ENV_BASE_URL);
        std::env::remove_var(ENV_WS_ROOT);

        let config = config.unwrap();
        assert_eq!(config.base_url, "https://override.example.com");
        assert_eq!(config.ws_root, "sockets");
    }

    #[test]
    #[serial]
    fn test_invalid_env_override_fails_validation() {
        std::env::set_var(ENV_BASE_URL, "not a url");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "version": "1.0" }"#).unwrap();
        let result = resolve_config(Some(&path));

        std::env::remove_var(ENV_BASE_URL);

        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
    }
}
