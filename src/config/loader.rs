//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::AdapterConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AdapterConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AdapterConfig, ConfigError> {
    let config: AdapterConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProtocolKind;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9090");
        assert_eq!(config.protocol.input, ProtocolKind::Binary);
        assert_eq!(config.timeouts.processing_ms, 5_000);
    }

    #[test]
    fn full_config() {
        let config = parse_config(
            r#"
            [listener]
            bind_address = "127.0.0.1:7000"
            max_connections = 8

            [protocol]
            input = "compact"
            output = "binary"

            [timeouts]
            processing_ms = 250

            [limits]
            max_body_size = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.max_connections, 8);
        assert_eq!(config.protocol.input, ProtocolKind::Compact);
        assert_eq!(config.protocol.output, ProtocolKind::Binary);
        assert_eq!(config.timeouts.processing().as_millis(), 250);
        assert_eq!(config.timeouts.shutdown_secs, 30);
        assert_eq!(config.limits.max_body_size, 1024);
    }

    #[test]
    fn unknown_protocol_is_a_parse_error() {
        let err = parse_config("[protocol]\ninput = \"json\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_errors_are_reported() {
        let err = parse_config("[limits]\nmax_body_size = 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: limits.max_body_size must be greater than zero"
        );
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("thrift-http-{}.toml", std::process::id()));
        fs::write(&path, "[listener]\nbind_address = \"127.0.0.1:7001\"\n").unwrap();
        let config = load_config(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:7001");

        assert!(matches!(load_config(&path), Err(ConfigError::Io(_))));
    }
}
