use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
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
        .map(|e| format!("{}", e))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let inference = &config.inference;
    for (name, value) in [
        ("inference.sensitivity", inference.sensitivity),
        ("inference.confidence_threshold", inference.confidence_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Validation {
                message: format!("{} must be within [0, 1], got {}", name, value),
            });
        }
    }

    if inference.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "inference.timeout_secs must be greater than zero".to_string(),
        });
    }

    if inference.command.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "inference.command must not be empty".to_string(),
        });
    }

    if config.server.max_upload_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "server.max_upload_bytes must be greater than zero".to_string(),
        });
    }

    let reaper = &config.reaper;
    if reaper.enabled {
        if reaper.interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "reaper.interval_secs must be greater than zero".to_string(),
            });
        }
        // A job still inside its inference timeout must never be reaped.
        if reaper.grace_secs <= inference.timeout_secs {
            return Err(ConfigError::Validation {
                message: format!(
                    "reaper.grace_secs ({}) must exceed inference.timeout_secs ({})",
                    reaper.grace_secs, inference.timeout_secs
                ),
            });
        }
    }

    Ok(())
}
