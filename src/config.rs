use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::codes::Model;
use crate::tuya::DeviceConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Configuration for one unit: which blaster to talk to, which code table
/// applies, and where state lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitConfig {
    pub name: String,
    pub device_id: String,
    pub local_key: String,
    pub device_ip: IpAddr,
    #[serde(default = "default_version")]
    pub protocol_version: String,
    pub model: Model,
    #[serde(default = "default_codes_dir")]
    pub codes_dir: PathBuf,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// Source id of an external temperature sensor feed, if any.
    #[serde(default)]
    pub temperature_sensor: Option<String>,
}

fn default_version() -> String {
    "3.3".to_string()
}

fn default_codes_dir() -> PathBuf {
    PathBuf::from("codes")
}

pub fn load(path: &Path) -> Result<UnitConfig, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl UnitConfig {
    pub fn device(&self) -> DeviceConfig {
        DeviceConfig {
            device_id: self.device_id.clone(),
            local_key: self.local_key.clone(),
            address: self.device_ip,
            version: self.protocol_version.clone(),
        }
    }

    /// Where the persisted snapshot lives; defaults to `<name>.state.json`
    /// in the working directory.
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.state.json", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let config: UnitConfig = toml::from_str(
            r#"
            name = "living-room"
            device_id = "bf1234567890"
            local_key = "0123456789abcdef"
            device_ip = "192.168.1.40"
            model = "MSZ-GE25VA"
            "#,
        )
        .unwrap();

        assert_eq!(config.model, Model::MszGe25va);
        assert_eq!(config.protocol_version, "3.3");
        assert_eq!(config.codes_dir, PathBuf::from("codes"));
        assert_eq!(config.state_path(), PathBuf::from("living-room.state.json"));
        assert!(config.temperature_sensor.is_none());
    }

    #[test]
    fn unknown_model_is_rejected() {
        let result: Result<UnitConfig, _> = toml::from_str(
            r#"
            name = "x"
            device_id = "y"
            local_key = "z"
            device_ip = "10.0.0.1"
            model = "MSZ-UNKNOWN"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<UnitConfig, _> = toml::from_str(
            r#"
            name = "x"
            device_id = "y"
            local_key = "z"
            device_ip = "10.0.0.1"
            model = "MSZ-GE25VA"
            not_a_field = true
            "#,
        );
        assert!(result.is_err());
    }
}
