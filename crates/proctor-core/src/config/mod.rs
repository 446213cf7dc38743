//! Configuration management for the proctor relay

mod relay;

pub use relay::{HostEntry, OrderedTable, RelayConfig, RelaySettings};

use std::path::Path;

use crate::error::ConfigError;

/// Default configuration file path for the relay daemon
pub const DEFAULT_CONFIG_PATH: &str = "/etc/proctor/relay.toml";

/// Load and validate the relay configuration from a file
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let mut config: RelayConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::io::Write;

    #[test]
    fn test_load_missing_file() {
        let result = load_config(Path::new("/nonexistent/proctor/relay.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\nagent_user = \"mgmt\"\n\n[hosts]\nlab = \"ws00-01\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.relay.agent_user, "mgmt");
        assert_eq!(config.host_entries().len(), 2);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[relay").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }
}
