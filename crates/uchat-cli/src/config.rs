//! UChat CLI Configuration Management
//!
//! Configuration is read from a TOML file (`uchat.toml`). Missing sections and
//! fields fall back to defaults, and command line flags override both:
//! CLI args > config file > defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use uchat_core::protocol::MAX_USERNAME_LEN;
use uchat_core::{PeerColor, SessionConfig};

use crate::error::{CliError, Result};

const FRIENDS_FILE: &str = "friends.json";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the UChat CLI application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// The local user
    pub account: AccountConfig,
    /// Protocol engine settings
    pub session: SessionConfig,
    /// Terminal settings
    pub cli: CliConfig,
}

/// Identity announced to peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Display name, at most 20 bytes
    pub username: String,
    /// Display color such as `#9AB20A`
    pub color: PeerColor,
    /// Ask for the listening port to be forwarded on startup
    pub port_mapping: bool,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Prompt shown in interactive mode
    pub prompt: String,
    /// Where the friends list lives; defaults to the platform data directory
    pub data_dir: Option<PathBuf>,
    /// Service answering with this host's public address as plain text
    pub ip_lookup_url: String,
    /// Service answering `{"ip": "..."}`, asked when the first one fails
    pub ip_lookup_fallback_url: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            username: "Anonymous".to_string(),
            color: PeerColor::new(0x9A_B2_0A).unwrap_or_default(),
            port_mapping: false,
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "uchat> ".to_string(),
            data_dir: None,
            ip_lookup_url: "https://api.ipify.org".to_string(),
            ip_lookup_fallback_url: "https://ip4.seeip.org/json".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and Overrides
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply command line overrides on top of the loaded configuration
    pub fn apply_overrides(&mut self, data_dir: Option<&str>, port: Option<u16>) {
        if let Some(dir) = data_dir {
            self.cli.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(port) = port {
            self.session.listen_port = port;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.account.username.is_empty() {
            return Err(CliError::Config("account.username must not be empty".into()));
        }
        if self.account.username.len() > MAX_USERNAME_LEN {
            return Err(CliError::Config(format!(
                "account.username must be at most {} bytes",
                MAX_USERNAME_LEN
            )));
        }
        self.session.validate()?;
        Ok(())
    }

    /// Session settings with the account's port-mapping choice applied
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            enable_port_mapping: self.account.port_mapping || self.session.enable_port_mapping,
            ..self.session.clone()
        }
    }

    /// Directory holding persistent client data
    pub fn data_dir(&self) -> PathBuf {
        self.cli.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn friends_path(&self) -> PathBuf {
        self.data_dir().join(FRIENDS_FILE)
    }
}

/// Platform data directory, e.g. `~/.local/share/uchat`
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("uchat"))
        .unwrap_or_else(|| PathBuf::from(".uchat"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uchat.toml");
        std::fs::write(
            &path,
            "[account]\nusername = \"alice\"\ncolor = \"#FAB\"\n\n[session]\nlisten_port = 4000\n",
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.account.username, "alice");
        assert_eq!(config.account.color.as_u32(), 0xFFAABB);
        assert_eq!(config.session.listen_port, 4000);
        assert_eq!(config.session.io_timeout_secs, SessionConfig::default().io_timeout_secs);
        assert_eq!(config.cli.prompt, "uchat> ");
        assert_eq!(config.cli.ip_lookup_url, CliConfig::default().ip_lookup_url);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uchat.toml");

        std::fs::write(&path, "[account]\nusername = \"a-name-well-over-twenty-bytes\"\n").unwrap();
        assert!(matches!(
            AppConfig::load_from_file(&path),
            Err(CliError::Config(_))
        ));

        std::fs::write(&path, "[account]\ncolor = \"not a color\"\n").unwrap();
        assert!(matches!(
            AppConfig::load_from_file(&path),
            Err(CliError::TomlParsing(_))
        ));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = AppConfig::default();
        config.account.port_mapping = true;
        config.apply_overrides(Some("/tmp/uchat-data"), Some(6000));

        assert_eq!(config.session.listen_port, 6000);
        assert_eq!(config.friends_path(), PathBuf::from("/tmp/uchat-data/friends.json"));
        assert!(config.session_config().enable_port_mapping);
    }
}
