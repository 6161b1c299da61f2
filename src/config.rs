//! Configuration management for nomadcoin nodes

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Error returned by config loading and validation; `Send` so it can cross tasks.
pub type ConfigError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Which servers the node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// JSON API and peer upgrades only.
    Rest,
    /// Block explorer only.
    Html,
    Both,
}

impl Mode {
    pub fn serves_rest(self) -> bool {
        matches!(self, Mode::Rest | Mode::Both)
    }

    pub fn serves_html(self) -> bool {
        matches!(self, Mode::Html | Mode::Both)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_rest_port")]
    pub rest_port: u16,
    #[serde(default = "default_html_port")]
    pub html_port: u16,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// `host:port` of nodes dialled at startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rest_port: default_rest_port(),
            html_port: default_html_port(),
            mode: default_mode(),
            bootstrap_peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the store and key files.
    #[serde(default = "default_data_dir")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir(),
        }
    }
}

impl Config {
    /// Store file for this node. Named after the REST port so several nodes
    /// can share one data directory.
    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.database.path).join(format!("blockchain_{}.db", self.network.rest_port))
    }

    pub fn wallet_path(&self) -> PathBuf {
        Path::new(&self.database.path).join(format!("wallet_{}.json", self.network.rest_port))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.is_empty() {
            return Err("database.path must not be empty".into());
        }
        if self.network.mode == Mode::Both && self.network.rest_port == self.network.html_port {
            return Err(format!(
                "rest_port and html_port must differ in both mode (both are {})",
                self.network.rest_port
            )
            .into());
        }
        for peer in &self.network.bootstrap_peers {
            parse_peer(peer)?;
        }
        Ok(())
    }
}

/// Splits `host:port`.
pub fn parse_peer(peer: &str) -> Result<(String, u16), ConfigError> {
    let (host, port) = peer
        .rsplit_once(':')
        .ok_or_else(|| format!("Peer {} must be host:port", peer))?;
    if host.is_empty() {
        return Err(format!("Peer {} has an empty host", peer).into());
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("Peer {} has an invalid port: {}", peer, e))?;
    Ok((host.to_string(), port))
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Reads `path` when it exists, otherwise falls back to defaults.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)?
    };

    config.validate()?;
    Ok(config)
}

fn default_rest_port() -> u16 {
    4000
}

fn default_html_port() -> u16 {
    3000
}

fn default_mode() -> Mode {
    Mode::Both
}

fn default_data_dir() -> String {
    "./data".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network.rest_port, 4000);
        assert_eq!(config.network.html_port, 3000);
        assert_eq!(config.network.mode, Mode::Both);
        assert_eq!(config.database.path, "./data");
        assert_eq!(config.db_path(), Path::new("./data").join("blockchain_4000.db"));
        assert_eq!(config.wallet_path(), Path::new("./data").join("wallet_4000.json"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[network]\nrest_port = 4001\nmode = \"rest\"\nbootstrap_peers = [\"127.0.0.1:4000\"]"
        )
        .unwrap();

        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.network.rest_port, 4001);
        assert_eq!(config.network.html_port, 3000);
        assert_eq!(config.network.mode, Mode::Rest);
        assert!(config.network.mode.serves_rest());
        assert!(!config.network.mode.serves_html());
        assert_eq!(config.network.bootstrap_peers, vec!["127.0.0.1:4000"]);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.network.html_port = config.network.rest_port;
        assert!(config.validate().is_err());

        config.network.mode = Mode::Rest;
        assert!(config.validate().is_ok());

        config.network.bootstrap_peers = vec!["nohost".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.database.path.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_peer() {
        assert_eq!(parse_peer("10.0.0.1:4000").unwrap(), ("10.0.0.1".to_string(), 4000));
        assert!(parse_peer(":4000").is_err());
        assert!(parse_peer("host:99999").is_err());
    }
}
