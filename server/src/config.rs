use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::engine::chat_engine::EngineOptions;
use crate::engine::user_session::MAX_OUTBOUND_QUEUE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level server configuration, loaded from huddle.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub log: LogSection,
    pub history: HistorySection,
    pub session: SessionSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Directory served for everything that is not the WebSocket endpoint.
    pub static_dir: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:3000".into(),
            static_dir: PathBuf::from("public"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Chat log file. Empty disables the durable log.
    pub path: PathBuf,
    /// Also log connect/disconnect audit lines.
    pub audit_connections: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("chat.log"),
            audit_connections: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct HistorySection {
    /// Keep at most this many messages (oldest evicted first). 0 = unbounded.
    pub max_entries: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub outbound_queue: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            outbound_queue: MAX_OUTBOUND_QUEUE,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Some(v) = lookup("PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.server.web_address = with_port(&self.server.web_address, port);
        }
        if let Some(v) = lookup("STATIC_DIR") {
            self.server.static_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CHAT_LOG_PATH") {
            self.log.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CHAT_LOG_AUDIT")
            && let Ok(audit) = v.parse()
        {
            self.log.audit_connections = audit;
        }
        if let Some(v) = lookup("HISTORY_MAX_ENTRIES")
            && let Ok(max) = v.parse()
        {
            self.history.max_entries = max;
        }
        if let Some(v) = lookup("OUTBOUND_QUEUE")
            && let Ok(depth) = v.parse()
        {
            self.session.outbound_queue = depth;
        }
    }

    /// Convert into the engine's tunables.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            history_max_entries: self.history.max_entries,
            audit_connections: self.log.audit_connections,
            outbound_queue: self.session.outbound_queue,
        }
    }
}

/// Replace the port of a `host:port` address (`[v6]:port` included).
fn with_port(address: &str, port: u16) -> String {
    let host = match address.rsplit_once(':') {
        Some((host, tail)) if !tail.contains(']') => host,
        _ => address,
    };
    format!("{host}:{port}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server.web_address, "0.0.0.0:3000");
        assert_eq!(config.server.static_dir, PathBuf::from("public"));
        assert_eq!(config.log.path, PathBuf::from("chat.log"));
        assert!(config.log.audit_connections);
        assert_eq!(config.history.max_entries, 0);
        assert_eq!(config.session.outbound_queue, MAX_OUTBOUND_QUEUE);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            [server]
            web_address = "127.0.0.1:9000"

            [history]
            max_entries = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.server.web_address, "127.0.0.1:9000");
        assert_eq!(config.server.static_dir, PathBuf::from("public"));
        assert_eq!(config.history.max_entries, 500);
        assert!(config.log.audit_connections);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(ServerConfig::from_toml("[history]\nmax_entries = \"lots\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "4000"),
            ("CHAT_LOG_PATH", "/var/log/huddle.log"),
            ("CHAT_LOG_AUDIT", "false"),
            ("HISTORY_MAX_ENTRIES", "10"),
            ("OUTBOUND_QUEUE", "not-a-number"),
        ]);
        let mut config = ServerConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.web_address, "0.0.0.0:4000");
        assert_eq!(config.log.path, PathBuf::from("/var/log/huddle.log"));
        assert!(!config.log.audit_connections);
        assert_eq!(config.history.max_entries, 10);
        assert_eq!(config.session.outbound_queue, MAX_OUTBOUND_QUEUE);

        let options = config.engine_options();
        assert_eq!(options.history_max_entries, 10);
        assert!(!options.audit_connections);
    }

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("0.0.0.0:3000", 8080), "0.0.0.0:8080");
        assert_eq!(with_port("[::]:3000", 8080), "[::]:8080");
        assert_eq!(with_port("localhost", 8080), "localhost:8080");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::load("/nonexistent/huddle.toml").unwrap();
        assert_eq!(config.history.max_entries, 0);
    }
}
