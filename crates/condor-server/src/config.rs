use condor_core::{BootstrapConfig, BootstrapUser};
use condor_remote::RemoteConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Server configuration, loaded from TOML.
///
/// ```toml
/// [server]
/// bind = "0.0.0.0:8000"
/// data_dir = "/var/lib/condor"
/// workers = 8
///
/// [remote]
/// timeout_secs = 60
///
/// [[users]]
/// name = "alice"
/// token = "s3cret"
/// default_channels = ["alice"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Background workers for mirror downloads.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
            workers: default_workers(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_owned()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./condor-data")
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    /// API token accepted as `Authorization: Bearer` or `X-API-Key`.
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub default_channels: Vec<String>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// The user owning `token`, if any.
    pub fn user_for_token(&self, token: &str) -> Option<&UserConfig> {
        if token.is_empty() {
            return None;
        }
        self.users.iter().find(|u| u.token == token)
    }

    pub fn bootstrap(&self) -> BootstrapConfig {
        BootstrapConfig {
            users: self
                .users
                .iter()
                .map(|u| BootstrapUser {
                    name: u.name.clone(),
                    role: u.role.clone(),
                    default_channels: u.default_channels.clone(),
                })
                .collect(),
        }
    }
}
