use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::logging::{LogFormat, LogLevel};

const CONFIG_DIR: &str = "ochami";
const CONFIG_FILE: &str = "config.toml";

/// Service path joined onto a cluster URI when no cloud-init URI is set.
pub const DEFAULT_CLOUD_INIT_PATH: &str = "/cloud-init";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    NoConfigDir,
    #[error("failed to read config file {}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config file {}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write config file {}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to serialize config")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config key '{0}'")]
    InvalidKey(String),
    #[error("cluster '{0}' not found in config file")]
    UnknownCluster(String),
    #[error("no base URI for cloud-init: set a cluster uri in the config file or pass --uri")]
    MissingUri,
    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("failed to load CA certificate {}: {reason}", .path.display())]
    CaCert { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(skip)]
    path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cluster: Option<String>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// Root URI of the cluster, e.g. https://demo.openchami.cluster:8443
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Relative path or absolute URI of the cloud-init service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacert: Option<PathBuf>,
    #[serde(default = "enabled")]
    pub enable_auth: bool,
}

fn enabled() -> bool {
    true
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            uri: None,
            cloud_init_uri: None,
            cacert: None,
            enable_auth: true,
        }
    }
}

impl Config {
    /// Load the config file at `path` (or the default location). A missing
    /// file yields an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::get_config_dir()?.join(CONFIG_FILE),
        };

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };
        config.path = path;

        Ok(config)
    }

    pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|d| d.join(CONFIG_DIR))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cluster named on the command line, else `default-cluster`.
    pub fn cluster(
        &self,
        name: Option<&str>,
    ) -> Result<Option<(&str, &ClusterConfig)>, ConfigError> {
        let Some(name) = name.or(self.default_cluster.as_deref()) else {
            return Ok(None);
        };
        self.clusters
            .get_key_value(name)
            .map(|(k, v)| Some((k.as_str(), v)))
            .ok_or_else(|| ConfigError::UnknownCluster(name.to_string()))
    }

    /// Set a dotted key such as `clusters.demo.uri`, creating intermediate
    /// tables as needed, and write the file back.
    pub fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut table = self.read_table()?;

        let parts = split_key(key)?;
        let (last, sections) = parts
            .split_last()
            .ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;

        let mut current = &mut table;
        for section in sections {
            current = current
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()))
                .as_table_mut()
                .ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;
        }
        current.insert(last.to_string(), parse_value(value));

        // Refuse to write something the loader would reject.
        let content = toml::to_string_pretty(&table)?;
        toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, content).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let table = self.read_table()?;

        let mut current = &table;
        let parts = split_key(key)?;
        let (last, sections) = parts
            .split_last()
            .ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;
        for section in sections {
            match current.get(*section).and_then(|v| v.as_table()) {
                Some(t) => current = t,
                None => return Ok(None),
            }
        }

        Ok(current.get(*last).map(|v| match v {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    fn read_table(&self) -> Result<toml::Table, ConfigError> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        content.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

fn split_key(key: &str) -> Result<Vec<&str>, ConfigError> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }
    Ok(parts)
}

fn parse_value(value: &str) -> toml::Value {
    if let Ok(b) = value.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = value.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    toml::Value::String(value.to_string())
}

fn parse_absolute(uri: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
    if url.cannot_be_a_base() || !url.has_host() {
        return Err(invalid("must be \"proto://host[:port][/path]\""));
    }
    Ok(url)
}

/// Resolve the cloud-init base URI.
///
/// An absolute `service_uri` is used as-is. A relative one is joined onto
/// `cluster_uri`, and without one [`DEFAULT_CLOUD_INIT_PATH`] is.
pub fn cloud_init_base_uri(
    cluster_uri: Option<&str>,
    service_uri: Option<&str>,
) -> Result<Url, ConfigError> {
    if let Some(service) = service_uri {
        match Url::parse(service) {
            Ok(_) => return parse_absolute(service),
            Err(url::ParseError::RelativeUrlWithoutBase) => {}
            Err(e) => {
                return Err(ConfigError::InvalidUri {
                    uri: service.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    let mut base = parse_absolute(cluster_uri.ok_or(ConfigError::MissingUri)?)?;
    let relpath = service_uri.unwrap_or(DEFAULT_CLOUD_INIT_PATH);
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        relpath.trim_matches('/')
    );
    base.set_path(joined.trim_end_matches('/'));
    Ok(base)
}
