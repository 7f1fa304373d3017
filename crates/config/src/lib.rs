//! Layered configuration for bucketfs.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults ([`Config::default`]).
//! 2. `config.toml`, `config.yaml` and `config.json` in the platform config
//!    directory (see [`Config::project_dirs`]).
//! 3. An explicit file passed on the command line.
//! 4. `BUCKETFS_*` environment variables, with `__` separating nested keys
//!    (`BUCKETFS_STORAGES__FILEADMIN__BUCKET=media`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "BUCKETFS_";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    /// SQLite database holding the host's file metadata, read by the
    /// migration commands.
    pub catalog: Option<PathBuf>,
    /// Configured storage scopes, keyed by scope name.
    pub storages: BTreeMap<String, StorageConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When `false`, listing caches start out disabled.
    pub enabled: bool,
    /// Entry lifetime in seconds.
    pub lifetime: u64,
    /// Location of the shared cache database. Defaults to the platform
    /// cache directory.
    pub path: Option<PathBuf>,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lifetime: 3600,
            path: None,
        }
    }
}
impl CacheConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    S3,
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Scope name, filled in from the map key after loading.
    #[serde(skip)]
    pub name: String,
    pub kind: StorageKind,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    /// Key prefix inside the bucket that acts as the storage root.
    pub prefix: Option<String>,
    /// Directory on disk, for `local` storages.
    pub root: Option<PathBuf>,
    /// Base URI substituted into public URLs.
    pub base_uri: Option<String>,
}
impl StorageConfig {
    fn setting(&self, setting: &str) -> Option<&str> {
        match setting {
            "bucket" => self.bucket.as_deref(),
            "region" => self.region.as_deref(),
            "endpoint" => self.endpoint.as_deref(),
            "key_id" => self.key_id.as_deref(),
            "key_secret" => self.key_secret.as_deref(),
            "prefix" => self.prefix.as_deref(),
            "root" => self.root.as_deref().and_then(Path::to_str),
            "base_uri" => self.base_uri.as_deref(),
            _ => None,
        }
    }

    /// Value of a required setting. Blank values count as missing.
    pub fn require(&self, setting: &str) -> Result<&str> {
        self.setting(setting)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_raise(|| ErrorKind::ConfigurationMissing(self.name.clone(), setting.to_string()))
    }

    /// Value of an optional setting; blank values count as unset.
    pub fn optional(&self, setting: &str) -> Option<&str> {
        self.setting(setting).map(str::trim).filter(|value| !value.is_empty())
    }
}

impl Config {
    pub fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "bucketfs")
    }

    /// Build the layered figment without extracting it.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dirs) = Self::project_dirs() {
            let dir = dirs.config_dir();
            tracing::debug!(dir = %dir.display(), "Looking for configuration files");
            figment = figment
                .merge(Toml::file(dir.join("config.toml")))
                .merge(Yaml::file(dir.join("config.yaml")))
                .merge(Json::file(dir.join("config.json")));
        }
        if let Some(path) = explicit {
            // Figment silently skips missing files, which is right for the
            // platform defaults but not for a file the operator named.
            std::fs::metadata(path).or_raise(|| ErrorKind::Load)?;
            tracing::debug!(path = %path.display(), "Loading explicit configuration file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => figment.merge(Toml::file_exact(path)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR)))
    }

    /// Load configuration from every layer.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(explicit)?)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        for (name, storage) in config.storages.iter_mut() {
            storage.name = name.clone();
        }
        Ok(config)
    }

    pub fn storage(&self, name: &str) -> Result<&StorageConfig> {
        self.storages.get(name).ok_or_raise(|| ErrorKind::UnknownStorage(name.to_string()))
    }

    /// Cache database location: the configured path, else `cache.sqlite` in
    /// the platform cache directory.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.cache_dir().join("cache.sqlite")))
    }
}
