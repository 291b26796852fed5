use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};
use tsbs_report_ingest::{CacheConfig, LayoutConfig, LoaderConfig, WatchConfig};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read the configuration file")]
    Read(#[from] std::io::Error),
    #[error("Configuration is not valid YAML")]
    InvalidYaml(#[from] serde_yaml::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    // run directories and their layout
    #[serde(default, alias = "layout")]
    pub data: LayoutConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub baselines: BaselineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    // runs older than this many days are dropped, `null` keeps everything
    #[serde(default = "default_retention_days")]
    pub retention_days: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BaselineConfig {
    #[serde(default = "default_baseline_dir")]
    pub dir: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    // rows returned in a table, charts always use all rows
    #[serde(default = "default_table_limit")]
    pub table_limit: usize,
    #[serde(default = "default_options_ttl_secs")]
    pub options_ttl_secs: u64,
    // how long startup waits for the initial load before serving partial data
    #[serde(default = "default_startup_wait_secs")]
    pub startup_wait_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            data: LayoutConfig::default(),
            watch: WatchConfig::default(),
            cache: CacheConfig::default(),
            baselines: BaselineConfig::default(),
            server: ServerConfig::default(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            dir: default_baseline_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            table_limit: default_table_limit(),
            options_ttl_secs: default_options_ttl_secs(),
            startup_wait_secs: default_startup_wait_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn options_ttl(&self) -> Duration {
        Duration::from_secs(self.options_ttl_secs)
    }

    pub fn startup_wait(&self) -> Duration {
        Duration::from_secs(self.startup_wait_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ReportConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigErrors> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(
                "Configuration {} not found, using defaults",
                path.to_string_lossy()
            );
            Ok(Self::default())
        }
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            layout: self.data.clone(),
            watch: self.watch.clone(),
            cache: self.cache.clone(),
            retention_days: self.retention_days,
        }
    }

    /// Report every problem at once, returns true if any was found
    pub fn preflight_checks(&mut self) -> bool {
        let mut contains_error = false;

        if !self.data.path.is_dir() {
            // the watcher stays off, a later bulk load may still find the directory
            warn!(
                "data.path {} is not a directory, starting with an empty dataset",
                self.data.path.to_string_lossy()
            );
        }

        if self.data.result_file.as_os_str().is_empty() || self.data.result_file.is_absolute() {
            error!("data.result_file must be a path relative to a run directory");
            contains_error = true;
        }

        if let Err(e) = GlobBuilder::new(&self.data.log_glob).build() {
            error!("data.log_glob '{}' is not a valid glob: {e}", self.data.log_glob);
            contains_error = true;
        }

        if self.watch.enabled && (self.watch.create_settle_ms == 0 || self.watch.modify_settle_ms == 0) {
            warn!("watch settle delays of 0 may ingest half written files");
        }

        if self.cache.enabled {
            if self.cache.max_age_hours == 0 {
                error!("cache.max_age_hours cannot be 0, every snapshot would be stale. Disable the cache instead");
                contains_error = true;
            }
            if self.cache.save_interval_secs == 0 {
                error!("cache.save_interval_secs cannot be 0");
                contains_error = true;
            }
        }

        if let Err(e) = fs::create_dir_all(&self.baselines.dir) {
            error!(
                "baselines.dir {} cannot be created: {e}",
                self.baselines.dir.to_string_lossy()
            );
            contains_error = true;
        }

        if self.server.table_limit == 0 {
            warn!("server.table_limit is 0, falling back to 1000 rows");
            self.server.table_limit = default_table_limit();
        }

        if self.server.request_timeout_secs == 0 {
            error!("server.request_timeout_secs cannot be 0, every request would time out");
            contains_error = true;
        }

        if self.retention_days == Some(0) {
            error!("retention_days cannot be 0, every run would be dropped. Remove the key to keep all runs");
            contains_error = true;
        }

        contains_error
    }
}

fn default_retention_days() -> Option<u32> {
    Some(30)
}

fn default_baseline_dir() -> PathBuf {
    PathBuf::from("config")
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_table_limit() -> usize {
    1000
}

fn default_options_ttl_secs() -> u64 {
    300
}

fn default_startup_wait_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}
