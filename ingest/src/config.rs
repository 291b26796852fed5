use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Where runs live and how a run directory is laid out
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    // base directory holding one sub directory per run
    #[serde(default = "default_base_path")]
    pub path: PathBuf,
    // result CSV relative to a run directory
    #[serde(default = "default_result_file")]
    pub result_file: PathBuf,
    // load logs relative to a run directory
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_glob")]
    pub log_glob: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    // time a freshly created result file gets to be fully written
    #[serde(default = "default_create_settle_ms")]
    pub create_settle_ms: u64,
    #[serde(default = "default_modify_settle_ms")]
    pub modify_settle_ms: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    // snapshots older than this are ignored on startup
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    // how often the maintenance thread persists a changed dataset
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
}

/// Everything the loader needs, assembled by the embedding application
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoaderConfig {
    pub layout: LayoutConfig,
    pub watch: WatchConfig,
    pub cache: CacheConfig,
    pub retention_days: Option<u32>,
}

fn default_base_path() -> PathBuf {
    PathBuf::from("test_results")
}

fn default_result_file() -> PathBuf {
    PathBuf::from("query_result/TSBS_TEST_RESULT.csv")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("load_result")
}

fn default_log_glob() -> String {
    "*.log".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_create_settle_ms() -> u64 {
    5000
}

fn default_modify_settle_ms() -> u64 {
    2000
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("tsbs_cache.sqlite3")
}

fn default_max_age_hours() -> u64 {
    24
}

fn default_save_interval_secs() -> u64 {
    300
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            path: default_base_path(),
            result_file: default_result_file(),
            log_dir: default_log_dir(),
            log_glob: default_log_glob(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            create_settle_ms: default_create_settle_ms(),
            modify_settle_ms: default_modify_settle_ms(),
        }
    }
}

impl WatchConfig {
    pub fn create_settle(&self) -> Duration {
        Duration::from_millis(self.create_settle_ms)
    }

    pub fn modify_settle(&self) -> Duration {
        Duration::from_millis(self.modify_settle_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
            max_age_hours: default_max_age_hours(),
            save_interval_secs: default_save_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> chrono::Duration {
        // capped at a century, anything longer means never stale
        chrono::Duration::hours(self.max_age_hours.min(24 * 365 * 100) as i64)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs.max(1))
    }
}
