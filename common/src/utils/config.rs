use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Root of the extraction cache; falls back to `<data_dir>/extracts`.
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_archive_base_url")]
    pub archive_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Zero runs items sequentially in input order.
    #[serde(default)]
    pub worker_count: usize,
    #[serde(default = "default_max_hot_log_lines")]
    pub max_hot_log_lines: usize,
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_dir: None,
            storage: default_storage_kind(),
            archive_base_url: default_archive_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            worker_count: 0,
            max_hot_log_lines: default_max_hot_log_lines(),
            user_agents: default_user_agents(),
        }
    }
}

impl AppConfig {
    /// Directory holding one sub-directory per cache bucket.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir.as_ref().map_or_else(
            || PathBuf::from(&self.data_dir).join("extracts"),
            PathBuf::from,
        )
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_archive_base_url() -> String {
    "https://data.commoncrawl.org".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_hot_log_lines() -> usize {
    10_000
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
