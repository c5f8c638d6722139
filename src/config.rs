use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::AstroError;
use crate::osdr::OSDR_BASE_URL;

/// On-disk configuration file, all fields optional. Absent fields (or an
/// absent default file) fall back to built-in values.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub schema_version: Option<u32>,
    pub base_url: Option<String>,
    pub store_root: Option<String>,
    pub bulk_ttl_hours: Option<u64>,
    pub stats_ttl_hours: Option<u64>,
    pub target_unique: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub page_size: Option<usize>,
    pub max_pages: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: String,
    pub store_root: Option<Utf8PathBuf>,
    pub cache: CacheConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AstroError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("astrobio.json"),
        };

        // The default file is optional; an explicit path must exist.
        if !config_path.exists() {
            if path.is_none() {
                return Self::resolve_config(Config::default());
            }
            return Err(AstroError::ConfigRead(config_path));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AstroError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AstroError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, AstroError> {
        let defaults = CacheConfig::default();
        let cache = CacheConfig {
            bulk_ttl: config
                .bulk_ttl_hours
                .map(|hours| Duration::from_secs(hours * 60 * 60))
                .unwrap_or(defaults.bulk_ttl),
            stats_ttl: config
                .stats_ttl_hours
                .map(|hours| Duration::from_secs(hours * 60 * 60))
                .unwrap_or(defaults.stats_ttl),
            target_unique: config.target_unique.unwrap_or(defaults.target_unique),
            max_concurrent: config.max_concurrent.unwrap_or(defaults.max_concurrent),
            page_size: config.page_size.unwrap_or(defaults.page_size),
            max_pages: config.max_pages.unwrap_or(defaults.max_pages),
            ..defaults
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            base_url: config
                .base_url
                .unwrap_or_else(|| OSDR_BASE_URL.to_string()),
            store_root: config.store_root.map(Utf8PathBuf::from),
            cache,
        })
    }
}
