//! Sync configuration.
//!
//! Stored at `~/.config/campus-sync/config.json`; missing file means defaults.
//! Each domain gets its own scheduler and interval; each resource is one
//! refresh task whose name is also its cache key.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_MEMORY_CAPACITY, DEFAULT_SWEEP_INTERVAL};
use crate::fetch::http::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::sync::DEFAULT_MIN_REFRESH_INTERVAL;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "campus-sync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Task name and cache key
    pub key: String,
    /// Path relative to `api_base_url`
    pub path: String,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub cache_dir: Option<PathBuf>,
    pub memory_capacity: usize,
    pub sweep_interval_secs: u64,
    pub min_refresh_interval_secs: u64,
    pub domains: Vec<DomainConfig>,
    pub log_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.campus.example.edu".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_dir: None,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            min_refresh_interval_secs: DEFAULT_MIN_REFRESH_INTERVAL.as_secs(),
            domains: vec![
                DomainConfig {
                    name: "rooms".to_string(),
                    interval_secs: 300,
                    resources: vec![
                        resource("rooms", "rooms", 900),
                        resource("bookings", "bookings", 300),
                        resource("staticDepartments", "departments", 86_400),
                    ],
                },
                DomainConfig {
                    name: "library".to_string(),
                    interval_secs: 120,
                    resources: vec![resource("spaces", "library/spaces", 600)],
                },
            ],
            log_dir: None,
        }
    }
}

fn resource(key: &str, path: &str, ttl_secs: u64) -> ResourceConfig {
    ResourceConfig {
        key: key.to_string(),
        path: path.to_string(),
        ttl_secs,
    }
}

impl SyncConfig {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Configured cache directory, or the platform cache directory.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        if self.sweep_interval_secs == 0 {
            bail!("sweep_interval_secs must be greater than zero");
        }
        if self.memory_capacity == 0 {
            bail!("memory_capacity must be greater than zero");
        }

        let mut keys = HashSet::new();
        let mut domains = HashSet::new();
        for domain in &self.domains {
            if !domains.insert(domain.name.as_str()) {
                bail!("Duplicate domain name: {}", domain.name);
            }
            if domain.interval_secs == 0 {
                bail!("Domain {} has a zero refresh interval", domain.name);
            }
            // Shorter intervals would see every scheduled cycle rate-limited away
            if domain.interval_secs < self.min_refresh_interval_secs {
                bail!(
                    "Domain {} refreshes every {}s, below min_refresh_interval_secs ({}s)",
                    domain.name,
                    domain.interval_secs,
                    self.min_refresh_interval_secs
                );
            }
            for res in &domain.resources {
                if res.key.trim().is_empty() {
                    bail!("Domain {} has a resource with an empty key", domain.name);
                }
                // Keys share one cache, so they must be unique across domains
                if !keys.insert(res.key.as_str()) {
                    bail!("Duplicate resource key: {}", res.key);
                }
            }
        }
        Ok(())
    }
}

impl DomainConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ResourceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
