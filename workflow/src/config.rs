//! Cache configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, and `CPS_PARSE_CACHE_*` environment variables.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_ENABLED: &str = "CPS_PARSE_CACHE_ENABLED";
pub const ENV_CAPACITY: &str = "CPS_PARSE_CACHE_CAPACITY";
pub const ENV_CLEANUP_PERIOD: &str = "CPS_PARSE_CACHE_CLEANUP_PERIOD_SECS";
pub const ENV_ROOT: &str = "CPS_PARSE_CACHE_ROOT";

pub const DEFAULT_NAMESPACE: &str = "parse-cache-libraries";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The cache is off unless explicitly enabled.
    pub enabled: bool,
    /// Expected number of distinct scripts; sizes the entry map.
    pub capacity_hint: usize,
    #[serde(rename = "janitor_period_secs", with = "seconds")]
    pub janitor_period: Duration,
    /// Process root; the library store lives under `root_dir/namespace`.
    pub root_dir: PathBuf,
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity_hint: 50,
            janitor_period: Duration::from_secs(10 * 60),
            root_dir: std::env::temp_dir().join("cps"),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl CacheConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(CacheError::io(path))?;
        Self::from_toml_str(&text)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`, keyed by the `ENV_*` names.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_ENABLED) {
            self.enabled = parse_flag(ENV_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CAPACITY) {
            self.capacity_hint = parse_number(ENV_CAPACITY, &raw)? as usize;
        }
        if let Some(raw) = lookup(ENV_CLEANUP_PERIOD) {
            let secs = parse_number(ENV_CLEANUP_PERIOD, &raw)?;
            if secs == 0 {
                return Err(CacheError::Config(format!("{} must be positive", ENV_CLEANUP_PERIOD)));
            }
            self.janitor_period = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup(ENV_ROOT) {
            self.root_dir = PathBuf::from(raw);
        }
        Ok(self)
    }

    pub fn library_root(&self) -> PathBuf {
        self.root_dir.join(&self.namespace)
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(CacheError::Config(format!("{}: '{}' is not a boolean", name, other))),
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| CacheError::Config(format!("{}: '{}' is not a number: {}", name, raw, e)))
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(period: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(period.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
