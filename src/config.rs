//! Configuration.
//!
//! Sources, highest priority first:
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables (`TRENDCACHE_CACHE_ROOT`, `TRENDCACHE_POSTS_ROOT`,
//!    `TRENDCACHE_ACCOUNTS_PATH`)
//! 3. TOML file
//! 4. Built-in defaults
//!
//! ```toml
//! cache_root = "/var/lib/trendcache"
//!
//! [corpus]
//! posts_root = "/data/posts"
//! accounts_path = "/data/accounts.json"
//!
//! [worker]
//! interval_secs = 15
//! max_attempts = 5
//! kinds = ["word_frequency", "word_cloud", "topic_modeling"]
//!
//! [notify]
//! transport = "outbox"
//! outbox_dir = "/var/spool/trendcache"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::kind::RequestKind;
use crate::notify::{DEFAULT_SENDER, DEFAULT_SUBJECT};
use crate::worker::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS};

pub const ENV_CACHE_ROOT: &str = "TRENDCACHE_CACHE_ROOT";
pub const ENV_POSTS_ROOT: &str = "TRENDCACHE_POSTS_ROOT";
pub const ENV_ACCOUNTS_PATH: &str = "TRENDCACHE_ACCOUNTS_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorpusConfig {
    #[serde(default = "default_posts_root")]
    pub posts_root: PathBuf,
    #[serde(default = "default_accounts_path")]
    pub accounts_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_kinds")]
    pub kinds: Vec<RequestKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Log,
    Outbox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    /// Required by the outbox transport.
    #[serde(default)]
    pub outbox_dir: Option<PathBuf>,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("cache")
}

fn default_posts_root() -> PathBuf {
    PathBuf::from("data/posts")
}

fn default_accounts_path() -> PathBuf {
    PathBuf::from("data/accounts.json")
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL.as_secs()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_kinds() -> Vec<RequestKind> {
    RequestKind::ALL.to_vec()
}

fn default_sender() -> String {
    DEFAULT_SENDER.to_string()
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            posts_root: default_posts_root(),
            accounts_path: default_accounts_path(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
            kinds: default_kinds(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            sender: default_sender(),
            subject: default_subject(),
            outbox_dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            corpus: CorpusConfig::default(),
            worker: WorkerConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
                debug!(path = %path.display(), "loaded config file");
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Override paths from environment variables looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_CACHE_ROOT) {
            self.cache_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_POSTS_ROOT) {
            self.corpus.posts_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_ACCOUNTS_PATH) {
            self.corpus.accounts_path = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(Error::Config("cache_root must not be empty".into()));
        }
        if self.worker.interval_secs == 0 {
            return Err(Error::Config("worker.interval_secs must be at least 1".into()));
        }
        if self.worker.max_attempts == 0 {
            return Err(Error::Config("worker.max_attempts must be at least 1".into()));
        }
        if self.worker.kinds.is_empty() {
            return Err(Error::Config("worker.kinds must name at least one kind".into()));
        }
        if self.notify.transport == TransportKind::Outbox && self.notify.outbox_dir.is_none() {
            return Err(Error::Config("notify.outbox_dir is required for the outbox transport".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.worker.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.interval(), Duration::from_secs(15));
        assert_eq!(config.worker.max_attempts, 5);
        assert_eq!(config.worker.kinds.len(), 3);
        config.validate().unwrap();
    }

    #[test]
    fn parses_full_file() {
        let config = Config::from_toml_str(
            r#"
            cache_root = "/var/lib/trendcache"

            [corpus]
            posts_root = "/data/posts"

            [worker]
            interval_secs = 60
            kinds = ["word_cloud"]

            [notify]
            transport = "outbox"
            outbox_dir = "/var/spool/trendcache"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/var/lib/trendcache"));
        assert_eq!(config.corpus.accounts_path, PathBuf::from("data/accounts.json"));
        assert_eq!(config.worker.kinds, vec![RequestKind::WordCloud]);
        assert_eq!(config.notify.transport, TransportKind::Outbox);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml_str("cache_rot = \"x\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::from_toml_str("cache_root = \"/from/file\"").unwrap();
        config.apply_env(|key| match key {
            ENV_CACHE_ROOT => Some("/from/env".into()),
            ENV_POSTS_ROOT => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.cache_root, PathBuf::from("/from/env"));
        assert_eq!(config.corpus.posts_root, PathBuf::from("data/posts"));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = Config::default();
        config.worker.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.notify.transport = TransportKind::Outbox;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
