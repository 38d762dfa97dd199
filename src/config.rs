//! Configuration management for xacquire using the prefer crate.
//!
//! [`Config`] mirrors the on-disk file and is entirely optional;
//! [`Settings`] is the resolved view the rest of the program runs on.
//! Precedence, lowest first: built-in defaults, config file, environment.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::instances::RegistryConfig;
use crate::job::JobDefaults;
use crate::pagination::PaginationConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::scrapers::browser::BrowserEngineConfig;

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:1337";
/// Default directory for result files.
pub const DEFAULT_OUT_DIR: &str = "out";

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub bind: String,
    /// Mirror base URLs, in preference order.
    pub instances: Vec<String>,
    pub out_dir: PathBuf,
    pub browser_workers: usize,
    pub job_limiter: RateLimiterConfig,
    pub fetch_limiter: RateLimiterConfig,
    pub registry: RegistryConfig,
    pub pagination: PaginationConfig,
    pub defaults: JobDefaults,
    pub browser: BrowserEngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            instances: vec!["https://nitter.net".to_string()],
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            browser_workers: 2,
            job_limiter: RateLimiterConfig::job_pool(),
            fetch_limiter: RateLimiterConfig::fetch_pool(),
            registry: RegistryConfig::default(),
            pagination: PaginationConfig::default(),
            defaults: JobDefaults::default(),
            browser: BrowserEngineConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `config_path`, or from a discovered config file
    /// when none is given, then apply environment overrides.
    pub async fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => Config::load_from_path(path).await?,
            None => Config::load().await,
        };
        let mut settings = Self::default();
        config.apply_to_settings(&mut settings);
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(bind) = var("BIND") {
            tracing::debug!("Using BIND from environment: {}", bind);
            self.bind = bind;
        }
        if let Some(port) = var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    let host = self
                        .bind
                        .rsplit_once(':')
                        .map(|(host, _)| host.to_string())
                        .unwrap_or_else(|| self.bind.clone());
                    self.bind = format!("{}:{}", host, port);
                }
                Err(_) => tracing::warn!("Ignoring invalid PORT '{}'", port),
            }
        }
        if let Some(instances) = var("INSTANCES") {
            self.instances = split_list(&instances);
        }
        if let Some(out_dir) = var("OUT_DIR") {
            self.out_dir = expand_path(&out_dir);
        }
        if let Some(url) = var("BROWSER_URL") {
            tracing::debug!("Using remote browser from environment: {}", url);
            self.browser.remote_url = Some(url);
        }
        if let Some(workers) = var("BROWSER_WORKERS") {
            match workers.parse::<usize>() {
                Ok(n) if n > 0 => self.browser_workers = n,
                _ => tracing::warn!("Ignoring invalid BROWSER_WORKERS '{}'", workers),
            }
        }
    }

    /// Render as TOML for `xacquire config`.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }
}

/// Configuration file structure. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_limiter: Option<RateLimiterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_limiter: Option<RateLimiterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<JobDefaults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserEngineConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_workers: Option<usize>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer for discovery.
    /// Falls back to defaults when nothing is found or the file is invalid.
    pub async fn load() -> Self {
        let path = match prefer::load("xacquire").await {
            Ok(pref_config) => pref_config.source_path().map(|p| p.to_path_buf()),
            Err(_) => None,
        };
        let Some(path) = path else {
            tracing::debug!("No config file found, using defaults");
            return Self::default();
        };
        match Self::load_from_path(&path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file {}: {:#}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).context("Failed to parse TOML config")?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
            }
            _ => serde_json::from_str(&contents).context("Failed to parse JSON config")?,
        };

        tracing::debug!("Loaded config from {}", path.display());
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Overlay every field that is set onto `settings`.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref bind) = self.bind {
            settings.bind = bind.clone();
        }
        if let Some(ref instances) = self.instances {
            settings.instances = instances
                .iter()
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(ref out_dir) = self.out_dir {
            settings.out_dir = expand_path(out_dir);
        }
        if let Some(ref limiter) = self.job_limiter {
            settings.job_limiter = limiter.clone();
        }
        if let Some(ref limiter) = self.fetch_limiter {
            settings.fetch_limiter = limiter.clone();
        }
        if let Some(ref registry) = self.registry {
            settings.registry = registry.clone();
        }
        if let Some(ref pagination) = self.pagination {
            settings.pagination = pagination.clone();
        }
        if let Some(ref defaults) = self.defaults {
            settings.defaults = defaults.clone();
        }
        if let Some(ref browser) = self.browser {
            settings.browser = browser.clone();
        }
        if let Some(workers) = self.browser_workers {
            settings.browser_workers = workers.max(1);
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.bind, "0.0.0.0:1337");
        assert_eq!(settings.out_dir, PathBuf::from("out"));
        assert_eq!(settings.job_limiter.max_concurrent, 5);
        assert_eq!(settings.fetch_limiter.max_concurrent, 2);
        assert_eq!(settings.fetch_limiter.max_retries, 3);
        assert_eq!(settings.defaults.posts_limit, 100);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings.apply_env(env(&[
            ("PORT", "8080"),
            ("INSTANCES", "https://a.example/, https://b.example ,"),
            ("OUT_DIR", "/tmp/results"),
            ("BROWSER_URL", "http://chrome:9222"),
            ("BROWSER_WORKERS", "4"),
        ]));

        assert_eq!(settings.bind, "0.0.0.0:8080");
        assert_eq!(
            settings.instances,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(settings.out_dir, PathBuf::from("/tmp/results"));
        assert_eq!(
            settings.browser.remote_url.as_deref(),
            Some("http://chrome:9222")
        );
        assert_eq!(settings.browser_workers, 4);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut settings = Settings::default();
        settings.apply_env(env(&[("PORT", "http"), ("BROWSER_WORKERS", "0")]));
        assert_eq!(settings.bind, "0.0.0.0:1337");
        assert_eq!(settings.browser_workers, 2);
    }

    #[test]
    fn test_bind_then_port() {
        let mut settings = Settings::default();
        settings.apply_env(env(&[("BIND", "127.0.0.1:3000"), ("PORT", "4000")]));
        assert_eq!(settings.bind, "127.0.0.1:4000");
    }

    #[tokio::test]
    async fn test_load_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("xacquire.toml");
        std::fs::write(
            &path,
            r#"
bind = "127.0.0.1:9000"
instances = ["https://mirror.example/"]
browser_workers = 3

[fetch_limiter]
max_concurrent = 4
requests_per_second = 1.0

[defaults]
posts_limit = 50
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);
        assert_eq!(settings.bind, "127.0.0.1:9000");
        assert_eq!(settings.instances, vec!["https://mirror.example".to_string()]);
        assert_eq!(settings.browser_workers, 3);
        assert_eq!(settings.fetch_limiter.max_concurrent, 4);
        assert_eq!(settings.fetch_limiter.requests_per_second, 1.0);
        assert_eq!(settings.defaults.posts_limit, 50);
        assert_eq!(settings.defaults.delay_between_pages_ms, 3000);
        assert_eq!(settings.job_limiter, RateLimiterConfig::job_pool());
    }

    #[tokio::test]
    async fn test_load_yaml_and_json_files() {
        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("xacquire.yaml");
        std::fs::write(&yaml, "out_dir: results\nbrowser_workers: 5\n").unwrap();
        let config = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(config.browser_workers, Some(5));
        assert_eq!(config.out_dir.as_deref(), Some("results"));

        let json = dir.path().join("xacquire.json");
        std::fs::write(&json, r#"{"bind": "0.0.0.0:7000"}"#).unwrap();
        let config = Config::load_from_path(&json).await.unwrap();
        assert_eq!(config.bind.as_deref(), Some("0.0.0.0:7000"));
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "bind = [").unwrap();
        assert!(Config::load_from_path(&path).await.is_err());
        assert!(Config::load_from_path(&dir.path().join("missing.toml"))
            .await
            .is_err());
    }

    #[test]
    fn test_settings_render_as_toml() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("bind = \"0.0.0.0:1337\""));
        assert!(rendered.contains("[fetch_limiter]"));
    }
}
