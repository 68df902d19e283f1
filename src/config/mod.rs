use crate::error::ConfigError;
use http::Uri;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub primary: PrimaryConfig,
    pub secondary: SecondaryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub format: FormatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrimaryConfig {
    pub base_url: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecondaryConfig {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default = "default_true")]
    pub path_style: bool,
    #[serde(default = "default_url_expiry")]
    pub url_expiry_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub evict_to_ratio: f64,
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            max_entries: 1000,
            evict_to_ratio: 0.8,
            sweep_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub base_interval_seconds: u64,
    pub max_backoff_seconds: u64,
    pub jitter_ratio: f64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            base_interval_seconds: 60,
            max_backoff_seconds: 3600,
            jitter_ratio: 0.25,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { timeout_ms: 4000 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Static,
    Accept,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FormatConfig {
    pub probe: ProbeKind,
    pub avif: bool,
    pub webp: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            probe: ProbeKind::Accept,
            avif: true,
            webp: true,
        }
    }
}

fn default_health_path() -> String {
    "/cdn-cgi/health".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_url_expiry() -> u64 {
    3600
}

const ENV_PREFIX: &str = "IMGFAILOVER_";

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Overrides URLs and credentials from `IMGFAILOVER_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|v| !v.is_empty());

        if let Some(v) = var("PRIMARY_BASE_URL") {
            self.primary.base_url = v;
        }
        if let Some(v) = var("PRIMARY_AUTH_TOKEN") {
            self.primary.auth_token = Some(v);
        }
        if let Some(v) = var("SECONDARY_ENDPOINT") {
            self.secondary.endpoint = v;
        }
        if let Some(v) = var("SECONDARY_BUCKET") {
            self.secondary.bucket = v;
        }
        if let Some(v) = var("SECONDARY_ACCESS_KEY_ID") {
            self.secondary.access_key_id = v;
        }
        if let Some(v) = var("SECONDARY_SECRET_ACCESS_KEY") {
            self.secondary.secret_access_key = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("primary.base_url", &self.primary.base_url)?;
        if !self.primary.health_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "primary.health_path",
                "must start with '/'",
            ));
        }
        validate_http_url("secondary.endpoint", &self.secondary.endpoint)?;
        if self.secondary.bucket.trim().is_empty() {
            return Err(ConfigError::invalid("secondary.bucket", "must not be empty"));
        }
        if self.secondary.url_expiry_seconds == 0 {
            return Err(ConfigError::invalid(
                "secondary.url_expiry_seconds",
                "must be positive",
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid("cache.max_entries", "must be positive"));
        }
        if !(self.cache.evict_to_ratio > 0.0 && self.cache.evict_to_ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "cache.evict_to_ratio",
                format!("{} is outside (0, 1]", self.cache.evict_to_ratio),
            ));
        }
        if self.cache.sweep_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "cache.sweep_interval_seconds",
                "must be positive",
            ));
        }

        let hc = &self.health_check;
        if hc.base_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "health_check.base_interval_seconds",
                "must be positive",
            ));
        }
        if hc.max_backoff_seconds < hc.base_interval_seconds {
            return Err(ConfigError::invalid(
                "health_check.max_backoff_seconds",
                "must not be below base_interval_seconds",
            ));
        }
        if !(0.0..1.0).contains(&hc.jitter_ratio) {
            return Err(ConfigError::invalid(
                "health_check.jitter_ratio",
                format!("{} is outside [0, 1)", hc.jitter_ratio),
            ));
        }

        if self.network.timeout_ms == 0 {
            return Err(ConfigError::invalid("network.timeout_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_seconds)
    }

    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.secondary.url_expiry_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.network.timeout_ms)
    }
}

fn validate_http_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let uri: Uri = value
        .parse()
        .map_err(|e| ConfigError::invalid(field, format!("`{value}`: {e}")))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(ConfigError::invalid(field, "scheme must be http or https")),
    }
    if uri.host().is_none() {
        return Err(ConfigError::invalid(field, "missing host"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [primary]
        base_url = "https://images.example.com"

        [secondary]
        endpoint = "https://s3.example.com"
        bucket = "media"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.health_check.base_interval_seconds, 60);
        assert_eq!(config.health_check.max_backoff_seconds, 3600);
        assert_eq!(config.secondary.url_expiry_seconds, 3600);
        assert_eq!(config.primary.health_path, "/cdn-cgi/health");
        assert_eq!(config.format.probe, ProbeKind::Accept);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_credentials() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.apply_env_from(|name| match name {
            "IMGFAILOVER_SECONDARY_ACCESS_KEY_ID" => Some("AKID".to_string()),
            "IMGFAILOVER_SECONDARY_SECRET_ACCESS_KEY" => Some("secret".to_string()),
            "IMGFAILOVER_PRIMARY_BASE_URL" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.secondary.access_key_id, "AKID");
        assert_eq!(config.secondary.secret_access_key, "secret");
        // empty values are ignored
        assert_eq!(config.primary.base_url, "https://images.example.com");
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.primary.base_url = "ftp://images.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.health_check.max_backoff_seconds = 10;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.health_check.jitter_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_primary_section_fails_to_parse() {
        let err = Config::from_toml("[secondary]\nendpoint = \"x\"\nbucket = \"b\"\n");
        assert!(err.is_err());
    }
}
