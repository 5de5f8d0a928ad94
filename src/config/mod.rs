//! Configuration system (layered: defaults < config file < env < code).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::auth::PollSettings;
use crate::error::{BrokerError, Result};
use crate::util::retry::RetryPolicy;

const DEFAULT_SSO_REGION: &str = "us-east-1";
const DEFAULT_CLIENT_NAME: &str = "ssobroker";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(60 * 60);

/// Broker configuration.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use ssobroker::config::BrokerConfig;
///
/// let config = BrokerConfig::new("https://example.awsapps.com/start", "eu-west-1")
///     .with_default_region("eu-central-1")
///     .with_request_timeout(Duration::from_secs(10));
/// assert_eq!(config.oidc_endpoint(), "https://oidc.eu-west-1.amazonaws.com");
/// assert_eq!(config.default_region.as_deref(), Some("eu-central-1"));
/// ```
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Portal start URL the device authorization is issued for.
    pub start_url: String,
    /// Region hosting the identity provider.
    pub sso_region: String,
    /// Region attached to credentials when a request names none.
    pub default_region: Option<String>,
    pub client_name: String,
    pub cache_dir: PathBuf,
    pub oidc_endpoint: Option<String>,
    pub portal_endpoint: Option<String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub poll: PollSettings,
    /// Try to open the verification page in a browser.
    pub open_browser: bool,
    /// How long account and role listings are served from cache.
    pub listing_ttl: Duration,
}

impl BrokerConfig {
    pub fn new(start_url: impl Into<String>, sso_region: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            sso_region: sso_region.into(),
            default_region: None,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            cache_dir: crate::cache::default_cache_dir(),
            oidc_endpoint: None,
            portal_endpoint: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            poll: PollSettings::default(),
            open_browser: true,
            listing_ttl: DEFAULT_LISTING_TTL,
        }
    }

    /// Default config file path (~/.ssobroker/config.toml).
    pub fn default_config_path() -> PathBuf {
        default_broker_dir().join("config.toml")
    }

    /// Load from `.env`, the config file (`SSOBROKER_CONFIG` or the default
    /// path, skipped when absent) and `SSOBROKER_*` variables.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let path = std::env::var("SSOBROKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_config_path());
        let file = if path.exists() {
            Some(FileConfig::read(&path)?)
        } else {
            None
        };
        let config = Self::from_sources(file, |name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`BrokerConfig::load`] with an explicit config file, which must
    /// exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let file = FileConfig::read(path.as_ref())?;
        let config = Self::from_sources(Some(file), |name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Layer a parsed config file and an environment lookup over defaults.
    pub fn from_sources(
        file: Option<FileConfig>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let file = file.unwrap_or_default();

        let start_url = env("SSOBROKER_START_URL")
            .or(file.start_url)
            .unwrap_or_default();
        let sso_region = env("SSOBROKER_SSO_REGION")
            .or(file.sso_region)
            .unwrap_or_else(|| DEFAULT_SSO_REGION.to_string());

        let mut config = Self::new(start_url, sso_region);
        config.default_region = env("SSOBROKER_REGION").or(file.region);
        if let Some(name) = file.client_name {
            config.client_name = name;
        }
        if let Some(dir) = env("SSOBROKER_CACHE_DIR").map(PathBuf::from).or(file.cache_dir) {
            config.cache_dir = dir;
        }
        config.oidc_endpoint = env("SSOBROKER_OIDC_ENDPOINT").or(file.oidc_endpoint);
        config.portal_endpoint = env("SSOBROKER_PORTAL_ENDPOINT").or(file.portal_endpoint);
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.listing_ttl_secs {
            config.listing_ttl = Duration::from_secs(secs);
        }
        if let Some(open) = file.open_browser {
            config.open_browser = open;
        }
        if let Some(value) = env("SSOBROKER_NO_BROWSER") {
            config.open_browser = !parse_flag(&value)?;
        }
        if let Some(retry) = file.retry {
            retry.apply(&mut config.retry);
        }
        if let Some(poll) = file.poll {
            poll.apply(&mut config.poll);
        }
        Ok(config)
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = Some(region.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_oidc_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.oidc_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_portal_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.portal_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_open_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    pub fn with_listing_ttl(mut self, ttl: Duration) -> Self {
        self.listing_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_url.trim().is_empty() {
            return Err(BrokerError::Validation(
                "start URL is not set (SSOBROKER_START_URL or start_url in config.toml)"
                    .to_string(),
            ));
        }
        if !self.start_url.starts_with("https://") && !self.start_url.starts_with("http://") {
            return Err(BrokerError::Validation(format!(
                "start URL must be an http(s) URL: {}",
                self.start_url
            )));
        }
        if self.sso_region.trim().is_empty() {
            return Err(BrokerError::Validation("SSO region is not set".to_string()));
        }
        if self.poll.max_pending_polls == 0 || self.poll.max_slow_downs == 0 {
            return Err(BrokerError::Validation(
                "poll limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn oidc_endpoint(&self) -> String {
        self.oidc_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://oidc.{}.amazonaws.com", self.sso_region))
    }

    pub fn portal_endpoint(&self) -> String {
        self.portal_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://portal.sso.{}.amazonaws.com", self.sso_region))
    }
}

/// Broker state directory (~/.ssobroker).
pub fn default_broker_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".ssobroker"))
        .unwrap_or_else(|| PathBuf::from(".ssobroker"))
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BrokerError::Configuration(format!(
            "expected a boolean, got {other:?}"
        ))),
    }
}

/// On-disk `config.toml` layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub start_url: Option<String>,
    pub sso_region: Option<String>,
    pub region: Option<String>,
    pub client_name: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub oidc_endpoint: Option<String>,
    pub portal_endpoint: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub listing_ttl_secs: Option<u64>,
    pub open_browser: Option<bool>,
    pub retry: Option<RetryFileConfig>,
    pub poll: Option<PollFileConfig>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// `[retry]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryFileConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
}

impl RetryFileConfig {
    fn apply(self, policy: &mut RetryPolicy) {
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(ms) = self.initial_delay_ms {
            policy.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(factor) = self.backoff_factor.filter(|f| f.is_finite() && *f >= 1.0) {
            policy.backoff_factor = factor;
        }
    }
}

/// `[poll]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollFileConfig {
    pub max_pending_polls: Option<u32>,
    pub max_slow_downs: Option<u32>,
    pub max_interval_secs: Option<u64>,
}

impl PollFileConfig {
    fn apply(self, poll: &mut PollSettings) {
        if let Some(n) = self.max_pending_polls {
            poll.max_pending_polls = n;
        }
        if let Some(n) = self.max_slow_downs {
            poll.max_slow_downs = n;
        }
        if let Some(secs) = self.max_interval_secs {
            poll.max_interval = Duration::from_secs(secs);
        }
    }
}
