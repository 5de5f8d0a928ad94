//! SSO token and device-authorization context as persisted in the cache.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{self, CacheStore, Namespace, DEFAULT_KEY};
use crate::error::Result;

/// SSO access token persisted between invocations.
///
/// Validity is strict: a token is usable until the instant it expires.
///
/// # Example
/// ```no_run
/// use chrono::{Duration, Utc};
/// use ssobroker::auth::SsoToken;
///
/// let now = Utc::now();
/// let token = SsoToken {
///     access_token: "access".to_string(),
///     refresh_token: None,
///     token_type: "Bearer".to_string(),
///     issued_at: now,
///     expires_at: now + Duration::hours(8),
///     region: "us-east-1".to_string(),
///     start_url: "https://example.awsapps.com/start".to_string(),
/// };
/// assert!(token.is_valid());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub region: String,
    pub start_url: String,
}

impl SsoToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > self.issued_at && self.expires_at > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Whether the token was issued for this start URL and region.
    pub fn matches(&self, start_url: &str, region: &str) -> bool {
        self.start_url.trim_end_matches('/') == start_url.trim_end_matches('/')
            && self.region == region
    }

    /// Load the cached token if it is usable for `start_url` / `region`.
    ///
    /// Expired tokens and tokens issued for another portal are removed.
    pub fn load_valid(
        store: &dyn CacheStore,
        start_url: &str,
        region: &str,
    ) -> Result<Option<SsoToken>> {
        let Some(token) = cache::load::<SsoToken>(store, Namespace::Token, DEFAULT_KEY)? else {
            return Ok(None);
        };
        if !token.matches(start_url, region) {
            tracing::debug!(
                cached_start_url = %token.start_url,
                cached_region = %token.region,
                "Discarding token issued for a different portal"
            );
            store.delete(Namespace::Token, DEFAULT_KEY)?;
            return Ok(None);
        }
        if !token.is_valid() {
            tracing::debug!(expires_at = %token.expires_at, "Discarding expired token");
            store.delete(Namespace::Token, DEFAULT_KEY)?;
            return Ok(None);
        }
        Ok(Some(token))
    }
}

/// Provider `expiresIn` seconds as a duration, clamped to one year so a
/// bogus value cannot overflow timestamp arithmetic.
pub(crate) fn lifetime(expires_in: u64) -> chrono::Duration {
    const MAX_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;
    chrono::Duration::seconds(expires_in.min(MAX_LIFETIME_SECS) as i64)
}

/// In-flight device authorization, persisted as soon as the user code is
/// known so a later invocation can observe or resume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuthorizationContext {
    pub client_id: String,
    pub client_secret: String,
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub poll_interval_seconds: u64,
    pub region: String,
    pub start_url: String,
}

impl DeviceAuthorizationContext {
    /// Provider-mandated minimum delay between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn prompt(&self) -> VerificationPrompt {
        VerificationPrompt {
            user_code: self.user_code.clone(),
            verification_uri: self.verification_uri.clone(),
            verification_uri_complete: self.verification_uri_complete.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// What the user needs to complete a device authorization in a browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationPrompt {
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl VerificationPrompt {
    /// URL to open: the pre-filled variant when the provider offers one.
    pub fn browser_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}
