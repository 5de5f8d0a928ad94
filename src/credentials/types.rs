//! Credential and listing types shared by the broker and its callers.

use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Credentials are refreshed once less than this much validity remains.
pub const CREDENTIAL_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Short-lived role credentials handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub region: String,
}

impl Credentials {
    /// Environment variables conventionally read by downstream tools.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("AWS_ACCESS_KEY_ID", self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.clone()),
            ("AWS_SESSION_TOKEN", self.session_token.clone()),
            ("AWS_REGION", self.region.clone()),
            ("AWS_DEFAULT_REGION", self.region.clone()),
        ]
    }
}

/// Cache entry for one (account, role) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCredential {
    pub account_id: String,
    pub role_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub region: String,
}

impl CachedCredential {
    /// Usable only with more than the refresh margin left.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::seconds(CREDENTIAL_REFRESH_MARGIN_SECS)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn credentials(&self, region: &str) -> Credentials {
        Credentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
            expires_at: self.expires_at,
            region: region.to_string(),
        }
    }
}

/// Account visible to the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

/// Role assignable within an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub account_id: String,
    pub role_name: String,
}

/// Cached listing with the time it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Listing<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(36_500));
        now >= self.fetched_at && now - self.fetched_at < ttl
    }
}

/// Request for role credentials.
///
/// # Example
/// ```
/// use ssobroker::credentials::CredentialRequest;
///
/// let request = CredentialRequest::builder()
///     .account_id("123456789012")
///     .role_name("ReadOnly")
///     .force_refresh(true)
///     .build();
/// assert!(request.region.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct CredentialRequest {
    #[builder(into)]
    pub account_id: String,
    #[builder(into)]
    pub role_name: String,
    #[builder(into)]
    pub region: Option<String>,
    /// Skip the cache, e.g. after the credentials were rejected downstream.
    #[builder(default)]
    pub force_refresh: bool,
}

impl CredentialRequest {
    pub fn new(account_id: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            role_name: role_name.into(),
            region: None,
            force_refresh: false,
        }
    }
}
