//! HTTP client for the identity provider's OIDC device-authorization API.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::token::DeviceAuthorizationContext;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, ErrorContext, FlowStage, Result};
use crate::util::http::{self, ProviderError};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const CLIENT_TYPE: &str = "public";

/// Remote operations of the device-authorization flow.
#[async_trait]
pub trait DeviceAuthorizationApi: Send + Sync {
    async fn register_client(&self, client_name: &str) -> Result<ClientRegistration>;

    async fn start_device_authorization(
        &self,
        client: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorization>;

    /// Poll the token endpoint once.
    ///
    /// Flow signals (`authorization_pending`, `slow_down`, ...) are returned
    /// as [`TokenPoll`] values. Only transport-level failures are errors.
    async fn create_token(&self, context: &DeviceAuthorizationContext) -> Result<TokenPoll>;
}

/// Credentials of a freshly registered public client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response of the device-authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorization {
    #[serde(alias = "device_code")]
    pub device_code: String,
    #[serde(alias = "user_code")]
    pub user_code: String,
    #[serde(alias = "verification_uri")]
    pub verification_uri: String,
    #[serde(default, alias = "verification_uri_complete")]
    pub verification_uri_complete: Option<String>,
    #[serde(alias = "expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

/// Token issued once the user approves the device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default = "default_token_type", alias = "token_type")]
    pub token_type: String,
    #[serde(alias = "expires_in")]
    pub expires_in: u64,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Outcome of a single token poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPoll {
    Issued(TokenGrant),
    Pending,
    SlowDown,
    Denied,
    Expired,
    Failed { code: String, description: String },
}

impl TokenPoll {
    /// Map a normalized provider error onto a poll outcome.
    pub fn from_provider_error(error: ProviderError) -> Self {
        match error.code.as_str() {
            "authorization_pending" => Self::Pending,
            "slow_down" => Self::SlowDown,
            "access_denied" => Self::Denied,
            "expired_token" => Self::Expired,
            _ => Self::Failed {
                description: error.description_or_code(),
                code: error.code,
            },
        }
    }
}

/// reqwest-backed [`DeviceAuthorizationApi`].
///
/// # Example
/// ```no_run
/// use ssobroker::auth::oidc::OidcClient;
/// use ssobroker::config::BrokerConfig;
///
/// let config = BrokerConfig::new("https://example.awsapps.com/start", "us-east-1");
/// let client = OidcClient::from_config(&config)?;
/// # Ok::<(), ssobroker::error::BrokerError>(())
/// ```
pub struct OidcClient {
    client: reqwest::Client,
    endpoint: String,
}

impl OidcClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let client = http::build_client(config.request_timeout)?;
        Ok(Self::new(client, config.oidc_endpoint()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.endpoint);
        let resp = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        Ok(resp)
    }
}

#[async_trait]
impl DeviceAuthorizationApi for OidcClient {
    async fn register_client(&self, client_name: &str) -> Result<ClientRegistration> {
        let resp = self
            .post(
                "/client/register",
                &RegisterClientRequest {
                    client_name,
                    client_type: CLIENT_TYPE,
                },
            )
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(http::status_to_error(
                status.as_u16(),
                &body,
                &headers,
                ErrorContext::at(FlowStage::Registration),
            ));
        }
        let payload: RegisterClientResponse = resp.json().await?;
        Ok(ClientRegistration {
            client_id: payload.client_id,
            client_secret: payload.client_secret,
            expires_at: payload
                .client_secret_expires_at
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        })
    }

    async fn start_device_authorization(
        &self,
        client: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorization> {
        let resp = self
            .post(
                "/device_authorization",
                &StartDeviceAuthorizationRequest {
                    client_id: &client.client_id,
                    client_secret: &client.client_secret,
                    start_url,
                },
            )
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(http::status_to_error(
                status.as_u16(),
                &body,
                &headers,
                ErrorContext::at(FlowStage::DeviceAuthorization),
            ));
        }
        let payload: DeviceAuthorization = resp.json().await?;
        if payload.device_code.is_empty() || payload.user_code.is_empty() {
            return Err(BrokerError::Unexpected(
                "Device authorization response missing device or user code".to_string(),
            ));
        }
        Ok(payload)
    }

    async fn create_token(&self, context: &DeviceAuthorizationContext) -> Result<TokenPoll> {
        let resp = self
            .post(
                "/token",
                &CreateTokenRequest {
                    client_id: &context.client_id,
                    client_secret: &context.client_secret,
                    grant_type: DEVICE_CODE_GRANT,
                    device_code: &context.device_code,
                },
            )
            .await?;
        let status = resp.status();
        if status.is_success() {
            let grant: TokenGrant = resp.json().await?;
            return Ok(TokenPoll::Issued(grant));
        }

        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        let error_type = headers
            .get("x-amzn-errortype")
            .and_then(|value| value.to_str().ok());
        match ProviderError::parse(&body, error_type) {
            Some(error) => {
                let poll = TokenPoll::from_provider_error(error);
                // Unknown codes on a throttle or server failure stay retryable.
                let transient = status.as_u16() == 429 || status.is_server_error();
                if transient && matches!(poll, TokenPoll::Failed { .. }) {
                    return Err(http::status_to_error(
                        status.as_u16(),
                        &body,
                        &headers,
                        ErrorContext::at(FlowStage::Polling),
                    ));
                }
                Ok(poll)
            }
            None => Err(http::status_to_error(
                status.as_u16(),
                &body,
                &headers,
                ErrorContext::at(FlowStage::Polling),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientRequest<'a> {
    client_name: &'a str,
    client_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientResponse {
    #[serde(alias = "client_id")]
    client_id: String,
    #[serde(alias = "client_secret")]
    client_secret: String,
    #[serde(default, alias = "client_secret_expires_at")]
    client_secret_expires_at: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartDeviceAuthorizationRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    start_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    device_code: &'a str,
}
