//! HTTP client for the SSO portal: role credentials and assignment listings.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::types::{AccountInfo, RoleInfo};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, ErrorContext, FlowStage, Result};
use crate::util::http;

const BEARER_HEADER: &str = "x-amz-sso_bearer_token";
const PAGE_SIZE: u32 = 100;

/// Remote operations of the SSO portal.
#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials>;

    async fn list_accounts(
        &self,
        access_token: &str,
        next_token: Option<&str>,
    ) -> Result<Page<AccountInfo>>;

    async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<RoleInfo>>;
}

/// Credentials returned by the portal for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// reqwest-backed [`PortalApi`].
pub struct PortalClient {
    client: reqwest::Client,
    endpoint: String,
}

impl PortalClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let client = http::build_client(config.request_timeout)?;
        Ok(Self::new(client, config.portal_endpoint()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, &str)],
        context: ErrorContext,
    ) -> Result<T> {
        let url = format!("{}{path}", self.endpoint);
        let resp = self
            .client
            .get(url)
            .header(BEARER_HEADER, access_token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(http::status_to_error(status.as_u16(), &body, &headers, context));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl PortalApi for PortalClient {
    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials> {
        let context = ErrorContext::credentials(account_id, role_name)
            .with_stage(FlowStage::CredentialExchange);
        let payload: RoleCredentialsResponse = self
            .get(
                "/federation/credentials",
                access_token,
                &[("role_name", role_name), ("account_id", account_id)],
                context,
            )
            .await?;
        let creds = payload.role_credentials;
        let expires_at = Utc
            .timestamp_millis_opt(creds.expiration)
            .single()
            .ok_or_else(|| {
                BrokerError::Unexpected(format!(
                    "Invalid credential expiration {}",
                    creds.expiration
                ))
            })?;
        Ok(RoleCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
            expires_at,
        })
    }

    async fn list_accounts(
        &self,
        access_token: &str,
        next_token: Option<&str>,
    ) -> Result<Page<AccountInfo>> {
        let page_size = PAGE_SIZE.to_string();
        let mut query = vec![("max_result", page_size.as_str())];
        if let Some(token) = next_token {
            query.push(("next_token", token));
        }
        let payload: AccountListResponse = self
            .get(
                "/assignment/accounts",
                access_token,
                &query,
                ErrorContext::at(FlowStage::AccountListing),
            )
            .await?;
        Ok(Page {
            items: payload
                .account_list
                .into_iter()
                .map(|account| AccountInfo {
                    account_id: account.account_id,
                    account_name: account.account_name,
                    email_address: account.email_address,
                })
                .collect(),
            next_token: payload.next_token.filter(|token| !token.is_empty()),
        })
    }

    async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<RoleInfo>> {
        let page_size = PAGE_SIZE.to_string();
        let mut query = vec![("account_id", account_id), ("max_result", page_size.as_str())];
        if let Some(token) = next_token {
            query.push(("next_token", token));
        }
        let context = ErrorContext {
            account_id: Some(account_id.to_string()),
            ..ErrorContext::at(FlowStage::RoleListing)
        };
        let payload: RoleListResponse = self
            .get("/assignment/roles", access_token, &query, context)
            .await?;
        Ok(Page {
            items: payload
                .role_list
                .into_iter()
                .map(|role| RoleInfo {
                    account_id: role.account_id.unwrap_or_else(|| account_id.to_string()),
                    role_name: role.role_name,
                })
                .collect(),
            next_token: payload.next_token.filter(|token| !token.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsResponse {
    role_credentials: RoleCredentialsPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsPayload {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    /// Epoch milliseconds.
    expiration: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountListResponse {
    #[serde(default)]
    account_list: Vec<AccountPayload>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPayload {
    account_id: String,
    #[serde(default)]
    account_name: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleListResponse {
    #[serde(default)]
    role_list: Vec<RolePayload>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RolePayload {
    role_name: String,
    #[serde(default)]
    account_id: Option<String>,
}
