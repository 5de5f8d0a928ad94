//! Credential exchange, caching, listings and command execution.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::exec::{CommandExecutor, CommandOutput};
use super::portal::{Page, PortalApi, PortalClient};
use super::types::{
    AccountInfo, CachedCredential, CredentialRequest, Credentials, Listing, RoleInfo,
};
use crate::auth::{invalidate_session, SsoToken};
use crate::cache::{self, credential_key, normalize_key, CacheStore, Namespace, DEFAULT_KEY};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, ErrorContext, FlowStage, Result};
use crate::util::retry::RetryPolicy;

/// Upper bound on pages followed for a single listing.
const MAX_PAGES: usize = 100;

/// Exchanges the cached SSO token for role credentials and caches them.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use ssobroker::cache::FileCacheStore;
/// use ssobroker::config::BrokerConfig;
/// use ssobroker::credentials::CredentialBroker;
///
/// # async fn example() -> ssobroker::error::Result<()> {
/// let config = BrokerConfig::load()?;
/// let store = Arc::new(FileCacheStore::new(config.cache_dir.clone()));
/// let broker = CredentialBroker::from_config(&config, store)?;
/// let credentials = broker.get_credentials("123456789012", "ReadOnly", None).await?;
/// println!("{}", credentials.access_key_id);
/// # Ok(())
/// # }
/// ```
pub struct CredentialBroker {
    store: Arc<dyn CacheStore>,
    portal: Arc<dyn PortalApi>,
    retry: RetryPolicy,
    start_url: String,
    sso_region: String,
    default_region: Option<String>,
    listing_ttl: Duration,
}

impl CredentialBroker {
    pub fn new(
        config: &BrokerConfig,
        store: Arc<dyn CacheStore>,
        portal: Arc<dyn PortalApi>,
    ) -> Self {
        Self {
            store,
            portal,
            retry: config.retry.clone(),
            start_url: config.start_url.clone(),
            sso_region: config.sso_region.clone(),
            default_region: config.default_region.clone(),
            listing_ttl: config.listing_ttl,
        }
    }

    pub fn from_config(config: &BrokerConfig, store: Arc<dyn CacheStore>) -> Result<Self> {
        config.validate()?;
        let portal = Arc::new(PortalClient::from_config(config)?);
        Ok(Self::new(config, store, portal))
    }

    /// Credentials for `account_id` / `role_name`, from cache when they have
    /// more than five minutes of validity left.
    pub async fn get_credentials(
        &self,
        account_id: &str,
        role_name: &str,
        region: Option<&str>,
    ) -> Result<Credentials> {
        let request = CredentialRequest {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
            region: region.map(str::to_string),
            force_refresh: false,
        };
        self.get_credentials_with(&request).await
    }

    pub async fn get_credentials_with(&self, request: &CredentialRequest) -> Result<Credentials> {
        let region = self.resolve_region(request.region.as_deref());
        let key = credential_key(&request.account_id, &request.role_name);

        if !request.force_refresh {
            if let Some(cached) = self.cached_credential(&request.account_id, &request.role_name)? {
                tracing::debug!(
                    account_id = %request.account_id,
                    role_name = %request.role_name,
                    expires_at = %cached.expires_at,
                    "Using cached credentials"
                );
                return Ok(cached.credentials(&region));
            }
        }

        let context = ErrorContext::credentials(&request.account_id, &request.role_name)
            .with_stage(FlowStage::CredentialExchange);
        let token = self
            .require_token(FlowStage::CredentialExchange)
            .map_err(|e| e.with_context(context.clone()))?;

        let exchanged = self
            .retry
            .execute(|| {
                self.portal.get_role_credentials(
                    &token.access_token,
                    &request.account_id,
                    &request.role_name,
                )
            })
            .await;
        let role_credentials = match exchanged {
            Ok(credentials) => credentials,
            Err(e) => {
                self.invalidate_after(&e, Some(&key))?;
                return Err(e.with_context(context));
            }
        };

        let entry = CachedCredential {
            account_id: request.account_id.clone(),
            role_name: request.role_name.clone(),
            access_key_id: role_credentials.access_key_id,
            secret_access_key: role_credentials.secret_access_key,
            session_token: role_credentials.session_token,
            expires_at: role_credentials.expires_at,
            region: region.clone(),
        };
        cache::save(self.store.as_ref(), Namespace::Credentials, &key, &entry)?;
        tracing::info!(
            account_id = %entry.account_id,
            role_name = %entry.role_name,
            expires_at = %entry.expires_at,
            "Obtained role credentials"
        );
        Ok(entry.credentials(&region))
    }

    /// Cached entry for the pair, if still outside the refresh margin.
    pub fn cached_credential(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<Option<CachedCredential>> {
        let key = credential_key(account_id, role_name);
        let cached =
            cache::load::<CachedCredential>(self.store.as_ref(), Namespace::Credentials, &key)?;
        Ok(cached.filter(|entry| {
            entry.account_id == account_id && entry.role_name == role_name && entry.is_fresh()
        }))
    }

    /// Drop the cached credentials for one pair.
    pub fn forget(&self, account_id: &str, role_name: &str) -> Result<()> {
        self.store
            .delete(Namespace::Credentials, &credential_key(account_id, role_name))
    }

    /// Accounts assigned to the signed-in user, following every page.
    pub async fn list_accounts(&self, force_refresh: bool) -> Result<Vec<AccountInfo>> {
        if !force_refresh {
            if let Some(listing) =
                self.fresh_listing::<AccountInfo>(Namespace::Accounts, DEFAULT_KEY)?
            {
                return Ok(listing.items);
            }
        }
        let token = self.require_token(FlowStage::AccountListing)?;
        let accounts = self
            .paginate(FlowStage::AccountListing, |next| {
                let token = token.access_token.clone();
                async move { self.portal.list_accounts(&token, next.as_deref()).await }
            })
            .await
            .map_err(|e| e.with_context(ErrorContext::at(FlowStage::AccountListing)))?;
        cache::save(
            self.store.as_ref(),
            Namespace::Accounts,
            DEFAULT_KEY,
            &Listing::new(accounts.clone()),
        )?;
        Ok(accounts)
    }

    /// Roles the signed-in user may assume in `account_id`.
    pub async fn list_account_roles(
        &self,
        account_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<RoleInfo>> {
        let key = normalize_key(account_id);
        if !force_refresh {
            if let Some(listing) = self.fresh_listing::<RoleInfo>(Namespace::Roles, &key)? {
                return Ok(listing.items);
            }
        }
        let context = ErrorContext {
            account_id: Some(account_id.to_string()),
            ..ErrorContext::at(FlowStage::RoleListing)
        };
        let token = self
            .require_token(FlowStage::RoleListing)
            .map_err(|e| e.with_context(context.clone()))?;
        let roles = self
            .paginate(FlowStage::RoleListing, |next| {
                let token = token.access_token.clone();
                async move {
                    self.portal
                        .list_account_roles(&token, account_id, next.as_deref())
                        .await
                }
            })
            .await
            .map_err(|e| e.with_context(context))?;
        cache::save(
            self.store.as_ref(),
            Namespace::Roles,
            &key,
            &Listing::new(roles.clone()),
        )?;
        Ok(roles)
    }

    /// Run a command with credentials for `request`.
    ///
    /// When the command fails because the credentials were rejected, they
    /// are refreshed once and the command is run again; the second output is
    /// returned whatever it is.
    pub async fn run_with_credentials(
        &self,
        executor: &dyn CommandExecutor,
        request: &CredentialRequest,
        args: &[String],
    ) -> Result<CommandOutput> {
        let context = ErrorContext::credentials(&request.account_id, &request.role_name)
            .with_stage(FlowStage::CommandExecution);
        let credentials = self.get_credentials_with(request).await?;
        let region = request.region.as_deref();
        let output = executor
            .execute(&credentials, args, region)
            .await
            .map_err(|e| e.with_context(context.clone()))?;
        if !output.auth_failure() {
            return Ok(output);
        }

        tracing::warn!(
            account_id = %request.account_id,
            role_name = %request.role_name,
            exit_code = output.exit_code,
            "Credentials rejected downstream, refreshing and retrying once"
        );
        let refreshed = CredentialRequest {
            force_refresh: true,
            ..request.clone()
        };
        let credentials = self.get_credentials_with(&refreshed).await?;
        executor
            .execute(&credentials, args, region)
            .await
            .map_err(|e| e.with_context(context))
    }

    /// Region attached to returned credentials: request, then configured
    /// default, then the SSO region.
    pub fn resolve_region(&self, requested: Option<&str>) -> String {
        requested
            .filter(|region| !region.is_empty())
            .or(self.default_region.as_deref())
            .unwrap_or(&self.sso_region)
            .to_string()
    }

    fn require_token(&self, stage: FlowStage) -> Result<SsoToken> {
        SsoToken::load_valid(self.store.as_ref(), &self.start_url, &self.sso_region)?
            .ok_or_else(|| BrokerError::auth_missing(stage))
    }

    fn fresh_listing<T: serde::de::DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<Listing<T>>> {
        let listing = cache::load::<Listing<T>>(self.store.as_ref(), namespace, key)?;
        Ok(listing.filter(|listing| listing.is_fresh_at(Utc::now(), self.listing_ttl)))
    }

    async fn paginate<T, F, Fut>(&self, stage: FlowStage, mut fetch: F) -> Result<Vec<T>>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: std::future::Future<Output = Result<Page<T>>>,
    {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page = match self.retry.execute(|| fetch(next_token.clone())).await {
                Ok(page) => page,
                Err(e) => {
                    self.invalidate_after(&e, None)?;
                    return Err(e);
                }
            };
            items.extend(page.items);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(items),
            }
        }
        tracing::warn!(stage = %stage, pages = MAX_PAGES, "Stopped following listing pages");
        Ok(items)
    }

    /// Cache cleanup for errors detected after the fact.
    fn invalidate_after(&self, error: &BrokerError, credential_key: Option<&str>) -> Result<()> {
        match error.root() {
            BrokerError::AuthExpired { .. } => {
                tracing::warn!("SSO token rejected by the portal, invalidating session");
                invalidate_session(self.store.as_ref())
            }
            BrokerError::PermissionDenied { .. } | BrokerError::ResourceNotFound { .. } => {
                match credential_key {
                    Some(key) => self.store.delete(Namespace::Credentials, key),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}
