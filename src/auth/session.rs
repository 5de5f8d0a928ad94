//! Session facade: cached token reuse, login modes and invalidation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::browser::{BrowserLauncher, SystemBrowser};
use super::flow::{DeviceFlow, FlowState};
use super::oidc::{DeviceAuthorizationApi, OidcClient};
use super::token::{SsoToken, VerificationPrompt};
use crate::cache::{CacheStore, FileCacheStore, Namespace, DEFAULT_KEY};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, ErrorContext, FlowStage, Result};

/// Callback receiving verification instructions.
pub type PromptHandler = Arc<dyn Fn(&VerificationPrompt) + Send + Sync>;

/// How [`SessionManager::login`] waits for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    /// Poll inline until the flow reaches a terminal state.
    #[default]
    Blocking,
    /// Poll on a background task and return the instructions immediately.
    Detached,
}

/// Result of [`SessionManager::login`].
#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated(SsoToken),
    Pending(PendingLogin),
}

/// A detached login still waiting for the user.
///
/// The cache is the completion signal: observe it with
/// [`SessionManager::check_status`]. Aborting `handle` cancels polling.
#[derive(Debug)]
pub struct PendingLogin {
    pub prompt: VerificationPrompt,
    pub handle: JoinHandle<Result<SsoToken>>,
}

/// Session state as seen from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticated { expires_at: DateTime<Utc> },
    PendingVerification { prompt: VerificationPrompt },
    NotAuthenticated,
}

/// Facade over the SSO token lifecycle.
///
/// Decides whether the cached token is usable and runs the device flow
/// otherwise. Nothing is kept in memory across calls; every decision is made
/// from the cache.
///
/// # Example
/// ```no_run
/// use ssobroker::auth::SessionManager;
/// use ssobroker::config::BrokerConfig;
///
/// # async fn example() -> ssobroker::error::Result<()> {
/// let config = BrokerConfig::load()?;
/// let session = SessionManager::from_config(&config)?
///     .with_prompt_handler(|prompt| {
///         println!("Open {} and enter {}", prompt.verification_uri, prompt.user_code);
///     });
/// let token = session.ensure_authenticated().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    store: Arc<dyn CacheStore>,
    flow: Arc<DeviceFlow>,
    start_url: String,
    region: String,
    browser: Option<Arc<dyn BrowserLauncher>>,
    prompt_handler: Option<PromptHandler>,
}

impl SessionManager {
    pub fn new(
        config: &BrokerConfig,
        api: Arc<dyn DeviceAuthorizationApi>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let browser: Option<Arc<dyn BrowserLauncher>> = if config.open_browser {
            Some(Arc::new(SystemBrowser))
        } else {
            None
        };
        Self {
            flow: Arc::new(DeviceFlow::new(config, api, store.clone())),
            store,
            start_url: config.start_url.clone(),
            region: config.sso_region.clone(),
            browser,
            prompt_handler: None,
        }
    }

    /// Build with the HTTP client and file cache described by `config`.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(OidcClient::from_config(config)?);
        let store = Arc::new(FileCacheStore::new(config.cache_dir.clone()));
        Ok(Self::new(config, api, store))
    }

    pub fn with_browser(mut self, browser: Option<Arc<dyn BrowserLauncher>>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_prompt_handler(
        mut self,
        handler: impl Fn(&VerificationPrompt) + Send + Sync + 'static,
    ) -> Self {
        self.prompt_handler = Some(Arc::new(handler));
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// State of the flow driven by this manager in the current process.
    pub fn flow_state(&self) -> FlowState {
        self.flow.state()
    }

    /// Cached token, if still valid for the configured portal.
    pub fn cached_token(&self) -> Result<Option<SsoToken>> {
        SsoToken::load_valid(self.store.as_ref(), &self.start_url, &self.region)
    }

    /// Return a valid token, running a blocking device flow if needed.
    pub async fn ensure_authenticated(&self) -> Result<SsoToken> {
        match self.login(LoginMode::Blocking).await? {
            LoginOutcome::Authenticated(token) => Ok(token),
            LoginOutcome::Pending(_) => Err(BrokerError::AuthPending),
        }
    }

    /// Reuse the cached token or start a device flow.
    ///
    /// In [`LoginMode::Detached`] polling continues on a tokio task and the
    /// caller gets the verification instructions right away.
    pub async fn login(&self, mode: LoginMode) -> Result<LoginOutcome> {
        if let Some(token) = self.cached_token()? {
            tracing::debug!(expires_at = %token.expires_at, "Reusing cached SSO token");
            return Ok(LoginOutcome::Authenticated(token));
        }

        let context = self.flow.start().await?;
        self.announce(&context.prompt());

        match mode {
            LoginMode::Blocking => {
                let token = self.flow.poll(&context).await?;
                Ok(LoginOutcome::Authenticated(token))
            }
            LoginMode::Detached => {
                let flow = self.flow.clone();
                let prompt = context.prompt();
                let handle = tokio::spawn(async move { flow.poll(&context).await });
                Ok(LoginOutcome::Pending(PendingLogin { prompt, handle }))
            }
        }
    }

    /// Start a device flow and return its instructions without polling.
    ///
    /// The context is persisted; [`SessionManager::resume_login`] picks it up
    /// later, possibly from another process.
    pub async fn begin_login(&self) -> Result<VerificationPrompt> {
        let context = self.flow.start().await?;
        let prompt = context.prompt();
        self.announce(&prompt);
        Ok(prompt)
    }

    /// Poll a device authorization persisted by an earlier
    /// [`SessionManager::begin_login`] or detached login.
    pub async fn resume_login(&self) -> Result<SsoToken> {
        if let Some(token) = self.cached_token()? {
            return Ok(token);
        }
        let context = self.flow.resume()?.ok_or(BrokerError::AuthMissing {
            context: ErrorContext::at(FlowStage::Polling),
        })?;
        self.flow.poll(&context).await
    }

    /// Observe the session without blocking or touching the network.
    pub fn check_status(&self) -> Result<SessionStatus> {
        if let Some(token) = self.cached_token()? {
            return Ok(SessionStatus::Authenticated {
                expires_at: token.expires_at,
            });
        }
        if let Some(context) = self.flow.resume()? {
            return Ok(SessionStatus::PendingVerification {
                prompt: context.prompt(),
            });
        }
        Ok(SessionStatus::NotAuthenticated)
    }

    /// Drop the token and everything derived from it.
    ///
    /// Call this when a downstream call reports an authentication failure.
    pub fn invalidate(&self) -> Result<()> {
        invalidate_session(self.store.as_ref())
    }

    /// [`SessionManager::invalidate`] plus any in-flight device authorization.
    pub fn logout(&self) -> Result<()> {
        self.invalidate()?;
        self.store.delete(Namespace::DeviceAuthorization, DEFAULT_KEY)
    }

    fn announce(&self, prompt: &VerificationPrompt) {
        match &self.prompt_handler {
            Some(handler) => handler(prompt),
            None => tracing::info!(
                user_code = %prompt.user_code,
                verification_uri = %prompt.verification_uri,
                "Complete the sign-in in your browser"
            ),
        }
        if let Some(browser) = &self.browser {
            if let Err(e) = browser.open(prompt.browser_url()) {
                tracing::warn!(error = %e, "Could not open a browser; use the printed URL");
            }
        }
    }
}

/// Remove the SSO token, cached credentials and listings.
pub fn invalidate_session(store: &dyn CacheStore) -> Result<()> {
    store.delete(Namespace::Token, DEFAULT_KEY)?;
    store.clear(Namespace::Credentials)?;
    store.clear(Namespace::Roles)?;
    store.clear(Namespace::Accounts)?;
    tracing::debug!("SSO session invalidated");
    Ok(())
}
