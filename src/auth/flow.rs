//! Device-authorization state machine and polling loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use strum::Display;

use super::oidc::{DeviceAuthorizationApi, TokenGrant, TokenPoll};
use super::token::{lifetime, DeviceAuthorizationContext, SsoToken};
use crate::cache::{self, CacheStore, Namespace, DEFAULT_KEY};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, ErrorContext, FlowStage, Result};
use crate::util::retry::RetryPolicy;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// States of a device-authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FlowState {
    Idle,
    Registering,
    AuthorizationStarted,
    Polling,
    Succeeded,
    Denied,
    Expired,
    Failed,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Denied | Self::Expired | Self::Failed
        )
    }
}

/// Limits applied by the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Pending responses tolerated before the flow is declared stale.
    pub max_pending_polls: u32,
    /// Consecutive `slow_down` responses tolerated before giving up.
    pub max_slow_downs: u32,
    /// Ceiling for the interval grown by `slow_down`.
    pub max_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_pending_polls: 30,
            max_slow_downs: 3,
            max_interval: Duration::from_secs(60),
        }
    }
}

/// Drives one device-authorization flow against a [`DeviceAuthorizationApi`],
/// persisting the in-flight context and the resulting token in a
/// [`CacheStore`].
pub struct DeviceFlow {
    api: Arc<dyn DeviceAuthorizationApi>,
    store: Arc<dyn CacheStore>,
    retry: RetryPolicy,
    poll: PollSettings,
    start_url: String,
    region: String,
    client_name: String,
    state: Mutex<FlowState>,
}

impl DeviceFlow {
    pub fn new(
        config: &BrokerConfig,
        api: Arc<dyn DeviceAuthorizationApi>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            api,
            store,
            retry: config.retry.clone(),
            poll: config.poll.clone(),
            start_url: config.start_url.clone(),
            region: config.sso_region.clone(),
            client_name: config.client_name.clone(),
            state: Mutex::new(FlowState::Idle),
        }
    }

    pub fn state(&self) -> FlowState {
        self.state.lock().map(|guard| *guard).unwrap_or(FlowState::Failed)
    }

    /// Register a client and start a device authorization.
    ///
    /// Any previously persisted context is cleared first; the new context is
    /// persisted before it is returned.
    pub async fn start(&self) -> Result<DeviceAuthorizationContext> {
        self.clear_context()?;
        self.transition(FlowState::Registering);

        let client = self
            .retry
            .execute(|| self.api.register_client(&self.client_name))
            .await
            .map_err(|e| self.abort(e, FlowStage::Registration))?;

        let authorization = self
            .retry
            .execute(|| self.api.start_device_authorization(&client, &self.start_url))
            .await
            .map_err(|e| self.abort(e, FlowStage::DeviceAuthorization))?;

        let started_at = Utc::now();
        let context = DeviceAuthorizationContext {
            client_id: client.client_id,
            client_secret: client.client_secret,
            device_code: authorization.device_code,
            user_code: authorization.user_code,
            verification_uri: authorization.verification_uri,
            verification_uri_complete: authorization.verification_uri_complete,
            started_at,
            expires_at: started_at + lifetime(authorization.expires_in),
            poll_interval_seconds: authorization
                .interval
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            region: self.region.clone(),
            start_url: self.start_url.clone(),
        };
        cache::save(
            self.store.as_ref(),
            Namespace::DeviceAuthorization,
            DEFAULT_KEY,
            &context,
        )?;
        self.transition(FlowState::AuthorizationStarted);
        tracing::debug!(
            user_code = %context.user_code,
            expires_at = %context.expires_at,
            interval_secs = context.poll_interval_seconds,
            "Device authorization started"
        );
        Ok(context)
    }

    /// Persisted context for this portal that is still before its deadline.
    ///
    /// Stale or foreign contexts are removed.
    pub fn resume(&self) -> Result<Option<DeviceAuthorizationContext>> {
        let Some(context) = cache::load::<DeviceAuthorizationContext>(
            self.store.as_ref(),
            Namespace::DeviceAuthorization,
            DEFAULT_KEY,
        )?
        else {
            return Ok(None);
        };
        let foreign = context.start_url.trim_end_matches('/')
            != self.start_url.trim_end_matches('/')
            || context.region != self.region;
        if foreign || context.is_expired_at(Utc::now()) {
            self.clear_context()?;
            return Ok(None);
        }
        Ok(Some(context))
    }

    /// Poll the token endpoint until the flow reaches a terminal state.
    ///
    /// The provider interval is a floor. Each `slow_down` doubles the interval
    /// up to [`PollSettings::max_interval`]; a `Pending` response drops it
    /// back to the floor. The context deadline bounds every poll, including
    /// transport retries.
    pub async fn poll(&self, context: &DeviceAuthorizationContext) -> Result<SsoToken> {
        self.transition(FlowState::Polling);

        let floor = context.poll_interval();
        let mut interval = floor;
        let mut pending_polls = 0u32;
        let mut slow_downs = 0u32;

        loop {
            let remaining = (context.expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(interval.min(remaining)).await;

            let remaining = (context.expires_at - Utc::now()).to_std().ok();
            let Some(remaining) = remaining.filter(|left| !left.is_zero()) else {
                return Err(self.finish(FlowState::Expired, deadline_passed()));
            };

            let outcome = tokio::time::timeout(
                remaining,
                self.retry.execute(|| self.api.create_token(context)),
            )
            .await;
            let outcome = match outcome {
                Err(_) => return Err(self.finish(FlowState::Expired, deadline_passed())),
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    return Err(self.finish(
                        FlowState::Failed,
                        e.with_context(ErrorContext::at(FlowStage::Polling)),
                    ))
                }
            };

            match outcome {
                TokenPoll::Pending => {
                    pending_polls += 1;
                    slow_downs = 0;
                    interval = floor;
                    tracing::debug!(pending_polls, "Authorization pending");
                    if pending_polls >= self.poll.max_pending_polls {
                        return Err(self.finish(
                            FlowState::Failed,
                            BrokerError::AuthTimeout {
                                message: format!(
                                    "still pending after {pending_polls} polls, restart login"
                                ),
                                context: ErrorContext::at(FlowStage::Polling),
                            },
                        ));
                    }
                }
                TokenPoll::SlowDown => {
                    slow_downs += 1;
                    pending_polls = 0;
                    if slow_downs >= self.poll.max_slow_downs {
                        return Err(self.finish(
                            FlowState::Failed,
                            BrokerError::rate_limited(format!(
                                "provider asked to slow down {slow_downs} times in a row"
                            ))
                            .with_context(ErrorContext::at(FlowStage::Polling)),
                        ));
                    }
                    interval = (interval * 2).min(self.poll.max_interval).max(floor);
                    tracing::debug!(
                        slow_downs,
                        interval_secs = interval.as_secs(),
                        "Provider asked to slow down"
                    );
                }
                TokenPoll::Denied => {
                    return Err(self.finish(
                        FlowState::Denied,
                        BrokerError::AuthDenied {
                            context: ErrorContext::at(FlowStage::Polling),
                        },
                    ));
                }
                TokenPoll::Expired => {
                    return Err(self.finish(
                        FlowState::Expired,
                        BrokerError::AuthExpired {
                            message: "device code expired".to_string(),
                            context: ErrorContext::at(FlowStage::Polling),
                        },
                    ));
                }
                TokenPoll::Failed { code, description } => {
                    return Err(self.finish(
                        FlowState::Failed,
                        BrokerError::Provider {
                            code,
                            description,
                            context: ErrorContext::at(FlowStage::Polling),
                        },
                    ));
                }
                TokenPoll::Issued(grant) => return self.complete(grant),
            }
        }
    }

    fn complete(&self, grant: TokenGrant) -> Result<SsoToken> {
        let issued_at = Utc::now();
        let token = SsoToken {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            token_type: grant.token_type,
            issued_at,
            expires_at: issued_at + lifetime(grant.expires_in),
            region: self.region.clone(),
            start_url: self.start_url.clone(),
        };
        if let Err(e) = cache::save(self.store.as_ref(), Namespace::Token, DEFAULT_KEY, &token) {
            return Err(self.finish(FlowState::Failed, e));
        }
        self.clear_context()?;
        self.transition(FlowState::Succeeded);
        tracing::info!(expires_at = %token.expires_at, "SSO login succeeded");
        Ok(token)
    }

    /// Terminal transition from the polling loop: drop the context, record
    /// the state and hand back the error.
    fn finish(&self, state: FlowState, error: BrokerError) -> BrokerError {
        if let Err(e) = self.clear_context() {
            tracing::warn!(error = %e, "Failed to clear device authorization context");
        }
        self.transition(state);
        tracing::warn!(state = %state, error = %error, "Device authorization ended");
        error
    }

    /// Failure before polling started.
    fn abort(&self, error: BrokerError, stage: FlowStage) -> BrokerError {
        self.transition(FlowState::Failed);
        error.with_context(ErrorContext::at(stage))
    }

    fn clear_context(&self) -> Result<()> {
        self.store.delete(Namespace::DeviceAuthorization, DEFAULT_KEY)
    }

    fn transition(&self, next: FlowState) {
        if let Ok(mut guard) = self.state.lock() {
            tracing::debug!(from = %*guard, to = %next, "Device flow transition");
            *guard = next;
        }
    }
}

fn deadline_passed() -> BrokerError {
    BrokerError::AuthExpired {
        message: "device authorization deadline passed".to_string(),
        context: ErrorContext::at(FlowStage::Polling),
    }
}
