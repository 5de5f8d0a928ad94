#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use ssobroker::auth::oidc::{ClientRegistration, DeviceAuthorization, TokenGrant};
use ssobroker::auth::{DeviceAuthorizationApi, DeviceAuthorizationContext, SsoToken, TokenPoll};
use ssobroker::cache::{self, CacheStore, Namespace, DEFAULT_KEY};
use ssobroker::config::BrokerConfig;
use ssobroker::credentials::{
    AccountInfo, CommandExecutor, CommandOutput, Credentials, Page, PortalApi, RoleCredentials,
    RoleInfo,
};
use ssobroker::error::{BrokerError, Result};
use ssobroker::util::retry::RetryPolicy;

pub const START_URL: &str = "https://example.awsapps.com/start";
pub const REGION: &str = "us-east-1";

/// Config with fast retries and no browser.
pub fn config() -> BrokerConfig {
    BrokerConfig::new(START_URL, REGION)
        .with_open_browser(false)
        .with_retry(RetryPolicy {
            max_attempts: 2,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
            ..RetryPolicy::default()
        })
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<(Namespace, String), Value>>,
    sets: Mutex<HashMap<Namespace, usize>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes to `namespace` so far.
    pub fn set_count(&self, namespace: Namespace) -> usize {
        self.sets
            .lock()
            .expect("store lock poisoned")
            .get(&namespace)
            .copied()
            .unwrap_or(0)
    }

    pub fn contains(&self, namespace: Namespace, key: &str) -> bool {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .contains_key(&(namespace, key.to_string()))
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .lock()
            .expect("store lock poisoned")
            .get(&(namespace, key.to_string()))
            .cloned())
    }

    fn set(&self, namespace: Namespace, key: &str, value: &Value) -> Result<()> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .insert((namespace, key.to_string()), value.clone());
        *self
            .sets
            .lock()
            .expect("store lock poisoned")
            .entry(namespace)
            .or_default() += 1;
        Ok(())
    }

    fn delete(&self, namespace: Namespace, key: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .remove(&(namespace, key.to_string()));
        Ok(())
    }

    fn clear(&self, namespace: Namespace) -> Result<()> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .retain(|(ns, _), _| *ns != namespace);
        Ok(())
    }

    fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .expect("store lock poisoned")
            .keys()
            .filter(|(ns, _)| *ns == namespace)
            .map(|(_, key)| key.clone())
            .collect())
    }
}

pub fn sso_token(expires_in: Duration) -> SsoToken {
    let now = Utc::now();
    SsoToken {
        access_token: "sso-access-token".to_string(),
        refresh_token: None,
        token_type: "Bearer".to_string(),
        issued_at: now - Duration::minutes(1),
        expires_at: now + expires_in,
        region: REGION.to_string(),
        start_url: START_URL.to_string(),
    }
}

pub fn seed_token(store: &dyn CacheStore, token: &SsoToken) {
    cache::save(store, Namespace::Token, DEFAULT_KEY, token).expect("seed token");
}

pub fn device_context(expires_at: DateTime<Utc>, interval: u64) -> DeviceAuthorizationContext {
    DeviceAuthorizationContext {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        device_code: "device-code".to_string(),
        user_code: "ABCD-EFGH".to_string(),
        verification_uri: "https://device.sso.us-east-1.amazonaws.com/".to_string(),
        verification_uri_complete: None,
        started_at: Utc::now(),
        expires_at,
        poll_interval_seconds: interval,
        region: REGION.to_string(),
        start_url: START_URL.to_string(),
    }
}

pub fn grant(expires_in: u64) -> TokenGrant {
    TokenGrant {
        access_token: "issued-access-token".to_string(),
        token_type: "Bearer".to_string(),
        expires_in,
        refresh_token: None,
    }
}

/// Device-authorization API answering token polls from a script.
///
/// Polls past the end of the script report `Pending`.
pub struct ScriptedDeviceApi {
    polls: Mutex<VecDeque<Result<TokenPoll>>>,
    poll_instants: Mutex<Vec<tokio::time::Instant>>,
    pub registrations: AtomicUsize,
    pub authorizations: AtomicUsize,
    pub interval: Option<u64>,
    pub expires_in: u64,
}

impl ScriptedDeviceApi {
    pub fn new(script: Vec<TokenPoll>) -> Self {
        Self::with_results(script.into_iter().map(Ok).collect())
    }

    pub fn with_results(script: Vec<Result<TokenPoll>>) -> Self {
        Self {
            polls: Mutex::new(script.into()),
            poll_instants: Mutex::new(Vec::new()),
            registrations: AtomicUsize::new(0),
            authorizations: AtomicUsize::new(0),
            interval: Some(5),
            expires_in: 600,
        }
    }

    pub fn poll_count(&self) -> usize {
        self.poll_instants.lock().expect("lock poisoned").len()
    }

    /// Gaps between consecutive polls.
    pub fn poll_gaps(&self) -> Vec<std::time::Duration> {
        let instants = self.poll_instants.lock().expect("lock poisoned");
        instants.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn network_calls(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
            + self.authorizations.load(Ordering::SeqCst)
            + self.poll_count()
    }
}

#[async_trait]
impl DeviceAuthorizationApi for ScriptedDeviceApi {
    async fn register_client(&self, _client_name: &str) -> Result<ClientRegistration> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(ClientRegistration {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            expires_at: None,
        })
    }

    async fn start_device_authorization(
        &self,
        _client: &ClientRegistration,
        _start_url: &str,
    ) -> Result<DeviceAuthorization> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceAuthorization {
            device_code: "device-code".to_string(),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://device.sso.us-east-1.amazonaws.com/".to_string(),
            verification_uri_complete: Some(
                "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH".to_string(),
            ),
            expires_in: self.expires_in,
            interval: self.interval,
        })
    }

    async fn create_token(&self, _context: &DeviceAuthorizationContext) -> Result<TokenPoll> {
        self.poll_instants
            .lock()
            .expect("lock poisoned")
            .push(tokio::time::Instant::now());
        self.polls
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or(Ok(TokenPoll::Pending))
    }
}

pub fn role_credentials(valid_for: Duration) -> RoleCredentials {
    RoleCredentials {
        access_key_id: "ASIAEXAMPLE".to_string(),
        secret_access_key: "secret".to_string(),
        session_token: "session".to_string(),
        expires_at: Utc::now() + valid_for,
    }
}

/// Portal with scripted credential results and fixed listing pages.
pub struct FakePortal {
    pub credential_results: Mutex<VecDeque<Result<RoleCredentials>>>,
    pub credential_calls: AtomicUsize,
    pub account_pages: Vec<Page<AccountInfo>>,
    pub account_calls: AtomicUsize,
    pub role_pages: Vec<Page<RoleInfo>>,
    pub role_calls: AtomicUsize,
}

impl Default for FakePortal {
    fn default() -> Self {
        Self {
            credential_results: Mutex::new(VecDeque::new()),
            credential_calls: AtomicUsize::new(0),
            account_pages: Vec::new(),
            account_calls: AtomicUsize::new(0),
            role_pages: Vec::new(),
            role_calls: AtomicUsize::new(0),
        }
    }
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue credential exchange results; once exhausted, exchanges succeed
    /// with credentials valid for an hour.
    pub fn with_credential_results(self, results: Vec<Result<RoleCredentials>>) -> Self {
        *self.credential_results.lock().expect("lock poisoned") = results.into();
        self
    }

    pub fn credential_calls(&self) -> usize {
        self.credential_calls.load(Ordering::SeqCst)
    }
}

fn page_index(next_token: Option<&str>) -> usize {
    next_token
        .and_then(|token| token.strip_prefix("page-"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl PortalApi for FakePortal {
    async fn get_role_credentials(
        &self,
        access_token: &str,
        _account_id: &str,
        _role_name: &str,
    ) -> Result<RoleCredentials> {
        assert_eq!(access_token, "sso-access-token");
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        self.credential_results
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(role_credentials(Duration::hours(1))))
    }

    async fn list_accounts(
        &self,
        _access_token: &str,
        next_token: Option<&str>,
    ) -> Result<Page<AccountInfo>> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        self.account_pages
            .get(page_index(next_token))
            .cloned()
            .ok_or_else(|| BrokerError::Unexpected("no such page".to_string()))
    }

    async fn list_account_roles(
        &self,
        _access_token: &str,
        _account_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<RoleInfo>> {
        self.role_calls.fetch_add(1, Ordering::SeqCst);
        self.role_pages
            .get(page_index(next_token))
            .cloned()
            .ok_or_else(|| BrokerError::Unexpected("no such page".to_string()))
    }
}

/// Executor returning scripted outputs and recording the credentials used.
pub struct RecordingExecutor {
    outputs: Mutex<VecDeque<CommandOutput>>,
    pub seen: Mutex<Vec<Credentials>>,
}

impl RecordingExecutor {
    pub fn new(outputs: Vec<CommandOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().expect("lock poisoned").len()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(
        &self,
        credentials: &Credentials,
        _args: &[String],
        _region: Option<&str>,
    ) -> Result<CommandOutput> {
        self.seen
            .lock()
            .expect("lock poisoned")
            .push(credentials.clone());
        Ok(self
            .outputs
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_default())
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
