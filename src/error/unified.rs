//! Error classification, context and recovery.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Validation,
    Permission,
    NotFound,
    Network,
    Server,
    Provider,
    Configuration,
    Storage,
    Unknown,
}

/// Where in the login or credential flow an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlowStage {
    Registration,
    DeviceAuthorization,
    Polling,
    CredentialExchange,
    AccountListing,
    RoleListing,
    CommandExecution,
}

/// Structured context attached to terminal errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub stage: Option<FlowStage>,
    pub account_id: Option<String>,
    pub role_name: Option<String>,
}

impl ErrorContext {
    pub fn at(stage: FlowStage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn credentials(account_id: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            stage: None,
            account_id: Some(account_id.into()),
            role_name: Some(role_name.into()),
        }
    }

    pub fn with_stage(mut self, stage: FlowStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stage.is_none() && self.account_id.is_none() && self.role_name.is_none()
    }

    pub(crate) fn merge(&mut self, other: ErrorContext) {
        if self.stage.is_none() {
            self.stage = other.stage;
        }
        if self.account_id.is_none() {
            self.account_id = other.account_id;
        }
        if self.role_name.is_none() {
            self.role_name = other.role_name;
        }
    }
}

/// Renders as ` [stage=.., account=.., role=..]`, or nothing when empty.
impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::with_capacity(3);
        if let Some(stage) = self.stage {
            parts.push(format!("stage={stage}"));
        }
        if let Some(account_id) = &self.account_id {
            parts.push(format!("account={account_id}"));
        }
        if let Some(role_name) = &self.role_name {
            parts.push(format!("role={role_name}"));
        }
        write!(f, " [{}]", parts.join(", "))
    }
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    Login,
    RestartLogin,
    CompleteVerification,
    RetryWithBackoff,
    CheckAssignment,
    CheckConfiguration,
    CheckCacheDirectory,
    ContactSupport,
}
