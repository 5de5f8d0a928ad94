//! Error types for ssobroker.

pub mod unified;

pub use unified::{ErrorCategory, ErrorContext, FlowStage, RecoverySuggestion};

use std::time::Duration;

use thiserror::Error;

/// Primary error type for all broker operations.
///
/// Variants that can be raised at a specific point of the login or
/// credential flow carry an [`ErrorContext`] so a caller-side formatter can
/// tell which account, role or flow stage failed. The remaining variants get
/// one through [`BrokerError::WithContext`], which classifies exactly like
/// the error it wraps.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Not authenticated{context}")]
    AuthMissing { context: ErrorContext },

    #[error("Authorization pending")]
    AuthPending,

    #[error("Authorization denied{context}")]
    AuthDenied { context: ErrorContext },

    #[error("Authorization expired: {message}{context}")]
    AuthExpired {
        message: String,
        context: ErrorContext,
    },

    #[error("Authorization timed out: {message}{context}")]
    AuthTimeout {
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {message}{context}")]
    PermissionDenied {
        message: String,
        context: ErrorContext,
    },

    #[error("Resource not found: {message}{context}")]
    ResourceNotFound {
        message: String,
        context: ErrorContext,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error ({code}): {description}{context}")]
    Provider {
        code: String,
        description: String,
        context: ErrorContext,
    },

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{source}{context}")]
    WithContext {
        source: Box<BrokerError>,
        context: ErrorContext,
    },
}

impl BrokerError {
    pub fn auth_missing(stage: FlowStage) -> Self {
        Self::AuthMissing {
            context: ErrorContext::at(stage),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// The error with any [`BrokerError::WithContext`] layer removed.
    pub fn root(&self) -> &BrokerError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            Self::AuthMissing { .. }
            | Self::AuthPending
            | Self::AuthDenied { .. }
            | Self::AuthExpired { .. }
            | Self::AuthTimeout { .. } => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::PermissionDenied { .. } => ErrorCategory::Permission,
            Self::ResourceNotFound { .. } => ErrorCategory::NotFound,
            Self::Network(_) => ErrorCategory::Network,
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Io(_) | Self::Serialization(_) => ErrorCategory::Storage,
            Self::Unexpected(_) | Self::WithContext { .. } => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server
        )
    }

    /// Whether this error means the cached SSO session can no longer be used.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.root(),
            Self::AuthMissing { .. } | Self::AuthExpired { .. } | Self::AuthDenied { .. }
        )
    }

    /// Retry-after hint carried by rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root() {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Structured context attached to this error, if any.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::AuthMissing { context }
            | Self::AuthDenied { context }
            | Self::AuthExpired { context, .. }
            | Self::AuthTimeout { context, .. }
            | Self::PermissionDenied { context, .. }
            | Self::ResourceNotFound { context, .. }
            | Self::Provider { context, .. }
            | Self::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Fill in missing context fields; fields already set are kept.
    ///
    /// Variants without a context field are wrapped in
    /// [`BrokerError::WithContext`].
    pub fn with_context(mut self, extra: ErrorContext) -> Self {
        if extra.is_empty() {
            return self;
        }
        match &mut self {
            Self::AuthMissing { context }
            | Self::AuthDenied { context }
            | Self::AuthExpired { context, .. }
            | Self::AuthTimeout { context, .. }
            | Self::PermissionDenied { context, .. }
            | Self::ResourceNotFound { context, .. }
            | Self::Provider { context, .. }
            | Self::WithContext { context, .. } => {
                context.merge(extra);
                self
            }
            _ => Self::WithContext {
                source: Box::new(self),
                context: extra,
            },
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.root() {
            Self::AuthTimeout { .. } | Self::AuthExpired { .. } | Self::AuthDenied { .. } => {
                RecoverySuggestion::RestartLogin
            }
            Self::AuthMissing { .. } => RecoverySuggestion::Login,
            Self::AuthPending => RecoverySuggestion::CompleteVerification,
            _ => match self.category() {
                ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server => {
                    RecoverySuggestion::RetryWithBackoff
                }
                ErrorCategory::Permission | ErrorCategory::NotFound => {
                    RecoverySuggestion::CheckAssignment
                }
                ErrorCategory::Validation | ErrorCategory::Configuration => {
                    RecoverySuggestion::CheckConfiguration
                }
                ErrorCategory::Storage => RecoverySuggestion::CheckCacheDirectory,
                _ => RecoverySuggestion::ContactSupport,
            },
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<toml::de::Error> for BrokerError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BrokerError>;
