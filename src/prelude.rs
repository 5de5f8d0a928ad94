//! Convenience re-exports for common use.

pub use crate::auth::{LoginMode, LoginOutcome, SessionManager, SessionStatus, SsoToken};
pub use crate::cache::{CacheStore, FileCacheStore, Namespace};
pub use crate::config::BrokerConfig;
pub use crate::credentials::{
    CommandExecutor, CommandOutput, CredentialBroker, CredentialRequest, Credentials,
};
pub use crate::error::{BrokerError, ErrorContext, FlowStage, Result};
pub use crate::util::retry::RetryPolicy;
