//! Role credentials: portal exchange, caching and downstream execution.

pub mod broker;
pub mod exec;
pub mod portal;
pub mod types;

pub use broker::CredentialBroker;
pub use exec::{CommandExecutor, CommandOutput, ProcessExecutor};
pub use portal::{Page, PortalApi, PortalClient, RoleCredentials};
pub use types::{
    AccountInfo, CachedCredential, CredentialRequest, Credentials, Listing, RoleInfo,
    CREDENTIAL_REFRESH_MARGIN_SECS,
};
