//! ssobroker — SSO credential broker
//!
//! Runs an OAuth2 device-authorization login against an SSO identity
//! provider, exchanges the resulting token for short-lived role credentials
//! and keeps both in a file cache so repeated invocations don't force a new
//! login.
//!
//! # Quick Start
//!
//! ```no_run
//! use ssobroker::prelude::*;
//!
//! # async fn example() -> ssobroker::error::Result<()> {
//! let config = BrokerConfig::load()?;
//! let session = SessionManager::from_config(&config)?;
//! session.ensure_authenticated().await?;
//!
//! let broker = CredentialBroker::from_config(&config, session.store().clone())?;
//! let credentials = broker.get_credentials("123456789012", "ReadOnly", None).await?;
//! println!("{}", credentials.access_key_id);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod prelude;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
