//! SSO device-authorization login and token lifecycle.

pub mod browser;
pub mod flow;
pub mod oidc;
pub mod session;
pub mod token;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use flow::{DeviceFlow, FlowState, PollSettings};
pub use oidc::{DeviceAuthorizationApi, OidcClient, TokenPoll};
pub use session::{
    invalidate_session, LoginMode, LoginOutcome, PendingLogin, SessionManager, SessionStatus,
};
pub use token::{DeviceAuthorizationContext, SsoToken, VerificationPrompt};
