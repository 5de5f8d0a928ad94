//! CLI entry point for ssobroker.

pub mod auth;
pub mod credentials;

use clap::{Parser, Subcommand, ValueEnum};

/// SSO credential broker CLI
#[derive(Parser, Debug)]
#[command(name = "ssobroker", version, about = "SSO login and role credential broker")]
pub struct Cli {
    /// Config file (defaults to ~/.ssobroker/config.toml)
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in through the device-authorization flow
    Login(LoginArgs),
    /// Show the cached session state
    Status,
    /// Drop the session and every cached credential
    Logout,
    /// Print role credentials
    Credentials(CredentialsArgs),
    /// List assigned accounts
    Accounts(ListArgs),
    /// List roles in an account
    Roles(RolesArgs),
    /// Run a command with role credentials in its environment
    Exec(ExecArgs),
}

/// Arguments for `ssobroker login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Print the verification instructions and exit without waiting
    #[arg(long, conflicts_with = "resume")]
    pub no_wait: bool,

    /// Wait for a login started earlier with --no-wait
    #[arg(long)]
    pub resume: bool,

    /// Don't try to open a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Sign in again even if the cached session is valid
    #[arg(long)]
    pub force: bool,
}

/// Output format for credentials.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `export NAME=value` lines
    #[default]
    Env,
    Json,
}

/// Arguments for `ssobroker credentials`.
#[derive(Parser, Debug)]
pub struct CredentialsArgs {
    pub account_id: String,
    pub role_name: String,

    /// Region attached to the credentials
    #[arg(long)]
    pub region: Option<String>,

    /// Skip the credential cache
    #[arg(long)]
    pub force_refresh: bool,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Arguments for `ssobroker accounts`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Ignore the cached listing
    #[arg(long)]
    pub refresh: bool,
}

/// Arguments for `ssobroker roles`.
#[derive(Parser, Debug)]
pub struct RolesArgs {
    pub account_id: String,

    /// Ignore the cached listing
    #[arg(long)]
    pub refresh: bool,
}

/// Arguments for `ssobroker exec`.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    pub account_id: String,
    pub role_name: String,

    #[arg(long)]
    pub region: Option<String>,

    /// Command and arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}
