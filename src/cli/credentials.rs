//! CLI handlers for credentials, listings, and exec.

use std::sync::Arc;

use crate::cache::FileCacheStore;
use crate::config::BrokerConfig;
use crate::credentials::{CredentialBroker, CredentialRequest, Credentials, ProcessExecutor};

use super::{CredentialsArgs, ExecArgs, ListArgs, OutputFormat, RolesArgs};

fn broker(config: &BrokerConfig) -> crate::error::Result<CredentialBroker> {
    let store = Arc::new(FileCacheStore::new(config.cache_dir.clone()));
    CredentialBroker::from_config(config, store)
}

fn render(credentials: &Credentials, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Env => Ok(credentials
            .env_vars()
            .into_iter()
            .map(|(name, value)| format!("export {name}={value}"))
            .collect::<Vec<_>>()
            .join("\n")),
        OutputFormat::Json => serde_json::to_string_pretty(credentials),
    }
}

/// Handle `ssobroker credentials`.
pub async fn handle_credentials(
    config: BrokerConfig,
    args: &CredentialsArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = CredentialRequest::builder()
        .account_id(args.account_id.as_str())
        .role_name(args.role_name.as_str())
        .maybe_region(args.region.clone())
        .force_refresh(args.force_refresh)
        .build();
    let credentials = broker(&config)?.get_credentials_with(&request).await?;
    println!("{}", render(&credentials, args.format)?);
    Ok(())
}

/// Handle `ssobroker accounts`.
pub async fn handle_accounts(
    config: BrokerConfig,
    args: &ListArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    for account in broker(&config)?.list_accounts(args.refresh).await? {
        let name = account.account_name.as_deref().unwrap_or("-");
        match &account.email_address {
            Some(email) => println!("{}  {name}  <{email}>", account.account_id),
            None => println!("{}  {name}", account.account_id),
        }
    }
    Ok(())
}

/// Handle `ssobroker roles`.
pub async fn handle_roles(
    config: BrokerConfig,
    args: &RolesArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    for role in broker(&config)?
        .list_account_roles(&args.account_id, args.refresh)
        .await?
    {
        println!("{}", role.role_name);
    }
    Ok(())
}

/// Handle `ssobroker exec`; returns the command's exit code.
pub async fn handle_exec(
    config: BrokerConfig,
    args: &ExecArgs,
) -> Result<i32, Box<dyn std::error::Error>> {
    let request = CredentialRequest::builder()
        .account_id(args.account_id.as_str())
        .role_name(args.role_name.as_str())
        .maybe_region(args.region.clone())
        .build();
    let output = broker(&config)?
        .run_with_credentials(&ProcessExecutor::default(), &request, &args.command)
        .await?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Ok(output.exit_code)
}
