//! CLI handlers for login, status, and logout.

use crate::auth::{SessionManager, SessionStatus, VerificationPrompt};
use crate::config::BrokerConfig;

fn print_prompt(prompt: &VerificationPrompt) {
    println!("🔗 Visit: {}", prompt.verification_uri);
    println!("📋 Enter code: {}", prompt.user_code);
    if let Some(complete) = &prompt.verification_uri_complete {
        println!("   Or open: {complete}");
    }
    println!(
        "⏳ Code expires at {}",
        prompt.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn session(config: &BrokerConfig) -> crate::error::Result<SessionManager> {
    Ok(SessionManager::from_config(config)?.with_prompt_handler(print_prompt))
}

/// Handle `ssobroker login`.
pub async fn handle_login(
    config: BrokerConfig,
    args: &super::LoginArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = if args.no_browser {
        config.with_open_browser(false)
    } else {
        config
    };
    let session = session(&config)?;

    if args.force {
        session.logout()?;
    }

    if args.resume {
        let token = session.resume_login().await?;
        println!(
            "✅ Login successful (expires {})",
            token.expires_at.format("%Y-%m-%d %H:%M")
        );
        return Ok(());
    }

    if args.no_wait {
        if let Some(token) = session.cached_token()? {
            println!(
                "✅ Already logged in (expires {})",
                token.expires_at.format("%Y-%m-%d %H:%M")
            );
            return Ok(());
        }
        session.begin_login().await?;
        println!("   Run `ssobroker login --resume` once you have approved the request.");
        return Ok(());
    }

    let token = session.ensure_authenticated().await?;
    println!(
        "✅ Logged in (expires {})",
        token.expires_at.format("%Y-%m-%d %H:%M")
    );
    Ok(())
}

/// Handle `ssobroker status`.
pub async fn handle_status(config: BrokerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = session(&config)?;

    println!("🔐 {}\n", config.start_url);
    match session.check_status()? {
        SessionStatus::Authenticated { expires_at } => println!(
            "  ✅ Logged in (expires {})",
            expires_at.format("%Y-%m-%d %H:%M")
        ),
        SessionStatus::PendingVerification { prompt } => {
            println!("  ⏳ Waiting for verification");
            print_prompt(&prompt);
        }
        SessionStatus::NotAuthenticated => println!("  ❌ Not logged in"),
    }
    Ok(())
}

/// Handle `ssobroker logout`.
pub async fn handle_logout(config: BrokerConfig) -> Result<(), Box<dyn std::error::Error>> {
    session(&config)?.logout()?;
    println!("✅ Logged out from {}", config.start_url);
    Ok(())
}
