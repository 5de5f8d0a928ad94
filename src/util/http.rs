//! Shared HTTP client construction and provider error normalization.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;

use crate::error::{BrokerError, ErrorContext, Result};

const CODE_FIELDS: &[&str] = &["error", "Error", "code", "Code", "__type"];
const DESCRIPTION_FIELDS: &[&str] = &[
    "error_description",
    "errorDescription",
    "message",
    "Message",
];

/// Build a reqwest client with the per-request timeout applied.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| BrokerError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Error payload normalized from the shapes identity providers return.
///
/// Providers disagree on field names and casing (`error` vs `__type`,
/// `error_description` vs `message`) and on code spelling
/// (`authorization_pending` vs `AuthorizationPendingException`). Every code
/// is reduced to OAuth2 snake case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub code: String,
    pub description: Option<String>,
}

impl ProviderError {
    /// Parse a provider error body; `error_type_header` is used when the
    /// body has no code of its own.
    pub fn parse(body: &str, error_type_header: Option<&str>) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let object = value.as_object()?;
        let code = CODE_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str))
            .or(error_type_header)
            .map(normalize_code)
            .filter(|code| !code.is_empty())?;
        let description = DESCRIPTION_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str))
            .map(str::to_string);
        Some(Self { code, description })
    }

    pub fn description_or_code(&self) -> String {
        self.description.clone().unwrap_or_else(|| self.code.clone())
    }
}

/// Reduce a provider error code to OAuth2 snake case.
///
/// `com.amazon#SlowDownException:extra` -> `slow_down`.
pub fn normalize_code(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.rsplit('#').next().unwrap_or(trimmed);
    let trimmed = trimmed.split(':').next().unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("Exception").unwrap_or(trimmed);

    let mut out = String::with_capacity(trimmed.len() + 4);
    let mut previous_lower = false;
    for ch in trimmed.chars() {
        if ch.is_ascii_uppercase() {
            if previous_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            previous_lower = false;
        } else if ch == '-' || ch == ' ' {
            out.push('_');
            previous_lower = false;
        } else {
            out.push(ch);
            previous_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Parse a `Retry-After` header expressed in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map an unsuccessful HTTP response to the broker taxonomy.
pub fn status_to_error(
    status: u16,
    body: &str,
    headers: &HeaderMap,
    context: ErrorContext,
) -> BrokerError {
    let error_type = headers
        .get("x-amzn-errortype")
        .and_then(|value| value.to_str().ok());
    let provider = ProviderError::parse(body, error_type);
    let message = provider
        .as_ref()
        .map(ProviderError::description_or_code)
        .unwrap_or_else(|| truncate(body));

    if let Some(provider) = &provider {
        match provider.code.as_str() {
            "slow_down" | "too_many_requests" | "throttling" => {
                return BrokerError::RateLimited {
                    message,
                    retry_after: retry_after(headers),
                }
            }
            "access_denied" => return BrokerError::AuthDenied { context },
            "expired_token" | "unauthorized" => {
                return BrokerError::AuthExpired { message, context }
            }
            "authorization_pending" => return BrokerError::AuthPending,
            "invalid_request" | "invalid_scope" | "invalid_client_metadata"
            | "unsupported_grant_type" => return BrokerError::Validation(message),
            "forbidden" => return BrokerError::PermissionDenied { message, context },
            "resource_not_found" => return BrokerError::ResourceNotFound { message, context },
            _ => {}
        }
    }

    match status {
        400 => BrokerError::Validation(message),
        401 => BrokerError::AuthExpired { message, context },
        403 => BrokerError::PermissionDenied { message, context },
        404 => BrokerError::ResourceNotFound { message, context },
        429 => BrokerError::RateLimited {
            message,
            retry_after: retry_after(headers),
        },
        500..=599 => BrokerError::Server { status, message },
        _ => match provider {
            Some(provider) => BrokerError::Provider {
                description: provider.description_or_code(),
                code: provider.code,
                context,
            },
            None => BrokerError::Unexpected(format!("status {status}: {message}")),
        },
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 512;
    let body = body.trim();
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
