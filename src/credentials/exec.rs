//! Running downstream commands with resolved credentials.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::types::Credentials;
use crate::error::{BrokerError, Result};

/// Output of a downstream command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether the command failed because the credentials were rejected.
    pub fn auth_failure(&self) -> bool {
        !self.success()
            && auth_failure_pattern().is_some_and(|pattern| pattern.is_match(&self.stderr))
    }
}

fn auth_failure_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(AccessDenied|InvalidClientTokenId|ExpiredToken|UnrecognizedClient|SignatureDoesNotMatch|InvalidAccessKeyId|AuthFailure)|security token included in the request is (invalid|expired)",
            )
            .ok()
        })
        .as_ref()
}

/// Runs a command with credentials injected.
///
/// The broker never interprets the command; it only looks at the returned
/// exit code and stderr.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        credentials: &Credentials,
        args: &[String],
        region: Option<&str>,
    ) -> Result<CommandOutput>;
}

/// [`CommandExecutor`] spawning a local process with the credentials in its
/// environment.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
        }
    }
}

impl ProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        credentials: &Credentials,
        args: &[String],
        region: Option<&str>,
    ) -> Result<CommandOutput> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| BrokerError::Validation("no command given".to_string()))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(rest)
            .envs(credentials.env_vars())
            .kill_on_drop(true);
        if let Some(region) = region {
            command.env("AWS_REGION", region).env("AWS_DEFAULT_REGION", region);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                BrokerError::Unexpected(format!("{program} timed out after {:?}", self.timeout))
            })??;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal.
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: 255,
        }
    }

    #[test]
    fn detects_rejected_credentials() {
        for stderr in [
            "An error occurred (ExpiredToken) when calling the ListBuckets operation",
            "An error occurred (InvalidClientTokenId) when calling GetCallerIdentity",
            "An error occurred (AccessDenied) when calling the GetObject operation",
            "An error occurred (UnrecognizedClientException) when calling Scan",
            "The security token included in the request is expired",
        ] {
            assert!(failed(stderr).auth_failure(), "{stderr}");
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "session".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            region: "us-east-1".to_string(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let executor = ProcessExecutor::new(Duration::from_millis(50));
        let args = ["sleep".to_string(), "5".to_string()];

        let started = std::time::Instant::now();
        let err = executor
            .execute(&credentials(), &args, None)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("sleep timed out after 50ms"), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn credentials_reach_the_child_environment() {
        let executor = ProcessExecutor::default();
        let args = [
            "sh".to_string(),
            "-c".to_string(),
            "printf %s \"$AWS_ACCESS_KEY_ID:$AWS_DEFAULT_REGION\"".to_string(),
        ];

        let output = executor
            .execute(&credentials(), &args, Some("eu-west-1"))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "ASIAEXAMPLE:eu-west-1");
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = ProcessExecutor::default()
            .execute(&credentials(), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));
    }

    #[test]
    fn ignores_other_failures_and_successes() {
        assert!(!failed("NoSuchBucket: the bucket does not exist").auth_failure());
        let ok = CommandOutput {
            stderr: "ExpiredToken mentioned in a warning".to_string(),
            ..CommandOutput::default()
        };
        assert!(!ok.auth_failure());
    }
}
