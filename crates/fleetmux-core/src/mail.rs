//! Optional external mail CLI for path reservations.
//!
//! When installed, the mail tool lets agents broadcast file reservations to
//! each other. The core shells out with structured arguments and parses the
//! JSON replies; when the tool is absent, reservation extraction is simply
//! disabled.

use std::{sync::OnceLock, time::Duration};

use serde::Deserialize;
use tokio::process::Command;

use crate::{Error, Result};

/// Result of a reserve/release/renew call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MailReservationResult {
    pub success: bool,
    #[serde(default)]
    pub reservation_ids: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Client for the optional mail CLI.
#[derive(Debug)]
pub struct MailClient {
    program: String,
    timeout: Duration,
    available: OnceLock<bool>,
}

impl MailClient {
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            available: OnceLock::new(),
        }
    }

    /// Whether the mail CLI is installed. Probed once, then cached.
    pub fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| which::which(&self.program).is_ok())
    }

    async fn run(&self, args: &[&str]) -> Result<Option<MailReservationResult>> {
        if !self.is_available() {
            return Ok(None);
        }

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program).args(args).output(),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "{} {} exceeded {:?}",
                self.program,
                args.first().unwrap_or(&""),
                self.timeout
            ))
        })?
        .map_err(|e| Error::Command(format!("failed to execute {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Command(format!(
                "{} {} failed: {}",
                self.program,
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }

        let result: MailReservationResult = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::ParseError(format!("mail CLI output: {e}")))?;
        Ok(Some(result))
    }

    /// Reserve paths for an agent. `Ok(None)` when the CLI is absent.
    pub async fn reserve_paths(
        &self,
        agent: &str,
        patterns: &[String],
        ttl_secs: u64,
    ) -> Result<Option<MailReservationResult>> {
        let ttl = ttl_secs.to_string();
        let mut args = vec!["reserve-paths", "--agent", agent, "--ttl", ttl.as_str(), "--json"];
        args.extend(patterns.iter().map(String::as_str));
        self.run(&args).await
    }

    /// Release reservations by id. `Ok(None)` when the CLI is absent.
    pub async fn release_reservations(
        &self,
        agent: &str,
        reservation_ids: &[String],
    ) -> Result<Option<MailReservationResult>> {
        let mut args = vec!["release-reservations", "--agent", agent, "--json"];
        args.extend(reservation_ids.iter().map(String::as_str));
        self.run(&args).await
    }

    /// Renew reservations by id. `Ok(None)` when the CLI is absent.
    pub async fn renew_reservations(
        &self,
        agent: &str,
        reservation_ids: &[String],
        ttl_secs: u64,
    ) -> Result<Option<MailReservationResult>> {
        let ttl = ttl_secs.to_string();
        let mut args = vec![
            "renew-reservations",
            "--agent",
            agent,
            "--ttl",
            ttl.as_str(),
            "--json",
        ];
        args.extend(reservation_ids.iter().map(String::as_str));
        self.run(&args).await
    }
}
