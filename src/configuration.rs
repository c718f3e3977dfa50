//! Config for the tournament behaviors.
//!
//! This module provides the timeout budgets, retry discipline and scoring
//! weights that govern every network interaction in a tournament.
//!
//! Configuration can be created programmatically using [`Configuration::new()`]
//! or by reading environment variables using [`Configuration::from_env()`].
//! All values are treated as immutable for the process lifetime once a
//! coordinator has been built from them.
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration
//! values. All are optional; unparseable values fall back to the default with
//! a warning.
//!
//! - `TOURNEY_INVITE_TIMEOUT_MS` — per-attempt budget for match invitations (default: `5000`)
//! - `TOURNEY_CHOICE_TIMEOUT_MS` — per-attempt budget for choice requests, the "thinking time" (default: `30000`)
//! - `TOURNEY_NOTIFY_TIMEOUT_MS` — per-attempt budget for notifications and broadcasts (default: `5000`)
//! - `TOURNEY_REPORT_TIMEOUT_MS` — per-attempt budget for result reports (default: `5000`)
//! - `TOURNEY_MAX_RETRIES` — extra attempts after the first failed call (default: `3`)
//! - `TOURNEY_BACKOFF_BASE_MS` — exponential backoff base (default: `2000`)
//! - `TOURNEY_BACKOFF_CAP_MS` — upper bound on a single backoff delay (default: `16000`)
//! - `TOURNEY_LOG` — set to `"true"` to enable logging to a file (default: `false`)

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::rpc_client::RetryPolicy;
use crate::standings::ScoreWeights;

/// Timeouts, retry discipline and scoring weights for one tournament.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) invite_timeout: Duration,
    pub(crate) choice_timeout: Duration,
    pub(crate) notify_timeout: Duration,
    pub(crate) report_timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_cap: Duration,
    pub(crate) weights: ScoreWeights,
    pub(crate) snapshot_dir: Option<PathBuf>,
    pub(crate) log: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Invitations must be acknowledged within 5 seconds per attempt.
    /// - Choice requests get 30 seconds of thinking time per attempt.
    /// - Failed calls are retried 3 times with a 2 second exponential
    ///   backoff base, capped at 16 seconds.
    /// - Scoring is 3 points per win, 1 per draw, 0 per loss.
    /// - No snapshots are written and file logging is disabled.
    pub fn new() -> Self {
        Self {
            invite_timeout: Duration::from_secs(5),
            choice_timeout: Duration::from_secs(30),
            notify_timeout: Duration::from_secs(5),
            report_timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(16),
            weights: ScoreWeights::default(),
            snapshot_dir: None,
            log: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the module documentation for the recognized variables. Any other
    /// value (including unset) results in the default for that field.
    pub fn from_env() -> Self {
        fn parse_duration_ms(var: &str, default: Duration) -> Duration {
            match std::env::var(var) {
                Ok(val) => match val.parse::<u64>() {
                    Ok(ms) => Duration::from_millis(ms),
                    Err(_) => {
                        warn!("ignoring unparseable {var}={val:?}");
                        default
                    }
                },
                Err(_) => default,
            }
        }

        fn parse_u32(var: &str, default: u32) -> u32 {
            match std::env::var(var) {
                Ok(val) => match val.parse() {
                    Ok(n) => n,
                    Err(_) => {
                        warn!("ignoring unparseable {var}={val:?}");
                        default
                    }
                },
                Err(_) => default,
            }
        }

        let defaults = Self::new();
        Self {
            invite_timeout: parse_duration_ms("TOURNEY_INVITE_TIMEOUT_MS", defaults.invite_timeout),
            choice_timeout: parse_duration_ms("TOURNEY_CHOICE_TIMEOUT_MS", defaults.choice_timeout),
            notify_timeout: parse_duration_ms("TOURNEY_NOTIFY_TIMEOUT_MS", defaults.notify_timeout),
            report_timeout: parse_duration_ms("TOURNEY_REPORT_TIMEOUT_MS", defaults.report_timeout),
            max_retries: parse_u32("TOURNEY_MAX_RETRIES", defaults.max_retries),
            backoff_base: parse_duration_ms("TOURNEY_BACKOFF_BASE_MS", defaults.backoff_base),
            backoff_cap: parse_duration_ms("TOURNEY_BACKOFF_CAP_MS", defaults.backoff_cap),
            weights: defaults.weights,
            snapshot_dir: std::env::var("TOURNEY_SNAPSHOT_DIR").ok().map(PathBuf::from),
            log: std::env::var("TOURNEY_LOG")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Set the per-attempt budget for match invitations.
    pub fn with_invite_timeout(mut self, value: Duration) -> Self {
        self.invite_timeout = value;
        self
    }

    /// Set the per-attempt budget for choice requests.
    pub fn with_choice_timeout(mut self, value: Duration) -> Self {
        self.choice_timeout = value;
        self
    }

    /// Set the per-attempt budget for notifications and broadcasts.
    pub fn with_notify_timeout(mut self, value: Duration) -> Self {
        self.notify_timeout = value;
        self
    }

    /// Set the per-attempt budget for result reports.
    pub fn with_report_timeout(mut self, value: Duration) -> Self {
        self.report_timeout = value;
        self
    }

    /// Set how many times a failed call is retried.
    pub fn with_max_retries(mut self, value: u32) -> Self {
        self.max_retries = value;
        self
    }

    /// Set the exponential backoff base delay.
    pub fn with_backoff_base(mut self, value: Duration) -> Self {
        self.backoff_base = value;
        self
    }

    /// Set the upper bound on a single backoff delay.
    pub fn with_backoff_cap(mut self, value: Duration) -> Self {
        self.backoff_cap = value;
        self
    }

    /// Set the points awarded per win, draw and loss.
    pub fn with_score_weights(mut self, value: ScoreWeights) -> Self {
        self.weights = value;
        self
    }

    /// Persist standings snapshots and match transcripts under this directory.
    pub fn with_snapshot_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(value.into());
        self
    }

    /// Enable or disable logging to a file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// The retry policy every RPC client derived from this configuration uses.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            backoff_cap: self.backoff_cap,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_chain() {
        let config = Configuration::new()
            .with_invite_timeout(Duration::from_millis(50))
            .with_max_retries(1)
            .with_backoff_base(Duration::from_millis(10));
        assert_eq!(config.invite_timeout, Duration::from_millis(50));
        assert_eq!(config.retry_policy().max_retries, 1);
    }
}
