//! Resilient outbound calls.
//!
//! [`RpcClient::call`] performs one logical exchange under a hard per-attempt
//! timeout, retrying retryable failures with capped exponential backoff.
//! Non-retryable failures (validation, authorization, any peer error tagged
//! non-retryable) fail on the first attempt. Every attempt emits a tracing
//! event. Calls never take locks, so N concurrent calls proceed
//! independently of each other.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::protocol::{check_envelope, Envelope, ErrorCode, ValidationError};
use crate::transport::Transport;

/// How often and how fast a failed call is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// First backoff delay; doubles every attempt.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff delay.
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(16),
        }
    }
}

/// Why a call failed.
#[derive(Debug, Error)]
pub enum CallError {
    /// The peer did not answer within the attempt budget.
    #[error("call to {target} timed out")]
    Timeout {
        /// Unreachable callback address.
        target: String,
    },
    /// The peer endpoint could not be reached at all.
    #[error("connection to {target} refused: {detail}")]
    ConnectionRefused {
        /// Unreachable callback address.
        target: String,
        /// Transport-level detail.
        detail: String,
    },
    /// The peer was reachable but unable to serve the call.
    #[error("{target} unavailable: {detail}")]
    Unavailable {
        /// The failing callback address.
        target: String,
        /// Transport-level detail.
        detail: String,
    },
    /// The peer answered with a wire error object.
    #[error("peer error {code:?}: {message}")]
    Peer {
        /// Domain error code from the response.
        code: ErrorCode,
        /// Detail from the response.
        message: String,
    },
    /// The peer's response envelope failed validation.
    #[error("invalid response envelope: {0}")]
    InvalidResponse(#[from] ValidationError),
    /// The caller's own envelope failed validation; nothing was sent.
    #[error("invalid request envelope: {0}")]
    InvalidRequest(ValidationError),
}

impl CallError {
    /// Whether the retry combinator may try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Timeout { .. }
            | CallError::ConnectionRefused { .. }
            | CallError::Unavailable { .. } => true,
            CallError::Peer { code, .. } => code.is_retryable(),
            CallError::InvalidResponse(_) | CallError::InvalidRequest(_) => false,
        }
    }

    /// The wire error code describing this failure, used when a technical
    /// loss must name its cause.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CallError::Timeout { .. } => ErrorCode::Timeout,
            CallError::ConnectionRefused { .. } => ErrorCode::ConnectionRefused,
            CallError::Unavailable { .. } => ErrorCode::Unavailable,
            CallError::Peer { code, .. } => *code,
            CallError::InvalidResponse(e) | CallError::InvalidRequest(e) => e.code(),
        }
    }
}

/// Outbound call combinator: deadline per attempt, classified retries,
/// exponential backoff.
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RpcClient {
    /// Creates a client over `transport` with the given retry policy.
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> RpcClient {
        RpcClient { transport, policy }
    }

    /// Performs one logical exchange with `target`.
    ///
    /// `budget` bounds each individual attempt, not the whole exchange; a
    /// call that exhausts its retries has cost at most
    /// `(max_retries + 1) * budget` plus backoff.
    pub async fn call(
        &self,
        target: &str,
        envelope: &Envelope,
        budget: Duration,
    ) -> Result<Envelope, CallError> {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let outcome = self.attempt(target, envelope, budget).await;
            match outcome {
                Ok(reply) => {
                    trace!(
                        peer = %target,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        message_type = envelope.message.type_name(),
                        "call succeeded"
                    );
                    return Ok(reply);
                }
                Err(error) if error.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        peer = %target,
                        attempt,
                        error = %error,
                        backoff_ms = delay.as_millis() as u64,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(
                        peer = %target,
                        attempt,
                        error = %error,
                        retryable = error.is_retryable(),
                        "call failed"
                    );
                    return Err(error);
                }
            }
        }
    }

    /// Single deadline-bounded attempt with no retries, for best-effort
    /// notifications whose failure must not delay the caller.
    pub async fn call_once(
        &self,
        target: &str,
        envelope: &Envelope,
        budget: Duration,
    ) -> Result<Envelope, CallError> {
        let result = self.attempt(target, envelope, budget).await;
        if let Err(error) = &result {
            trace!(peer = %target, error = %error, "one-shot call failed");
        }
        result
    }

    async fn attempt(
        &self,
        target: &str,
        envelope: &Envelope,
        budget: Duration,
    ) -> Result<Envelope, CallError> {
        // Outbound envelopes are held to the same rules as inbound ones.
        check_envelope(envelope).map_err(CallError::InvalidRequest)?;
        let delivery = self.transport.deliver(target, envelope);
        let response = match tokio::time::timeout(budget, delivery).await {
            Err(_elapsed) => {
                return Err(CallError::Timeout {
                    target: target.to_owned(),
                })
            }
            Ok(Err(error)) => return Err(error),
            Ok(Ok(response)) => response,
        };

        if let Some(error) = response.error {
            return Err(CallError::Peer {
                code: error.error_code,
                message: error.message,
            });
        }
        let reply = response.result.ok_or(CallError::Peer {
            code: ErrorCode::MalformedEnvelope,
            message: "response carried neither result nor error".to_owned(),
        })?;
        check_envelope(&reply)?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{format_sender, Role};
    use crate::protocol::{Message, RpcResponse};
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedPeer {
        /// One entry per attempt; repeats the last entry when exhausted.
        responses: Vec<Result<RpcResponse, ErrorCode>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedPeer {
        fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedPeer {
        async fn deliver(
            &self,
            target: &str,
            envelope: &Envelope,
        ) -> Result<RpcResponse, CallError> {
            let n = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len() - 1
            };
            let scripted = self
                .responses
                .get(n)
                .or_else(|| self.responses.last())
                .expect("script is never empty");
            match scripted {
                Ok(response) => Ok(response.clone()),
                Err(ErrorCode::ConnectionRefused) => Err(CallError::ConnectionRefused {
                    target: target.to_owned(),
                    detail: "scripted".to_owned(),
                }),
                Err(code) => Ok(RpcResponse::fail(*code, format!("scripted for {}", envelope.sender))),
            }
        }
    }

    fn ack_response() -> RpcResponse {
        let request = Envelope::request(
            format_sender(Role::Referee, "R01"),
            Some("tok".into()),
            Message::ChoiceRequest {
                match_id: "R1M1".into(),
            },
        );
        RpcResponse::ok(Envelope::reply_to(
            &request,
            format_sender(Role::Player, "P01"),
            Message::Ack,
        ))
    }

    fn request() -> Envelope {
        Envelope::request(
            format_sender(Role::Referee, "R01"),
            Some("tok".into()),
            Message::ChoiceRequest {
                match_id: "R1M1".into(),
            },
        )
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(20),
            backoff_cap: Duration::from_millis(200),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_after_one_attempt() {
        let peer = Arc::new(ScriptedPeer {
            responses: vec![Err(ErrorCode::MalformedEnvelope)],
            attempts: Mutex::new(vec![]),
        });
        let client = RpcClient::new(peer.clone(), fast_policy());
        let error = client
            .call("player-1", &request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            CallError::Peer {
                code: ErrorCode::MalformedEnvelope,
                ..
            }
        ));
        assert_eq!(peer.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_exhausts_all_attempts_with_growing_delays() {
        let peer = Arc::new(ScriptedPeer {
            responses: vec![Err(ErrorCode::ConnectionRefused)],
            attempts: Mutex::new(vec![]),
        });
        let policy = fast_policy();
        let client = RpcClient::new(peer.clone(), policy);
        let error = client
            .call("player-1", &request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(error, CallError::ConnectionRefused { .. }));
        assert_eq!(peer.attempt_count(), policy.max_retries as usize + 1);

        let attempts = peer.attempts.lock().unwrap().clone();
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] > pair[0], "inter-attempt delay must strictly grow: {gaps:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_retry_succeeds() {
        let peer = Arc::new(ScriptedPeer {
            responses: vec![Err(ErrorCode::Unavailable), Ok(ack_response())],
            attempts: Mutex::new(vec![]),
        });
        let client = RpcClient::new(peer.clone(), fast_policy());
        let reply = client
            .call("player-1", &request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.message, Message::Ack);
        assert_eq!(peer.attempt_count(), 2);
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(16),
        };
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
        assert_eq!(policy.delay(3), Duration::from_secs(16));
        assert_eq!(policy.delay(4), Duration::from_secs(16));
    }
}
