//! The coordinator's registration registry and inbound service task.
//!
//! All registry state lives in memory and is owned by a single service task;
//! other tasks reach it only through a [`RegistryHandle`]. Registration never
//! touches disk on the hot path. The same task authenticates and dedups
//! referee result reports before handing them to the aggregator, so the
//! coordinator's inbound face has exactly one owner and no shared mutable
//! maps.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{format_sender, parse_sender, RegistrationRecord, Role};
use crate::protocol::{check_envelope, Envelope, ErrorCode, Message, RpcResponse, GAME_TYPE};
use crate::standings::AggregatorHandle;
use crate::transport::Dispatch;

pub(crate) const COORDINATOR_IDENTITY: &str = "C01";

const TOKEN_LEN: usize = 32;

pub(crate) fn issue_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// In-memory registration table. Owned exclusively by the service task.
#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<String, RegistrationRecord>,
    by_endpoint: HashMap<String, String>,
    counters: HashMap<Role, u32>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers a new agent, issuing a collision-free identity and a
    /// high-entropy session token.
    ///
    /// A second registration declaring an endpoint that was seen before is a
    /// duplicate, detected via the endpoint metadata key.
    pub fn register(
        &mut self,
        role: Role,
        endpoint: &str,
        game_types: &[String],
    ) -> Result<RegistrationRecord, ErrorCode> {
        if role == Role::Coordinator {
            return Err(ErrorCode::InvalidParams);
        }
        if !game_types.iter().any(|g| g == GAME_TYPE) {
            return Err(ErrorCode::UnsupportedGameType);
        }
        if self.by_endpoint.contains_key(endpoint) {
            return Err(ErrorCode::DuplicateRegistration);
        }

        let counter = self.counters.entry(role).or_insert(0);
        *counter += 1;
        let identity = format!("{}{:02}", role.identity_prefix(), counter);
        let record = RegistrationRecord {
            identity: identity.clone(),
            role,
            game_types: game_types.to_vec(),
            endpoint: endpoint.to_owned(),
            token: issue_token(),
            active: true,
        };
        self.by_endpoint.insert(endpoint.to_owned(), identity.clone());
        self.records.insert(identity, record.clone());
        Ok(record)
    }

    /// Looks up a record by identity.
    pub fn record(&self, identity: &str) -> Option<&RegistrationRecord> {
        self.records.get(identity)
    }

    /// Token check for a requires-auth call from `identity`.
    pub fn check_token(&self, identity: &str, token: &str) -> bool {
        self.records
            .get(identity)
            .map(|r| r.active && r.token == token)
            .unwrap_or(false)
    }

    /// Active registrations for one role, in identity order.
    pub fn active(&self, role: Role) -> Vec<RegistrationRecord> {
        let mut records: Vec<_> = self
            .records
            .values()
            .filter(|r| r.role == role && r.active)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }

    /// Ends the session: every issued token stops validating.
    pub fn deactivate_all(&mut self) {
        for record in self.records.values_mut() {
            record.active = false;
        }
    }
}

enum RegistryRequest {
    Rpc {
        envelope: Envelope,
        reply: oneshot::Sender<RpcResponse>,
    },
    Active {
        role: Role,
        reply: oneshot::Sender<Vec<RegistrationRecord>>,
    },
    DeactivateAll {
        reply: oneshot::Sender<()>,
    },
}

/// Message-passing handle to the registry service task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryRequest>,
}

impl RegistryHandle {
    /// Routes one inbound envelope through the service task.
    pub async fn rpc(&self, envelope: Envelope) -> RpcResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .tx
            .send(RegistryRequest::Rpc {
                envelope,
                reply: reply_tx,
            })
            .await;
        if sent.is_err() {
            return RpcResponse::fail(ErrorCode::Unavailable, "coordinator is shutting down");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| RpcResponse::fail(ErrorCode::Unavailable, "coordinator is shutting down"))
    }

    /// Active registrations for a role.
    pub async fn active(&self, role: Role) -> anyhow::Result<Vec<RegistrationRecord>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RegistryRequest::Active { role, reply: reply_tx })
            .await
            .ok()
            .context("registry service is gone")?;
        reply_rx.await.context("registry service dropped the request")
    }

    /// Invalidates every issued token.
    pub async fn deactivate_all(&self) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RegistryRequest::DeactivateAll { reply: reply_tx })
            .await
            .ok()
            .context("registry service is gone")?;
        reply_rx.await.context("registry service dropped the request")
    }
}

/// The coordinator's inbound [`Dispatch`] face, forwarding into the service.
pub struct CoordinatorDispatch {
    handle: RegistryHandle,
}

#[async_trait]
impl Dispatch for CoordinatorDispatch {
    async fn dispatch(&self, envelope: Envelope) -> RpcResponse {
        self.handle.rpc(envelope).await
    }
}

/// Spawns the registry service task and returns its handle plus the
/// coordinator's inbound dispatch.
pub fn spawn_service(aggregator: AggregatorHandle) -> (RegistryHandle, Arc<CoordinatorDispatch>) {
    let (tx, mut rx) = mpsc::channel(64);
    let handle = RegistryHandle { tx };
    let dispatch = Arc::new(CoordinatorDispatch {
        handle: handle.clone(),
    });

    tokio::spawn(async move {
        let mut service = Service {
            registry: Registry::new(),
            seen_reports: HashSet::new(),
            aggregator,
        };
        while let Some(request) = rx.recv().await {
            match request {
                RegistryRequest::Rpc { envelope, reply } => {
                    let _ = reply.send(service.handle_rpc(envelope));
                }
                RegistryRequest::Active { role, reply } => {
                    let _ = reply.send(service.registry.active(role));
                }
                RegistryRequest::DeactivateAll { reply } => {
                    service.registry.deactivate_all();
                    info!("all registrations deactivated");
                    let _ = reply.send(());
                }
            }
        }
        debug!("registry service stopped");
    });

    (handle, dispatch)
}

struct Service {
    registry: Registry,
    seen_reports: HashSet<Uuid>,
    aggregator: AggregatorHandle,
}

impl Service {
    fn sender(&self) -> String {
        format_sender(Role::Coordinator, COORDINATOR_IDENTITY)
    }

    fn handle_rpc(&mut self, envelope: Envelope) -> RpcResponse {
        if let Err(error) = check_envelope(&envelope) {
            warn!(sender = %envelope.sender, error = %error, "envelope rejected");
            return RpcResponse::fail(error.code(), error.to_string());
        }

        match &envelope.message {
            Message::Register {
                role,
                endpoint,
                game_types,
            } => match self.registry.register(*role, endpoint, game_types) {
                Ok(record) => {
                    info!(identity = %record.identity, %endpoint, role = %record.role, "agent registered");
                    RpcResponse::ok(Envelope::reply_to(
                        &envelope,
                        self.sender(),
                        Message::Welcome {
                            identity: record.identity,
                            token: record.token,
                        },
                    ))
                }
                Err(code) => {
                    warn!(%endpoint, ?code, "registration rejected");
                    RpcResponse::fail(code, format!("registration from {endpoint} rejected"))
                }
            },
            Message::ResultReport(report) => {
                if let Err(code) = self.authenticate(&envelope, Role::Referee) {
                    return RpcResponse::fail(code, "result report not authenticated");
                }
                // Retries reuse the conversation id; re-ack without a second
                // side effect.
                if self.seen_reports.insert(envelope.conversation_id) {
                    self.aggregator.enqueue(report.clone());
                } else {
                    debug!(match_id = %report.match_id, "duplicate result report re-acked");
                }
                RpcResponse::ok(Envelope::reply_to(
                    &envelope,
                    self.sender(),
                    Message::ReportAck {
                        match_id: report.match_id.clone(),
                    },
                ))
            }
            other => RpcResponse::fail(
                ErrorCode::UnknownMethod,
                format!("coordinator does not serve {}", other.type_name()),
            ),
        }
    }

    fn authenticate(&self, envelope: &Envelope, expected_role: Role) -> Result<(), ErrorCode> {
        let (role, identity) =
            parse_sender(&envelope.sender).map_err(|_| ErrorCode::MalformedSender)?;
        if role != expected_role {
            return Err(ErrorCode::SenderMismatch);
        }
        let token = envelope.auth_token.as_deref().ok_or(ErrorCode::MissingToken)?;
        if self.registry.record(identity).is_none() {
            return Err(ErrorCode::NotRegistered);
        }
        if !self.registry.check_token(identity, token) {
            return Err(ErrorCode::InvalidToken);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use crate::protocol::MatchReport;
    use crate::standings::{Aggregator, ScoreWeights};

    fn game_types() -> Vec<String> {
        vec![GAME_TYPE.to_owned()]
    }

    #[test]
    fn identities_are_sequential_per_role() {
        let mut registry = Registry::new();
        let p1 = registry.register(Role::Player, "p1.local:9000", &game_types()).unwrap();
        let p2 = registry.register(Role::Player, "p2.local:9000", &game_types()).unwrap();
        let r1 = registry.register(Role::Referee, "r1.local:9000", &game_types()).unwrap();
        assert_eq!(p1.identity, "P01");
        assert_eq!(p2.identity, "P02");
        assert_eq!(r1.identity, "R01");
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let mut registry = Registry::new();
        let a = registry.register(Role::Player, "a:1", &game_types()).unwrap();
        let b = registry.register(Role::Player, "b:1", &game_types()).unwrap();
        assert!(a.token.len() >= 32);
        assert!(a.token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn duplicate_endpoint_is_rejected() {
        let mut registry = Registry::new();
        registry.register(Role::Player, "same:1", &game_types()).unwrap();
        assert_eq!(
            registry.register(Role::Player, "same:1", &game_types()),
            Err(ErrorCode::DuplicateRegistration)
        );
    }

    #[test]
    fn unsupported_game_type_is_rejected() {
        let mut registry = Registry::new();
        assert_eq!(
            registry.register(Role::Player, "p:1", &["chess".to_owned()]),
            Err(ErrorCode::UnsupportedGameType)
        );
    }

    #[test]
    fn deactivation_invalidates_tokens() {
        let mut registry = Registry::new();
        let record = registry.register(Role::Referee, "r:1", &game_types()).unwrap();
        assert!(registry.check_token(&record.identity, &record.token));
        registry.deactivate_all();
        assert!(!registry.check_token(&record.identity, &record.token));
    }

    fn register_envelope(endpoint: &str, role: Role) -> Envelope {
        Envelope::request(
            format_sender(role, "newcomer"),
            None,
            Message::Register {
                role,
                endpoint: endpoint.to_owned(),
                game_types: game_types(),
            },
        )
    }

    fn report_envelope(identity: &str, token: &str) -> Envelope {
        Envelope::request(
            format_sender(Role::Referee, identity),
            Some(token.to_owned()),
            Message::ResultReport(MatchReport {
                match_id: "R1M1".into(),
                player_a: "P01".into(),
                player_b: "P02".into(),
                outcome: Outcome::Draw,
                drawn: Some(6),
                cause: None,
            }),
        )
    }

    #[tokio::test]
    async fn report_retries_do_not_double_count() {
        let aggregator = Aggregator::spawn(ScoreWeights::default(), None);
        aggregator.handle().seed(vec!["P01".into(), "P02".into()]);
        let (handle, _dispatch) = spawn_service(aggregator.handle());

        let welcome = handle.rpc(register_envelope("ref:1", Role::Referee)).await;
        let Some(Message::Welcome { identity, token }) =
            welcome.result.map(|e| e.message)
        else {
            panic!("expected a welcome");
        };

        let report = report_envelope(&identity, &token);
        let first = handle.rpc(report.clone()).await;
        let second = handle.rpc(report).await;
        assert!(first.result.is_some());
        assert!(second.result.is_some());

        let table = aggregator.flush().await.unwrap();
        assert_eq!(table.entry("P01").unwrap().played, 1);
    }

    #[tokio::test]
    async fn unauthenticated_report_is_rejected() {
        let aggregator = Aggregator::spawn(ScoreWeights::default(), None);
        let (handle, _dispatch) = spawn_service(aggregator.handle());

        let response = handle.rpc(report_envelope("R99", "bogus")).await;
        assert_eq!(
            response.error.map(|e| e.error_code),
            Some(ErrorCode::NotRegistered)
        );
    }

    #[tokio::test]
    async fn coordinator_rejects_messages_it_does_not_serve() {
        let aggregator = Aggregator::spawn(ScoreWeights::default(), None);
        let (handle, _dispatch) = spawn_service(aggregator.handle());

        let envelope = Envelope::request(
            format_sender(Role::Player, "P01"),
            Some("tok".into()),
            Message::ChoiceRequest {
                match_id: "R1M1".into(),
            },
        );
        let response = handle.rpc(envelope).await;
        assert_eq!(
            response.error.map(|e| e.error_code),
            Some(ErrorCode::UnknownMethod)
        );
    }
}
