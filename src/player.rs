//! A simulated player agent.
//!
//! Players are intentionally simple: they register with the coordinator,
//! acknowledge invitations, and answer choice requests through a pluggable
//! [`ChoiceStrategy`]. The crate uses them to run whole tournaments
//! in-process; the same type can sit behind an HTTP listener to act as a
//! remote participant.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::agent::{format_sender, Role};
use crate::outcome::Parity;
use crate::protocol::{check_envelope, Envelope, ErrorCode, Message, RpcResponse, GAME_TYPE};
use crate::rpc_client::RpcClient;
use crate::transport::Dispatch;

/// How a player picks its parity guess.
pub trait ChoiceStrategy: Send + Sync {
    /// Returns the guess for one match.
    fn choose(&self, match_id: &str) -> Parity;
}

/// Guesses uniformly at random. Players are not adversaries of the draw
/// source, so the thread RNG is fine here.
pub struct RandomChoice;

impl ChoiceStrategy for RandomChoice {
    fn choose(&self, _match_id: &str) -> Parity {
        if rand::random::<bool>() {
            Parity::Even
        } else {
            Parity::Odd
        }
    }
}

/// Always guesses the same parity; handy for deterministic tests.
pub struct FixedChoice(pub Parity);

impl ChoiceStrategy for FixedChoice {
    fn choose(&self, _match_id: &str) -> Parity {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Session {
    identity: String,
    #[allow(dead_code)]
    token: String,
}

/// A participant agent.
pub struct Player {
    name: String,
    endpoint: String,
    strategy: Box<dyn ChoiceStrategy>,
    session: RwLock<Option<Session>>,
}

impl Player {
    /// Creates a player known as `name` before registration, reachable at
    /// `endpoint`.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        strategy: impl ChoiceStrategy + 'static,
    ) -> Arc<Player> {
        Arc::new(Player {
            name: name.into(),
            endpoint: endpoint.into(),
            strategy: Box::new(strategy),
            session: RwLock::new(None),
        })
    }

    /// The callback address this player registered with.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The identity assigned at registration, if the player has joined.
    pub async fn identity(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.identity.clone())
    }

    /// Registers with the coordinator and stores the issued session.
    pub async fn join(
        &self,
        client: &RpcClient,
        coordinator_endpoint: &str,
        budget: Duration,
    ) -> Result<String> {
        let request = Envelope::request(
            format_sender(Role::Player, &self.name),
            None,
            Message::Register {
                role: Role::Player,
                endpoint: self.endpoint.clone(),
                game_types: vec![GAME_TYPE.to_owned()],
            },
        );
        let reply = client
            .call(coordinator_endpoint, &request, budget)
            .await
            .with_context(|| format!("{} failed to register", self.name))?;
        let Message::Welcome { identity, token } = reply.message else {
            bail!("{} got a non-welcome registration reply", self.name);
        };
        info!(player = %self.name, %identity, "registered");
        *self.session.write().await = Some(Session {
            identity: identity.clone(),
            token,
        });
        Ok(identity)
    }

    async fn sender(&self) -> String {
        match self.session.read().await.as_ref() {
            Some(session) => format_sender(Role::Player, &session.identity),
            None => format_sender(Role::Player, &self.name),
        }
    }
}

#[async_trait]
impl Dispatch for Player {
    async fn dispatch(&self, envelope: Envelope) -> RpcResponse {
        if let Err(error) = check_envelope(&envelope) {
            return RpcResponse::fail(error.code(), error.to_string());
        }
        let sender = self.sender().await;
        match envelope.message.clone() {
            Message::MatchInvite { match_id, opponent, game_type } => {
                if game_type != GAME_TYPE {
                    return RpcResponse::fail(ErrorCode::UnsupportedGameType, game_type);
                }
                debug!(player = %sender, %match_id, %opponent, "invitation accepted");
                RpcResponse::ok(Envelope::reply_to(
                    &envelope,
                    sender,
                    Message::JoinAck { match_id },
                ))
            }
            Message::ChoiceRequest { match_id } => {
                let choice = self.strategy.choose(&match_id);
                debug!(player = %sender, %match_id, ?choice, "choice submitted");
                RpcResponse::ok(Envelope::reply_to(
                    &envelope,
                    sender,
                    Message::ChoiceReply { match_id, choice },
                ))
            }
            Message::MatchOutcome { match_id, outcome, .. } => {
                debug!(player = %sender, %match_id, ?outcome, "outcome received");
                RpcResponse::ok(Envelope::reply_to(&envelope, sender, Message::Ack))
            }
            Message::RoundStart { round } => {
                debug!(player = %sender, round, "round starting");
                RpcResponse::ok(Envelope::reply_to(&envelope, sender, Message::Ack))
            }
            Message::TournamentEnd { champion } => {
                info!(player = %sender, %champion, "tournament over");
                RpcResponse::ok(Envelope::reply_to(&envelope, sender, Message::Ack))
            }
            other => RpcResponse::fail(
                ErrorCode::UnknownMethod,
                format!("player does not serve {}", other.type_name()),
            ),
        }
    }
}
