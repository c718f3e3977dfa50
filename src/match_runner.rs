//! The referee's per-match state machine.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::agent::{format_sender, parse_sender, Role};
use crate::configuration::Configuration;
use crate::outcome::{self, Outcome, Parity};
use crate::protocol::{now_timestamp, Envelope, ErrorCode, MatchReport, Message, GAME_TYPE};
use crate::rpc_client::RpcClient;
use crate::tournament_scheduler::Fixture;

/// Lifecycle state of one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    /// Fixture emitted, nothing sent yet.
    Created,
    /// Invitations out, waiting for both acknowledgments.
    AwaitingJoin,
    /// Choice requests out, waiting for both guesses.
    AwaitingChoices,
    /// Drawing the number and applying the parity rule.
    Resolving,
    /// Outcome known, reporting to the coordinator.
    Reporting,
    /// Terminal.
    Done,
}

/// Direction of a transcript entry, from the referee's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Envelope sent by the referee.
    Sent,
    /// Envelope received from a peer.
    Received,
}

/// One envelope in a match's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Sent or received.
    pub direction: Direction,
    /// When the referee recorded it.
    pub at: String,
    /// The envelope itself.
    pub envelope: Envelope,
}

/// One participant as the referee addresses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    /// Registered identity, e.g. `P01`.
    pub identity: String,
    /// Callback address.
    pub endpoint: String,
}

/// Everything known about one match. Owned exclusively by the referee task
/// driving it; becomes read-only history once reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    /// The scheduled fixture.
    pub fixture: Fixture,
    /// Current lifecycle state.
    pub state: MatchState,
    /// The single random draw, once drawn.
    pub drawn: Option<u8>,
    /// Participant A's submitted guess.
    pub choice_a: Option<Parity>,
    /// Participant B's submitted guess.
    pub choice_b: Option<Parity>,
    /// Final outcome.
    pub outcome: Option<Outcome>,
    /// Error code behind a technical outcome.
    pub cause: Option<ErrorCode>,
    /// Set when the result report to the coordinator exhausted its retries.
    pub needs_reconciliation: bool,
    /// Every envelope exchanged for this match.
    pub transcript: Vec<TranscriptEntry>,
}

impl MatchRecord {
    fn new(fixture: Fixture) -> MatchRecord {
        MatchRecord {
            fixture,
            state: MatchState::Created,
            drawn: None,
            choice_a: None,
            choice_b: None,
            outcome: None,
            cause: None,
            needs_reconciliation: false,
            transcript: vec![],
        }
    }

    fn sent(&mut self, envelope: &Envelope) {
        self.transcript.push(TranscriptEntry {
            direction: Direction::Sent,
            at: now_timestamp(),
            envelope: envelope.clone(),
        });
    }

    fn received(&mut self, envelope: &Envelope) {
        self.transcript.push(TranscriptEntry {
            direction: Direction::Received,
            at: now_timestamp(),
            envelope: envelope.clone(),
        });
    }
}

/// A referee instance: runs match state machines under one registered
/// identity. May run many matches concurrently, one record per match, with
/// no shared mutable state between them.
#[derive(Clone)]
pub struct Referee {
    identity: String,
    token: String,
    client: Arc<RpcClient>,
    config: Configuration,
    coordinator_endpoint: String,
}

/// Result of one request/reply exchange with a participant.
type StepResult = (Result<Envelope, ErrorCode>, Vec<TranscriptEntry>);

impl Referee {
    /// Creates a referee running under the given registered identity.
    pub fn new(
        identity: impl Into<String>,
        token: impl Into<String>,
        client: Arc<RpcClient>,
        config: Configuration,
        coordinator_endpoint: impl Into<String>,
    ) -> Referee {
        Referee {
            identity: identity.into(),
            token: token.into(),
            client,
            config,
            coordinator_endpoint: coordinator_endpoint.into(),
        }
    }

    /// The referee's registered identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn sender(&self) -> String {
        format_sender(Role::Referee, &self.identity)
    }

    /// Drives one fixture from invitation to its reported outcome.
    ///
    /// Never fails: every failure mode ends in a terminal record, either a
    /// technical outcome or `needs_reconciliation` when the coordinator was
    /// unreachable.
    #[instrument(skip_all, fields(match_id = %fixture.id, referee = %self.identity))]
    pub async fn run_match(&self, fixture: Fixture, seat_a: Seat, seat_b: Seat) -> MatchRecord {
        let mut record = MatchRecord::new(fixture.clone());
        info!(player_a = %seat_a.identity, player_b = %seat_b.identity, "match started");

        // Invitations go out to both seats concurrently, each with its own
        // timeout budget.
        record.state = MatchState::AwaitingJoin;
        let invite_against = |opponent: &Seat| Message::MatchInvite {
            match_id: fixture.id.clone(),
            opponent: opponent.identity.clone(),
            game_type: GAME_TYPE.to_owned(),
        };
        let (step_a, step_b) = tokio::join!(
            self.exchange(&seat_a, invite_against(&seat_b), self.config.invite_timeout),
            self.exchange(&seat_b, invite_against(&seat_a), self.config.invite_timeout),
        );
        let ack_a = self.absorb(&mut record, step_a).and_then(|r| expect_join_ack(&r, &fixture.id));
        let ack_b = self.absorb(&mut record, step_b).and_then(|r| expect_join_ack(&r, &fixture.id));
        self.apply_step(&mut record, ack_a, ack_b);

        if record.outcome.is_none() {
            // Both joined; ask for choices with the larger thinking budget.
            record.state = MatchState::AwaitingChoices;
            let request = Message::ChoiceRequest {
                match_id: fixture.id.clone(),
            };
            let (step_a, step_b) = tokio::join!(
                self.exchange(&seat_a, request.clone(), self.config.choice_timeout),
                self.exchange(&seat_b, request.clone(), self.config.choice_timeout),
            );
            let choice_a = self.absorb(&mut record, step_a).and_then(|r| expect_choice(&r, &fixture.id));
            let choice_b = self.absorb(&mut record, step_b).and_then(|r| expect_choice(&r, &fixture.id));
            record.choice_a = choice_a.as_ref().ok().copied();
            record.choice_b = choice_b.as_ref().ok().copied();
            self.apply_step(&mut record, choice_a.map(|_| ()), choice_b.map(|_| ()));
        }

        if record.outcome.is_none() {
            record.state = MatchState::Resolving;
            // The draw happens exactly once and is reused for both
            // participants' evaluation.
            let drawn = outcome::draw();
            let choice_a = record.choice_a.expect("choice recorded before resolving");
            let choice_b = record.choice_b.expect("choice recorded before resolving");
            record.drawn = Some(drawn);
            record.outcome = Some(outcome::resolve(choice_a, choice_b, drawn));
            info!(drawn, outcome = ?record.outcome, "match resolved");
        }

        self.notify_participants(&mut record, &seat_a, &seat_b).await;
        self.report(&mut record).await;
        record.state = MatchState::Done;
        info!(outcome = ?record.outcome, "match finished");
        record
    }

    /// One request/reply exchange with a seat, transcripts included.
    async fn exchange(&self, seat: &Seat, message: Message, budget: Duration) -> StepResult {
        let envelope = Envelope::request(self.sender(), Some(self.token.clone()), message);
        let mut transcript = vec![TranscriptEntry {
            direction: Direction::Sent,
            at: now_timestamp(),
            envelope: envelope.clone(),
        }];
        match self.client.call(&seat.endpoint, &envelope, budget).await {
            Ok(reply) => {
                transcript.push(TranscriptEntry {
                    direction: Direction::Received,
                    at: now_timestamp(),
                    envelope: reply.clone(),
                });
                match parse_sender(&reply.sender) {
                    Ok((Role::Player, id)) if id == seat.identity => (Ok(reply), transcript),
                    _ => {
                        warn!(expected = %seat.identity, got = %reply.sender, "reply sender mismatch");
                        (Err(ErrorCode::SenderMismatch), transcript)
                    }
                }
            }
            Err(error) => {
                warn!(seat = %seat.identity, error = %error, "participant unreachable");
                (Err(error.error_code()), transcript)
            }
        }
    }

    fn absorb(&self, record: &mut MatchRecord, step: StepResult) -> Result<Envelope, ErrorCode> {
        let (result, transcript) = step;
        record.transcript.extend(transcript);
        result
    }

    /// Applies the technical-loss policy after a two-sided step.
    fn apply_step(
        &self,
        record: &mut MatchRecord,
        a: Result<(), ErrorCode>,
        b: Result<(), ErrorCode>,
    ) {
        match (a, b) {
            (Ok(()), Ok(())) => {}
            (Err(cause), Ok(())) => {
                record.outcome = Some(Outcome::TechnicalLossA);
                record.cause = Some(cause);
                warn!(state = ?record.state, ?cause, "technical loss for participant A");
            }
            (Ok(()), Err(cause)) => {
                record.outcome = Some(Outcome::TechnicalLossB);
                record.cause = Some(cause);
                warn!(state = ?record.state, ?cause, "technical loss for participant B");
            }
            (Err(cause_a), Err(cause_b)) => {
                record.outcome = Some(Outcome::DoubleForfeit);
                record.cause = Some(cause_a);
                warn!(state = ?record.state, ?cause_a, ?cause_b, "both participants forfeited");
            }
        }
    }

    /// Best-effort outcome notices on entry to `REPORTING`; one attempt
    /// each, failures only logged.
    async fn notify_participants(&self, record: &mut MatchRecord, seat_a: &Seat, seat_b: &Seat) {
        record.state = MatchState::Reporting;
        let outcome = record.outcome.expect("outcome decided before notifying");
        let notice = Message::MatchOutcome {
            match_id: record.fixture.id.clone(),
            outcome,
            drawn: record.drawn,
            cause: record.cause,
        };
        let envelope_a = Envelope::request(self.sender(), Some(self.token.clone()), notice.clone());
        let envelope_b = Envelope::request(self.sender(), Some(self.token.clone()), notice);
        record.sent(&envelope_a);
        record.sent(&envelope_b);
        let (a, b) = tokio::join!(
            self.client.call_once(&seat_a.endpoint, &envelope_a, self.config.notify_timeout),
            self.client.call_once(&seat_b.endpoint, &envelope_b, self.config.notify_timeout),
        );
        for (seat, result) in [(seat_a, a), (seat_b, b)] {
            match result {
                Ok(reply) => record.received(&reply),
                Err(error) => {
                    warn!(seat = %seat.identity, error = %error, "outcome notice undelivered")
                }
            }
        }
    }

    /// The one step that must eventually succeed: report to the coordinator,
    /// retried per client policy, surfaced loudly on exhaustion.
    async fn report(&self, record: &mut MatchRecord) {
        let report = MatchReport {
            match_id: record.fixture.id.clone(),
            player_a: record.fixture.player_a.clone(),
            player_b: record.fixture.player_b.clone(),
            outcome: record.outcome.expect("outcome decided before reporting"),
            drawn: record.drawn,
            cause: record.cause,
        };
        let envelope = Envelope::request(
            self.sender(),
            Some(self.token.clone()),
            Message::ResultReport(report),
        );
        record.sent(&envelope);
        match self
            .client
            .call(&self.coordinator_endpoint, &envelope, self.config.report_timeout)
            .await
        {
            Ok(reply) => record.received(&reply),
            Err(error) => {
                tracing::error!(
                    match_id = %record.fixture.id,
                    error = %error,
                    "result report exhausted retries; match needs manual reconciliation"
                );
                record.needs_reconciliation = true;
            }
        }
    }
}

fn expect_join_ack(reply: &Envelope, match_id: &str) -> Result<(), ErrorCode> {
    match &reply.message {
        Message::JoinAck { match_id: acked } if acked == match_id => Ok(()),
        Message::JoinAck { .. } => Err(ErrorCode::UnknownMatch),
        _ => Err(ErrorCode::InvalidParams),
    }
}

fn expect_choice(reply: &Envelope, match_id: &str) -> Result<Parity, ErrorCode> {
    match &reply.message {
        Message::ChoiceReply { match_id: replied, choice } if replied == match_id => Ok(*choice),
        Message::ChoiceReply { .. } => Err(ErrorCode::UnknownMatch),
        _ => Err(ErrorCode::InvalidParams),
    }
}
