//! Core orchestration logic for running tournaments.
//!
//! This module defines the [`Coordinator`] type, which owns tournament
//! execution. Its responsibilities include:
//!
//! - Accepting registrations through its inbound dispatch (see
//!   [`Coordinator::dispatch`])
//! - Turning the registered players and referees into a round-robin
//!   [`FixtureList`](crate::tournament_scheduler::FixtureList)
//! - Driving rounds: broadcasting round starts, running one referee task per
//!   fixture, and waiting for every match to finish
//! - Draining the standings aggregator between rounds and declaring the
//!   champion at the end
//!
//! # Behavior & Configuration
//!
//! Behavior is controlled by a [`Configuration`] object: timeout budgets,
//! retry policy, scoring weights and the optional snapshot directory. The
//! coordinator never mutates standings itself; referees report results over
//! the RPC protocol and the single aggregator worker is the sole writer.
//!
//! Players register themselves before [`Coordinator::run`] is called; the
//! run enlists the requested number of referee instances, which hold their
//! own registered identities and tokens. A single unreachable player never
//! blocks a broadcast, and a failure inside one match never propagates to
//! its siblings.
//!
//! # Example
//!
//! See the crate-level documentation for a complete in-process tournament.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use futures::future::join_all;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::agent::{format_sender, RegistrationRecord, Role};
use crate::configuration::Configuration;
use crate::logger::init_logger;
use crate::match_runner::{MatchRecord, Referee, Seat};
use crate::protocol::{Envelope, Message, GAME_TYPE};
use crate::registry::{issue_token, spawn_service, RegistryHandle, COORDINATOR_IDENTITY};
use crate::rpc_client::RpcClient;
use crate::snapshot::SnapshotStore;
use crate::standings::{Aggregator, StandingsTable};
use crate::tournament_scheduler::schedule;
use crate::transport::{Dispatch, Transport};

/// Everything a finished tournament produced.
#[derive(Debug)]
pub struct TournamentSummary {
    /// Highest-ranked identity, if any match was played.
    pub champion: Option<String>,
    /// Final standings table.
    pub standings: StandingsTable,
    /// Every match record, transcripts included.
    pub matches: Vec<MatchRecord>,
    /// Number of rounds played.
    pub rounds: u32,
}

/// The coordinator agent: registration, scheduling, round orchestration and
/// standings ownership.
pub struct Coordinator {
    config: Configuration,
    endpoint: String,
    session_token: String,
    client: Arc<RpcClient>,
    registry: RegistryHandle,
    dispatch: Arc<dyn Dispatch>,
    aggregator: Aggregator,
    store: Option<SnapshotStore>,
}

impl Coordinator {
    /// Creates a coordinator reachable at `endpoint` over `transport`.
    ///
    /// The caller is responsible for making [`Coordinator::dispatch`]
    /// reachable at that address, by binding it on a
    /// [`LocalTransport`](crate::transport::LocalTransport) or serving it
    /// via [`http::serve`](crate::http::serve).
    #[instrument(skip_all)]
    pub fn new(
        config: Configuration,
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
    ) -> Result<Coordinator> {
        if config.log {
            init_logger();
        }

        let store = match &config.snapshot_dir {
            Some(dir) => Some(SnapshotStore::new(dir)?),
            None => None,
        };
        let aggregator = Aggregator::spawn(config.weights, store.clone());
        let (registry, dispatch) = spawn_service(aggregator.handle());
        let dispatch: Arc<dyn Dispatch> = dispatch;
        let client = Arc::new(RpcClient::new(transport, config.retry_policy()));

        Ok(Coordinator {
            config,
            endpoint: endpoint.into(),
            session_token: issue_token(),
            client,
            registry,
            dispatch,
            aggregator,
            store,
        })
    }

    /// The coordinator's inbound face; bind or serve this at the endpoint
    /// the coordinator was created with.
    pub fn dispatch(&self) -> Arc<dyn Dispatch> {
        self.dispatch.clone()
    }

    /// The RPC client this coordinator uses; players in the same process can
    /// share it to register.
    pub fn client(&self) -> Arc<RpcClient> {
        self.client.clone()
    }

    /// The coordinator's own callback address.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs one whole tournament over the players registered so far.
    ///
    /// Schedules every pair once, plays rounds to completion, and returns
    /// the summary with the champion and final standings.
    ///
    /// # Errors
    /// Fails when fewer than two players registered, no referee could be
    /// enlisted, or the aggregator worker died.
    #[instrument(skip_all, fields(referees = referee_count))]
    pub async fn run(&mut self, referee_count: usize) -> Result<TournamentSummary> {
        ensure!(referee_count >= 1, "a tournament needs at least one referee");
        let players = self.registry.active(Role::Player).await?;
        ensure!(
            players.len() >= 2,
            "a tournament needs at least two registered players, got {}",
            players.len()
        );

        let enlisted = self.enlist_referees(referee_count).await?;
        let player_ids: Vec<String> = players.iter().map(|p| p.identity.clone()).collect();
        let referee_ids: Vec<String> = enlisted.iter().map(|r| r.identity().to_owned()).collect();
        let referees: HashMap<String, Referee> = enlisted
            .into_iter()
            .map(|r| (r.identity().to_owned(), r))
            .collect();
        let fixtures = schedule(&player_ids, &referee_ids)?;
        info!(
            players = player_ids.len(),
            referees = referee_ids.len(),
            matches = fixtures.len(),
            rounds = fixtures.rounds().len(),
            "tournament scheduled"
        );
        self.aggregator.handle().seed(player_ids);

        let seats: HashMap<String, Seat> = players
            .iter()
            .map(|p| {
                (
                    p.identity.clone(),
                    Seat {
                        identity: p.identity.clone(),
                        endpoint: p.endpoint.clone(),
                    },
                )
            })
            .collect();

        let mut matches = Vec::with_capacity(fixtures.len());
        for (round_index, round) in fixtures.rounds().iter().enumerate() {
            let round_no = round_index as u32 + 1;
            self.broadcast(&players, Message::RoundStart { round: round_no }).await;

            let mut running = JoinSet::new();
            for fixture in round.clone() {
                let referee = referees
                    .get(&fixture.referee)
                    .expect("scheduler only assigns enlisted referees")
                    .clone();
                let seat_a = seats[&fixture.player_a].clone();
                let seat_b = seats[&fixture.player_b].clone();
                running.spawn(async move { referee.run_match(fixture, seat_a, seat_b).await });
            }
            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok(record) => {
                        if record.needs_reconciliation {
                            error!(
                                match_id = %record.fixture.id,
                                "result missing from standings, flagged for manual reconciliation"
                            );
                        }
                        if let Some(store) = &self.store {
                            if let Err(e) = store.archive_match(&record) {
                                warn!(match_id = %record.fixture.id, error = %e, "transcript archive failed");
                            }
                        }
                        matches.push(record);
                    }
                    Err(e) => error!(error = %e, "match task panicked"),
                }
            }

            // All fixtures are DONE; confirm the queue is drained before the
            // next round starts.
            let table = self.aggregator.flush().await?;
            info!(round = round_no, leader = ?table.leader(), "round complete");
        }

        let standings = self.aggregator.flush().await?;
        let champion = standings.leader();
        if let Some(champion) = &champion {
            info!(%champion, "tournament complete");
            self.broadcast(
                &players,
                Message::TournamentEnd {
                    champion: champion.clone(),
                },
            )
            .await;
        }
        self.registry.deactivate_all().await?;

        Ok(TournamentSummary {
            champion,
            standings,
            matches,
            rounds: fixtures.rounds().len() as u32,
        })
    }

    /// Registers `count` in-process referee instances through the normal
    /// registration path, so their calls authenticate like any remote agent.
    async fn enlist_referees(&self, count: usize) -> Result<Vec<Referee>> {
        let mut referees = Vec::with_capacity(count);
        for n in 1..=count {
            let request = Envelope::request(
                format_sender(Role::Referee, &format!("candidate-{n}")),
                None,
                Message::Register {
                    role: Role::Referee,
                    endpoint: format!("{}/referees/{n}", self.endpoint),
                    game_types: vec![GAME_TYPE.to_owned()],
                },
            );
            let response = self.registry.rpc(request).await;
            if let Some(error) = response.error {
                bail!("enlisting referee {n} failed: {}", error.message);
            }
            let reply = response.result.context("empty registration response")?;
            let Message::Welcome { identity, token } = reply.message else {
                bail!("enlisting referee {n} got a non-welcome reply");
            };
            referees.push(Referee::new(
                identity,
                token,
                self.client.clone(),
                self.config.clone(),
                self.endpoint.clone(),
            ));
        }
        Ok(referees)
    }

    /// Concurrent fan-out to every player; failures are collected and
    /// logged, never awaited serially, never fatal.
    async fn broadcast(&self, players: &[RegistrationRecord], message: Message) {
        let sender = format_sender(Role::Coordinator, COORDINATOR_IDENTITY);
        let calls = players.iter().map(|player| {
            let envelope = Envelope::request(
                sender.clone(),
                Some(self.session_token.clone()),
                message.clone(),
            );
            let client = self.client.clone();
            let endpoint = player.endpoint.clone();
            let identity = player.identity.clone();
            let budget = self.config.notify_timeout;
            async move { (identity, client.call_once(&endpoint, &envelope, budget).await) }
        });

        let failures: Vec<_> = join_all(calls)
            .await
            .into_iter()
            .filter_map(|(identity, result)| result.err().map(|e| (identity, e)))
            .collect();
        for (identity, error) in failures {
            warn!(player = %identity, error = %error, "broadcast undelivered");
        }
    }
}
