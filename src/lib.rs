//! # Parity Tournament
//!
//! A modular Rust crate for simulating small tournaments of autonomous agents
//! (a coordinator, referees, players) that play a parity-guessing game over a
//! request/response RPC protocol.
//!
//! It provides:
//! - A validated JSON message [`Envelope`](crate::protocol::Envelope) with a
//!   closed message-type enumeration and error-code taxonomy
//! - A resilient [`RpcClient`](crate::rpc_client::RpcClient) with per-attempt
//!   deadlines, failure classification and capped exponential backoff
//! - The referee's per-match state machine with timeout-driven technical
//!   losses ([`match_runner`])
//! - A single-writer standings [`Aggregator`](crate::standings::Aggregator)
//!   that keeps scores consistent under concurrent match completions
//! - The [`Coordinator`](crate::coordinator::Coordinator) orchestration loop:
//!   registration, round-robin scheduling, round broadcasts and champion
//!   detection
//!
//! Matches run as independent tasks, one state machine per match, and the two
//! calls inside each match step are issued concurrently so a slow participant
//! never doubles the cost of a step. The only state shared across matches is
//! the standings table, and only the aggregator worker writes to it.
//!
//! # Documentation Overview
//!
//! - For the orchestration loop and tournament lifecycle, see the
//!   [`coordinator`] module.
//! - For timeout budgets, retry policy and scoring weights, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the wire format and validation rules, see the [`protocol`] module.
//! - To implement custom participants, implement
//!   [`Dispatch`](crate::transport::Dispatch) or plug a
//!   [`ChoiceStrategy`](crate::player::ChoiceStrategy) into the built-in
//!   [`Player`](crate::player::Player).
//!
//! # Usage Example
//!
//! A complete in-process tournament over the local transport:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use parity_tournament::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = LocalTransport::new();
//!     let config = Configuration::new()
//!         .with_invite_timeout(Duration::from_secs(2))
//!         .with_choice_timeout(Duration::from_secs(5));
//!
//!     let mut coordinator = Coordinator::new(config, transport.clone(), "coordinator.local")?;
//!     transport.bind("coordinator.local", coordinator.dispatch()).await;
//!
//!     // Players register themselves before the run starts.
//!     let client = coordinator.client();
//!     for name in ["alice", "bob", "carol", "dave"] {
//!         let endpoint = format!("{name}.local");
//!         let player = Player::new(name, endpoint.clone(), RandomChoice);
//!         transport.bind(endpoint, player.clone()).await;
//!         player.join(&client, "coordinator.local", Duration::from_secs(2)).await?;
//!     }
//!
//!     // Two referees share the six matches across three rounds.
//!     let summary = coordinator.run(2).await?;
//!     println!("champion: {:?}", summary.champion);
//!     for (identity, entry) in summary.standings.ranked() {
//!         println!(
//!             "{identity}: {} pts ({}-{}-{})",
//!             entry.points, entry.won, entry.drawn, entry.lost
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Example Remote Agent
//!
//! The same [`Player`](crate::player::Player) can live in its own process
//! behind the well-known `POST /rpc` path and talk to a coordinator over
//! HTTP:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use parity_tournament::http;
//! use parity_tournament::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:9001").await?;
//!     let player = Player::new("remote-player", "127.0.0.1:9001", RandomChoice);
//!
//!     let client = RpcClient::new(HttpTransport::new(), RetryPolicy::default());
//!     player
//!         .join(&client, "127.0.0.1:9000", Duration::from_secs(5))
//!         .await?;
//!
//!     http::serve(listener, player).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Agent Requirements
//!
//! - Every call except `REGISTER` must carry the bearer token issued in the
//!   `WELCOME` response
//! - Invitations must be acknowledged within the invite budget, and choices
//!   submitted within the choice budget, or the opponent wins by technical
//!   default
//! - Responses must reuse the request's conversation id so retries correlate
//!   without duplicate side effects
#![warn(missing_docs)]

pub use anyhow;

pub mod agent;
pub mod configuration;
pub mod coordinator;
pub mod http;
mod logger;
pub mod match_runner;
pub mod outcome;
pub mod player;
pub mod protocol;
mod registry;
pub mod rpc_client;
pub mod snapshot;
pub mod standings;
pub mod tournament_scheduler;
pub mod transport;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use parity_tournament::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`Coordinator`](crate::coordinator::Coordinator) and
///   [`TournamentSummary`](crate::coordinator::TournamentSummary)
/// - the built-in [`Player`](crate::player::Player) and its strategies
/// - both [`transports`](crate::transport) and the
///   [`RpcClient`](crate::rpc_client::RpcClient)
pub mod prelude {
    pub use crate::agent::Role;
    pub use crate::configuration::Configuration;
    pub use crate::coordinator::{Coordinator, TournamentSummary};
    pub use crate::outcome::{Outcome, Parity};
    pub use crate::player::{ChoiceStrategy, FixedChoice, Player, RandomChoice};
    pub use crate::rpc_client::{RetryPolicy, RpcClient};
    pub use crate::standings::{ScoreWeights, StandingsTable};
    pub use crate::transport::{HttpTransport, LocalTransport};
}
