//! The standings table and the single-writer queue that mutates it.
//!
//! Match code never touches standings directly: referees enqueue a
//! [`MatchReport`](crate::protocol::MatchReport) and a single
//! [`Aggregator`] worker drains the queue one item at a time, applying each
//! result and persisting the updated table before taking the next. That
//! total ordering of mutations is the system's core correctness mechanism;
//! do not replace it with per-entry locks or direct read-modify-write from
//! match tasks.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::outcome::Outcome;
use crate::protocol::MatchReport;
use crate::snapshot::SnapshotStore;

/// Points awarded per match result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Points for a win, including technical wins.
    pub win: u32,
    /// Points for a draw.
    pub draw: u32,
    /// Points for a loss or technical loss.
    pub loss: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            win: 3,
            draw: 1,
            loss: 0,
        }
    }
}

/// Counters for one registered player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingsEntry {
    /// Matches this player took part in.
    pub played: u32,
    /// Wins, including technical wins.
    pub won: u32,
    /// Draws.
    pub drawn: u32,
    /// Losses, including technical losses.
    pub lost: u32,
    /// Accumulated points.
    pub points: u32,
}

/// The standings of every registered player.
///
/// Stored as an ordered map so snapshots serialize deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandingsTable {
    entries: BTreeMap<String, StandingsEntry>,
}

impl StandingsTable {
    /// A table with one zeroed entry per player.
    pub fn with_players(players: impl IntoIterator<Item = String>) -> StandingsTable {
        StandingsTable {
            entries: players.into_iter().map(|p| (p, StandingsEntry::default())).collect(),
        }
    }

    /// Looks up one player's counters.
    pub fn entry(&self, identity: &str) -> Option<&StandingsEntry> {
        self.entries.get(identity)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no players are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies one match result to both participants' counters.
    ///
    /// Fails without mutating anything when either participant is unknown;
    /// the aggregator treats that as a malformed item to skip.
    pub fn apply(&mut self, report: &MatchReport, weights: &ScoreWeights) -> Result<()> {
        if !self.entries.contains_key(&report.player_a) {
            bail!("unknown player {} in {}", report.player_a, report.match_id);
        }
        if !self.entries.contains_key(&report.player_b) {
            bail!("unknown player {} in {}", report.player_b, report.match_id);
        }
        if report.player_a == report.player_b {
            bail!("{} lists the same player twice", report.match_id);
        }

        // (a's delta, b's delta) as (won, drawn, lost, points) increments.
        let win = (1, 0, 0, weights.win);
        let draw = (0, 1, 0, weights.draw);
        let loss = (0, 0, 1, weights.loss);
        let (delta_a, delta_b) = match report.outcome {
            Outcome::WinA => (win, loss),
            Outcome::WinB => (loss, win),
            Outcome::Draw => (draw, draw),
            Outcome::TechnicalLossA => (loss, win),
            Outcome::TechnicalLossB => (win, loss),
            Outcome::DoubleForfeit => (loss, loss),
        };

        for (identity, (won, drawn, lost, points)) in
            [(&report.player_a, delta_a), (&report.player_b, delta_b)]
        {
            let entry = self.entries.get_mut(identity).expect("checked above");
            entry.played += 1;
            entry.won += won;
            entry.drawn += drawn;
            entry.lost += lost;
            entry.points += points;
        }
        Ok(())
    }

    /// Entries sorted by the deterministic tie-break key:
    /// points desc, wins desc, identity asc.
    pub fn ranked(&self) -> Vec<(String, StandingsEntry)> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), *entry))
            .collect();
        rows.sort_by(|a, b| {
            b.1.points
                .cmp(&a.1.points)
                .then(b.1.won.cmp(&a.1.won))
                .then(a.0.cmp(&b.0))
        });
        rows
    }

    /// The current leader, if any entries exist.
    pub fn leader(&self) -> Option<String> {
        self.ranked().into_iter().next().map(|(id, _)| id)
    }
}

enum Command {
    Seed(Vec<String>),
    Apply(MatchReport),
    Flush(oneshot::Sender<StandingsTable>),
}

/// Cheap handle producers use to enqueue results.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl AggregatorHandle {
    /// Registers the players the table tracks. Sent once before any result.
    pub fn seed(&self, players: Vec<String>) {
        if self.tx.send(Command::Seed(players)).is_err() {
            error!("aggregator worker is gone, seed dropped");
        }
    }

    /// Enqueues one result without blocking; ordering is decided by the
    /// single worker, never by the caller.
    pub fn enqueue(&self, report: MatchReport) {
        debug!(match_id = %report.match_id, outcome = ?report.outcome, "result enqueued");
        if self.tx.send(Command::Apply(report)).is_err() {
            error!("aggregator worker is gone, result dropped");
        }
    }
}

/// The single-writer standings queue.
///
/// Spawns one worker task that owns the [`StandingsTable`]. Producers talk
/// to it only through [`AggregatorHandle`].
pub struct Aggregator {
    tx: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<StandingsTable>,
}

impl Aggregator {
    /// Spawns the worker. When `store` is given, the table is persisted
    /// after every applied item.
    pub fn spawn(weights: ScoreWeights, store: Option<SnapshotStore>) -> Aggregator {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(async move {
            let mut table = StandingsTable::default();
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Seed(players) => {
                        table = StandingsTable::with_players(players);
                        info!(players = table.len(), "standings seeded");
                    }
                    Command::Apply(report) => {
                        if let Err(e) = table.apply(&report, &weights) {
                            // One malformed result must not stall the queue.
                            error!(match_id = %report.match_id, error = %e, "skipping malformed result");
                            continue;
                        }
                        debug!(match_id = %report.match_id, "standings updated");
                        if let Some(store) = &store {
                            if let Err(e) = store.write_standings(&table) {
                                warn!(error = %e, "standings snapshot failed");
                            }
                        }
                    }
                    Command::Flush(reply) => {
                        let _ = reply.send(table.clone());
                    }
                }
            }
            table
        });
        Aggregator { tx, worker }
    }

    /// A producer handle; clone freely.
    pub fn handle(&self) -> AggregatorHandle {
        AggregatorHandle { tx: self.tx.clone() }
    }

    /// Barrier: resolves once every previously enqueued item has been
    /// applied, returning a consistent copy of the table.
    pub async fn flush(&self) -> Result<StandingsTable> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply_tx))
            .ok()
            .context("aggregator worker is gone")?;
        reply_rx.await.context("aggregator worker dropped the flush")
    }

    /// Stops the worker and returns the final table.
    pub async fn shutdown(self) -> Result<StandingsTable> {
        drop(self.tx);
        self.worker.await.context("aggregator worker panicked")
    }
}
