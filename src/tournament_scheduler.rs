//! Round-robin fixture generation with balanced referee assignment.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// One scheduled match between two specific participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// Match id, `R{round}M{index}`.
    pub id: String,
    /// 1-based round number.
    pub round: u32,
    /// First participant identity.
    pub player_a: String,
    /// Second participant identity.
    pub player_b: String,
    /// Identity of the referee assigned to run the match.
    pub referee: String,
}

/// The full round-robin schedule, grouped into rounds. Generated once,
/// immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureList {
    rounds: Vec<Vec<Fixture>>,
}

impl FixtureList {
    /// Rounds in play order.
    pub fn rounds(&self) -> &[Vec<Fixture>] {
        &self.rounds
    }

    /// Total number of fixtures across all rounds.
    pub fn len(&self) -> usize {
        self.rounds.iter().map(Vec::len).sum()
    }

    /// True when no fixtures were generated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds a balanced round-robin schedule via the circle rotation method.
///
/// For `n` players this produces exactly `n*(n-1)/2` unordered pairs with no
/// player appearing twice in the same round. Odd player counts are padded
/// with a phantom slot; the phantom's pairings become byes and produce no
/// fixture. Referees are assigned by rotating through `referees` across the
/// fixtures in generation order, so load stays balanced. Deterministic for a
/// given input ordering.
pub fn schedule(players: &[String], referees: &[String]) -> Result<FixtureList> {
    ensure!(players.len() >= 2, "a tournament needs at least two players");
    ensure!(!referees.is_empty(), "a tournament needs at least one referee");

    // Circle method: pad to even, fix slot 0, rotate the rest each round.
    let mut slots: Vec<Option<&String>> = players.iter().map(Some).collect();
    if slots.len() % 2 != 0 {
        slots.push(None);
    }
    let rounds_total = slots.len() - 1;
    let half = slots.len() / 2;

    let mut rounds = Vec::with_capacity(rounds_total);
    let mut referee_cursor = 0usize;
    for round in 0..rounds_total {
        let mut fixtures = Vec::with_capacity(half);
        for i in 0..half {
            let (a, b) = (slots[i], slots[slots.len() - 1 - i]);
            let (Some(a), Some(b)) = (a, b) else {
                continue; // bye
            };
            let referee = &referees[referee_cursor % referees.len()];
            referee_cursor += 1;
            fixtures.push(Fixture {
                id: format!("R{}M{}", round + 1, fixtures.len() + 1),
                round: round as u32 + 1,
                player_a: a.clone(),
                player_b: b.clone(),
                referee: referee.clone(),
            });
        }
        trace!(round = round + 1, fixtures = fixtures.len(), "round generated");
        rounds.push(fixtures);
        slots[1..].rotate_right(1);
    }

    Ok(FixtureList { rounds })
}
