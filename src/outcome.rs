//! The parity-guessing decision rule and its random draw.
//!
//! The draw comes from the operating system's entropy source rather than a
//! seedable generator, so a participant cannot predict upcoming draws.
//! [`resolve`] is a pure function over the two submitted choices and the
//! drawn number, which lets tests walk the whole decision table without
//! touching the generator.

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inclusive range the referee draws from.
pub const DRAW_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// A participant's stated guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Parity {
    /// Guessing the draw will be even.
    Even,
    /// Guessing the draw will be odd.
    Odd,
}

impl Parity {
    /// The parity of a drawn number.
    pub fn of(n: u8) -> Parity {
        if n % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }
}

/// Final result of a match, from participant A's and B's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Participant A guessed the drawn parity, B did not.
    WinA,
    /// Participant B guessed the drawn parity, A did not.
    WinB,
    /// Both guessed it, or neither did.
    Draw,
    /// A failed to respond in time; B wins by technical default.
    TechnicalLossA,
    /// B failed to respond in time; A wins by technical default.
    TechnicalLossB,
    /// Both participants failed the same step; both score a loss.
    DoubleForfeit,
}

/// Draws a number uniformly from [`DRAW_RANGE`].
pub fn draw() -> u8 {
    OsRng.gen_range(DRAW_RANGE)
}

/// Applies the parity rule: whoever matches the draw's parity wins, and if
/// both or neither match, the match is a draw.
pub fn resolve(choice_a: Parity, choice_b: Parity, drawn: u8) -> Outcome {
    let parity = Parity::of(drawn);
    match (choice_a == parity, choice_b == parity) {
        (true, true) | (false, false) => Outcome::Draw,
        (true, false) => Outcome::WinA,
        (false, true) => Outcome::WinB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table_is_exhaustive() {
        // All 10 draws x 4 choice combinations.
        for drawn in DRAW_RANGE {
            for choice_a in [Parity::Even, Parity::Odd] {
                for choice_b in [Parity::Even, Parity::Odd] {
                    let outcome = resolve(choice_a, choice_b, drawn);
                    let parity = Parity::of(drawn);
                    let expected = if choice_a == choice_b {
                        Outcome::Draw
                    } else if choice_a == parity {
                        Outcome::WinA
                    } else {
                        Outcome::WinB
                    };
                    assert_eq!(outcome, expected, "draw={drawn} a={choice_a:?} b={choice_b:?}");
                }
            }
        }
    }

    #[test]
    fn draw_stays_in_range() {
        for _ in 0..1000 {
            assert!(DRAW_RANGE.contains(&draw()));
        }
    }

    #[test]
    fn parity_of_draws() {
        assert_eq!(Parity::of(2), Parity::Even);
        assert_eq!(Parity::of(7), Parity::Odd);
    }
}
