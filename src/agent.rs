//! Agent identities: roles, the `"{role}:{id}"` sender convention, and the
//! registration record the coordinator keeps per agent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The role an agent plays in the tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The single agent owning registration and standings.
    Coordinator,
    /// Runs matches between pairs of players.
    Referee,
    /// Participates in matches.
    Player,
}

impl Role {
    pub(crate) fn identity_prefix(&self) -> &'static str {
        match self {
            Role::Coordinator => "C",
            Role::Referee => "R",
            Role::Player => "P",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Coordinator => "coordinator",
            Role::Referee => "referee",
            Role::Player => "player",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a sender string does not match `{role}:{id}`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed sender {0:?}")]
pub struct SenderParseError(pub String);

impl FromStr for Role {
    type Err = SenderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coordinator" => Ok(Role::Coordinator),
            "referee" => Ok(Role::Referee),
            "player" => Ok(Role::Player),
            other => Err(SenderParseError(other.to_owned())),
        }
    }
}

/// Formats a wire-level sender field, `"{role}:{id}"`.
pub fn format_sender(role: Role, id: &str) -> String {
    format!("{role}:{id}")
}

/// Parses a wire-level sender field back into its role and identity.
///
/// The identity part must be non-empty and consist of alphanumeric
/// characters, `-` or `_`.
pub fn parse_sender(sender: &str) -> Result<(Role, &str), SenderParseError> {
    let (role, id) = sender
        .split_once(':')
        .ok_or_else(|| SenderParseError(sender.to_owned()))?;
    let role = Role::from_str(role).map_err(|_| SenderParseError(sender.to_owned()))?;
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SenderParseError(sender.to_owned()));
    }
    Ok((role, id))
}

/// One registered referee or player.
///
/// Created on first successful registration and immutable afterwards,
/// except for the `active` flag. Owned exclusively by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Assigned identity, e.g. `P01`.
    pub identity: String,
    /// Role declared at registration time.
    pub role: Role,
    /// Game types this agent claims to support.
    pub game_types: Vec<String>,
    /// Callback address other agents use to reach this one.
    pub endpoint: String,
    /// Bearer token issued at registration.
    pub token: String,
    /// Cleared when the session ends.
    pub active: bool,
}
