//! Wire protocol: the message envelope, its validator, and the closed error
//! code taxonomy.
//!
//! Every RPC call and response is one [`Envelope`], a JSON object carrying
//! protocol metadata plus an adjacently tagged payload. Validation is staged
//! and pure: it inspects the raw JSON first so each rejection maps to a
//! precise [`ErrorCode`], then deserializes into the typed envelope. It never
//! performs I/O. Responses travel as an [`RpcResponse`] holding either a
//! `result` envelope or an `error` object with a numeric code and a domain
//! error code string.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::{OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

use crate::agent::{parse_sender, Role};
use crate::outcome::{Outcome, Parity};

/// Fixed protocol version literal; envelopes with any other value are rejected.
pub const PROTOCOL_VERSION: &str = "1.0";

/// The one game type this coordinator accepts at registration.
pub const GAME_TYPE: &str = "parity_guess";

/// Well-known HTTP path agents expose their RPC endpoint on.
pub const RPC_PATH: &str = "/rpc";

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// Current UTC time in the fixed envelope format.
pub fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&TIMESTAMP_FORMAT)
        .expect("fixed format")
}

/// Closed enumeration of every message exchanged between agents.
///
/// Unknown `message_type` strings are a validator rejection, never a runtime
/// lookup failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Initial call from an unregistered agent. The only call that may omit
    /// `auth_token`.
    Register {
        /// Declared role, `referee` or `player`.
        role: Role,
        /// Callback address; also the duplicate-detection key.
        endpoint: String,
        /// Supported game types.
        game_types: Vec<String>,
    },
    /// Registration response carrying the assigned identity and session token.
    Welcome {
        /// Assigned identity, e.g. `P01`.
        identity: String,
        /// Bearer token for all subsequent calls.
        token: String,
    },
    /// Coordinator notification that a round is starting.
    RoundStart {
        /// 1-based round number.
        round: u32,
    },
    /// Referee invitation to take part in a match.
    MatchInvite {
        /// Match this invitation belongs to.
        match_id: String,
        /// The opposing participant's identity.
        opponent: String,
        /// Game type played in this match.
        game_type: String,
    },
    /// Participant acknowledgment of an invitation.
    JoinAck {
        /// Match being acknowledged.
        match_id: String,
    },
    /// Referee request for the participant's parity guess.
    ChoiceRequest {
        /// Match the choice is for.
        match_id: String,
    },
    /// Participant response carrying the guess.
    ChoiceReply {
        /// Match the choice is for.
        match_id: String,
        /// The guess itself.
        choice: Parity,
    },
    /// Best-effort referee notification of the final outcome.
    MatchOutcome {
        /// Finished match.
        match_id: String,
        /// Final outcome.
        outcome: Outcome,
        /// The drawn number, absent on technical outcomes.
        drawn: Option<u8>,
        /// Error code that caused a technical outcome.
        cause: Option<ErrorCode>,
    },
    /// Referee report of a finished match to the coordinator.
    ResultReport(MatchReport),
    /// Coordinator acknowledgment of a result report.
    ReportAck {
        /// Match whose report was accepted.
        match_id: String,
    },
    /// Coordinator broadcast once the last round completed.
    TournamentEnd {
        /// Identity of the winner.
        champion: String,
    },
    /// Generic acknowledgment of a notification.
    Ack,
}

/// Message type strings the validator accepts.
pub const KNOWN_MESSAGE_TYPES: &[&str] = &[
    "REGISTER",
    "WELCOME",
    "ROUND_START",
    "MATCH_INVITE",
    "JOIN_ACK",
    "CHOICE_REQUEST",
    "CHOICE_REPLY",
    "MATCH_OUTCOME",
    "RESULT_REPORT",
    "REPORT_ACK",
    "TOURNAMENT_END",
    "ACK",
];

impl Message {
    /// Whether this message initiates an exchange (as opposed to answering one).
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::Register { .. }
                | Message::RoundStart { .. }
                | Message::MatchInvite { .. }
                | Message::ChoiceRequest { .. }
                | Message::MatchOutcome { .. }
                | Message::ResultReport(_)
                | Message::TournamentEnd { .. }
        )
    }

    /// Every call except the initial registration must carry a token.
    pub fn requires_auth(&self) -> bool {
        self.is_request() && !matches!(self, Message::Register { .. })
    }

    /// Wire name of this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Register { .. } => "REGISTER",
            Message::Welcome { .. } => "WELCOME",
            Message::RoundStart { .. } => "ROUND_START",
            Message::MatchInvite { .. } => "MATCH_INVITE",
            Message::JoinAck { .. } => "JOIN_ACK",
            Message::ChoiceRequest { .. } => "CHOICE_REQUEST",
            Message::ChoiceReply { .. } => "CHOICE_REPLY",
            Message::MatchOutcome { .. } => "MATCH_OUTCOME",
            Message::ResultReport(_) => "RESULT_REPORT",
            Message::ReportAck { .. } => "REPORT_ACK",
            Message::TournamentEnd { .. } => "TOURNAMENT_END",
            Message::Ack => "ACK",
        }
    }
}

/// Payload of a [`Message::ResultReport`], also the aggregator's work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    /// Match id, `R{round}M{index}`.
    pub match_id: String,
    /// First participant.
    pub player_a: String,
    /// Second participant.
    pub player_b: String,
    /// Final outcome.
    pub outcome: Outcome,
    /// Drawn number, absent on technical outcomes.
    pub drawn: Option<u8>,
    /// Error code behind a technical outcome.
    pub cause: Option<ErrorCode>,
}

/// The structured wrapper around every call and response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Must equal [`PROTOCOL_VERSION`].
    pub protocol_version: String,
    /// `"{role}:{id}"` of the sending agent.
    pub sender: String,
    /// UTC timestamp, `YYYY-MM-DDTHH:MM:SSZ`.
    pub timestamp: String,
    /// Correlation key tying together all envelopes of one logical exchange.
    pub conversation_id: Uuid,
    /// Bearer token; required on all calls except `REGISTER`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// The message itself.
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Builds a fresh outbound call with a new conversation id.
    pub fn request(sender: impl Into<String>, auth_token: Option<String>, message: Message) -> Envelope {
        Envelope {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            sender: sender.into(),
            timestamp: now_timestamp(),
            conversation_id: Uuid::new_v4(),
            auth_token,
            message,
        }
    }

    /// Builds a response reusing the request's conversation id, so retries
    /// correlate without creating duplicate side effects.
    pub fn reply_to(request: &Envelope, sender: impl Into<String>, message: Message) -> Envelope {
        Envelope {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            sender: sender.into(),
            timestamp: now_timestamp(),
            conversation_id: request.conversation_id,
            auth_token: None,
            message,
        }
    }
}

/// Why the validator rejected a raw message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Body was not a JSON object.
    #[error("not a JSON object: {0}")]
    Syntax(String),
    /// A mandatory envelope field is absent.
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),
    /// `protocol_version` did not match the fixed literal.
    #[error("protocol version {0:?}, expected {PROTOCOL_VERSION:?}")]
    VersionMismatch(String),
    /// `sender` does not match `{role}:{id}`.
    #[error("malformed sender {0:?}")]
    MalformedSender(String),
    /// `timestamp` is not in the fixed UTC format.
    #[error("malformed timestamp {0:?}")]
    MalformedTimestamp(String),
    /// `message_type` is not part of the closed enumeration.
    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),
    /// A requires-auth call arrived without `auth_token`.
    #[error("{0} requires an auth token")]
    MissingAuthToken(&'static str),
    /// Envelope shape was fine but the payload did not deserialize.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl ValidationError {
    /// Maps the rejection to its wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::Syntax(_) | ValidationError::MissingField(_) => ErrorCode::MalformedEnvelope,
            ValidationError::VersionMismatch(_) => ErrorCode::VersionMismatch,
            ValidationError::MalformedSender(_) => ErrorCode::MalformedSender,
            ValidationError::MalformedTimestamp(_) => ErrorCode::MalformedTimestamp,
            ValidationError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            ValidationError::MissingAuthToken(_) => ErrorCode::MissingToken,
            ValidationError::InvalidPayload(_) => ErrorCode::InvalidParams,
        }
    }
}

/// Checks an already-typed envelope against the envelope invariants.
pub fn check_envelope(envelope: &Envelope) -> Result<(), ValidationError> {
    if envelope.protocol_version != PROTOCOL_VERSION {
        return Err(ValidationError::VersionMismatch(envelope.protocol_version.clone()));
    }
    parse_sender(&envelope.sender)
        .map_err(|_| ValidationError::MalformedSender(envelope.sender.clone()))?;
    PrimitiveDateTime::parse(&envelope.timestamp, &TIMESTAMP_FORMAT)
        .map_err(|_| ValidationError::MalformedTimestamp(envelope.timestamp.clone()))?;
    if envelope.message.requires_auth() && envelope.auth_token.is_none() {
        return Err(ValidationError::MissingAuthToken(envelope.message.type_name()));
    }
    Ok(())
}

/// Validates a raw JSON body into an [`Envelope`].
///
/// Staged so that every rejection carries the most specific error: JSON
/// shape, mandatory fields, protocol literal, sender pattern, timestamp
/// format, known message type, payload shape, auth presence.
pub fn validate(raw: &str) -> Result<Envelope, ValidationError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ValidationError::Syntax(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| ValidationError::Syntax("top-level value is not an object".to_owned()))?;

    for field in ["protocol_version", "sender", "timestamp", "conversation_id", "message_type"] {
        match object.get(field) {
            Some(serde_json::Value::String(_)) => {}
            _ => return Err(ValidationError::MissingField(field)),
        }
    }

    let message_type = object["message_type"].as_str().unwrap_or_default();
    if !KNOWN_MESSAGE_TYPES.contains(&message_type) {
        return Err(ValidationError::UnknownMessageType(message_type.to_owned()));
    }
    if Uuid::parse_str(object["conversation_id"].as_str().unwrap_or_default()).is_err() {
        return Err(ValidationError::MissingField("conversation_id"));
    }

    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|e| ValidationError::InvalidPayload(e.to_string()))?;
    check_envelope(&envelope)?;
    Ok(envelope)
}

/// Closed enumeration of wire error codes.
///
/// Retryable codes are transient transport conditions; everything else must
/// not be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Peer did not answer within the deadline.
    Timeout,
    /// Peer endpoint could not be reached.
    ConnectionRefused,
    /// Peer reachable but unable to serve (5xx-equivalent).
    Unavailable,
    /// Envelope was missing fields or not a JSON object.
    MalformedEnvelope,
    /// Sender did not match `{role}:{id}`.
    MalformedSender,
    /// Timestamp not in the fixed UTC format.
    MalformedTimestamp,
    /// `message_type` outside the closed enumeration.
    UnknownMessageType,
    /// `protocol_version` mismatch.
    VersionMismatch,
    /// Payload failed validation.
    InvalidParams,
    /// Recipient does not serve this message type.
    UnknownMethod,
    /// A requires-auth call without a token.
    MissingToken,
    /// Token did not match the one issued at registration.
    InvalidToken,
    /// Envelope sender does not match the authenticated identity.
    SenderMismatch,
    /// Caller identity is not registered or no longer active.
    NotRegistered,
    /// Second registration from the same endpoint.
    DuplicateRegistration,
    /// None of the declared game types is supported.
    UnsupportedGameType,
    /// Referenced match id is unknown to the recipient.
    UnknownMatch,
    /// Result report was rejected by the coordinator.
    ReportRejected,
}

impl ErrorCode {
    /// Numeric wire code; transport 1xxx, protocol 2xxx, auth 3xxx, domain 4xxx.
    pub fn numeric(&self) -> u16 {
        match self {
            ErrorCode::Timeout => 1001,
            ErrorCode::ConnectionRefused => 1002,
            ErrorCode::Unavailable => 1003,
            ErrorCode::MalformedEnvelope => 2001,
            ErrorCode::MalformedSender => 2002,
            ErrorCode::MalformedTimestamp => 2003,
            ErrorCode::UnknownMessageType => 2004,
            ErrorCode::VersionMismatch => 2005,
            ErrorCode::InvalidParams => 2006,
            ErrorCode::UnknownMethod => 2007,
            ErrorCode::MissingToken => 3001,
            ErrorCode::InvalidToken => 3002,
            ErrorCode::SenderMismatch => 3003,
            ErrorCode::NotRegistered => 3004,
            ErrorCode::DuplicateRegistration => 4001,
            ErrorCode::UnsupportedGameType => 4002,
            ErrorCode::UnknownMatch => 4003,
            ErrorCode::ReportRejected => 4004,
        }
    }

    /// Whether a caller may retry after receiving this code.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout | ErrorCode::ConnectionRefused | ErrorCode::Unavailable
        )
    }
}

/// JSON-RPC-style response object: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Response envelope on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Envelope>,
    /// Error object on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// The `error` member of an [`RpcResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Numeric code, see [`ErrorCode::numeric`].
    pub code: u16,
    /// Domain error code string.
    pub error_code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl RpcResponse {
    /// Successful response wrapping an envelope.
    pub fn ok(envelope: Envelope) -> RpcResponse {
        RpcResponse {
            result: Some(envelope),
            error: None,
        }
    }

    /// Error response for the given code.
    pub fn fail(code: ErrorCode, message: impl Into<String>) -> RpcResponse {
        RpcResponse {
            result: None,
            error: Some(RpcErrorBody {
                code: code.numeric(),
                error_code: code,
                message: message.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::format_sender;

    fn sample() -> Envelope {
        Envelope::request(
            format_sender(Role::Player, "P01"),
            Some("tok".into()),
            Message::JoinAck {
                match_id: "R1M1".into(),
            },
        )
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = sample();
        let raw = serde_json::to_string(&envelope).unwrap();
        let back = validate(&raw).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn adjacent_tagging_on_the_wire() {
        let raw = serde_json::to_value(sample()).unwrap();
        assert_eq!(raw["message_type"], "JOIN_ACK");
        assert_eq!(raw["payload"]["match_id"], "R1M1");
        assert_eq!(raw["protocol_version"], PROTOCOL_VERSION);
    }

    #[test]
    fn rejects_version_mismatch() {
        let mut envelope = sample();
        envelope.protocol_version = "0.9".into();
        let raw = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            validate(&raw),
            Err(ValidationError::VersionMismatch("0.9".into()))
        );
    }

    #[test]
    fn rejects_malformed_sender() {
        let mut envelope = sample();
        envelope.sender = "overlord:X".into();
        let raw = serde_json::to_string(&envelope).unwrap();
        assert!(matches!(
            validate(&raw),
            Err(ValidationError::MalformedSender(_))
        ));
    }

    #[test]
    fn rejects_malformed_timestamp() {
        let mut envelope = sample();
        envelope.timestamp = "yesterday".into();
        let raw = serde_json::to_string(&envelope).unwrap();
        assert!(matches!(
            validate(&raw),
            Err(ValidationError::MalformedTimestamp(_))
        ));
    }

    #[test]
    fn rejects_unknown_message_type() {
        let mut raw = serde_json::to_value(sample()).unwrap();
        raw["message_type"] = "SELF_DESTRUCT".into();
        let raw = serde_json::to_string(&raw).unwrap();
        assert_eq!(
            validate(&raw),
            Err(ValidationError::UnknownMessageType("SELF_DESTRUCT".into()))
        );
    }

    #[test]
    fn rejects_missing_token_on_authed_call() {
        let mut envelope = sample();
        envelope.message = Message::ResultReport(MatchReport {
            match_id: "R1M1".into(),
            player_a: "P01".into(),
            player_b: "P02".into(),
            outcome: Outcome::Draw,
            drawn: Some(4),
            cause: None,
        });
        envelope.auth_token = None;
        let raw = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            validate(&raw),
            Err(ValidationError::MissingAuthToken("RESULT_REPORT"))
        );
        assert_eq!(
            ValidationError::MissingAuthToken("RESULT_REPORT").code(),
            ErrorCode::MissingToken
        );
    }

    #[test]
    fn register_requires_no_token() {
        let envelope = Envelope::request(
            format_sender(Role::Player, "newcomer"),
            None,
            Message::Register {
                role: Role::Player,
                endpoint: "player-1.local:9000".into(),
                game_types: vec![GAME_TYPE.into()],
            },
        );
        let raw = serde_json::to_string(&envelope).unwrap();
        assert!(validate(&raw).is_ok());
    }

    #[test]
    fn rejects_missing_fields() {
        assert_eq!(
            validate("{}"),
            Err(ValidationError::MissingField("protocol_version"))
        );
        assert!(matches!(validate("[1,2]"), Err(ValidationError::Syntax(_))));
        assert!(matches!(validate("not json"), Err(ValidationError::Syntax(_))));
    }

    #[test]
    fn error_codes_classify_retryability() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::ConnectionRefused.is_retryable());
        assert!(ErrorCode::Unavailable.is_retryable());
        for code in [
            ErrorCode::MalformedEnvelope,
            ErrorCode::MissingToken,
            ErrorCode::DuplicateRegistration,
            ErrorCode::UnknownMethod,
        ] {
            assert!(!code.is_retryable(), "{code:?} must not be retried");
        }
    }

    #[test]
    fn replies_keep_the_conversation_id() {
        let request = sample();
        let reply = Envelope::reply_to(&request, format_sender(Role::Referee, "R01"), Message::Ack);
        assert_eq!(reply.conversation_id, request.conversation_id);
    }
}
