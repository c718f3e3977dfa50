use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parity_tournament::agent::format_sender;
use parity_tournament::match_runner::MatchState;
use parity_tournament::protocol::{Envelope, ErrorCode, Message, RpcResponse, GAME_TYPE};
use parity_tournament::transport::Dispatch;
use parity_tournament::prelude::*;

fn init_test_logger() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_target(false);
    let _ = tracing_subscriber::fmt()
        .event_format(format)
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn fast_config() -> Configuration {
    Configuration::new()
        .with_invite_timeout(Duration::from_millis(200))
        .with_choice_timeout(Duration::from_millis(400))
        .with_notify_timeout(Duration::from_millis(200))
        .with_report_timeout(Duration::from_millis(200))
        .with_max_retries(1)
        .with_backoff_base(Duration::from_millis(10))
        .with_backoff_cap(Duration::from_millis(40))
}

async fn coordinator_with_players(
    config: Configuration,
    names: &[&str],
) -> (Arc<LocalTransport>, Coordinator) {
    let transport = LocalTransport::new();
    let coordinator = Coordinator::new(config, transport.clone(), "coordinator.local").unwrap();
    transport
        .bind("coordinator.local", coordinator.dispatch())
        .await;

    let client = coordinator.client();
    for name in names {
        let endpoint = format!("{name}.local");
        let player = Player::new(*name, endpoint.clone(), RandomChoice);
        transport.bind(endpoint, player.clone()).await;
        player
            .join(&client, "coordinator.local", Duration::from_millis(200))
            .await
            .unwrap();
    }
    (transport, coordinator)
}

fn expected_points(outcome: Outcome) -> u32 {
    match outcome {
        Outcome::WinA | Outcome::WinB | Outcome::TechnicalLossA | Outcome::TechnicalLossB => 3,
        Outcome::Draw => 2,
        Outcome::DoubleForfeit => 0,
    }
}

#[tokio::test(start_paused = true)]
async fn four_players_two_referees_end_to_end() {
    if std::env::var("TEST_LOG").is_ok() {
        init_test_logger();
    }

    let (_transport, mut coordinator) =
        coordinator_with_players(fast_config(), &["alice", "bob", "carol", "dave"]).await;
    let summary = coordinator.run(2).await.unwrap();

    // 4 players -> 6 matches over 3 rounds.
    assert_eq!(summary.rounds, 3);
    assert_eq!(summary.matches.len(), 6);
    assert_eq!(summary.standings.len(), 4);

    for record in &summary.matches {
        assert_eq!(record.state, MatchState::Done);
        assert!(!record.needs_reconciliation);
        assert!(record.drawn.is_some(), "{} never resolved", record.fixture.id);
        assert!(record.outcome.is_some());
    }

    let mut total_points = 0;
    for identity in ["P01", "P02", "P03", "P04"] {
        let entry = summary.standings.entry(identity).unwrap();
        assert_eq!(entry.played, 3, "{identity} played a wrong number of matches");
        assert_eq!(entry.won + entry.drawn + entry.lost, 3);
        total_points += entry.points;
    }
    let expected: u32 = summary
        .matches
        .iter()
        .map(|m| expected_points(m.outcome.unwrap()))
        .sum();
    assert_eq!(total_points, expected);

    // The champion is the top-ranked identity.
    let ranked = summary.standings.ranked();
    assert_eq!(summary.champion.as_deref(), Some(ranked[0].0.as_str()));
}

/// A participant that acknowledges nothing, ever.
struct SilentAgent;

#[async_trait]
impl Dispatch for SilentAgent {
    async fn dispatch(&self, _envelope: Envelope) -> RpcResponse {
        futures::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn unresponsive_player_loses_technically_without_a_draw() {
    let transport = LocalTransport::new();
    let mut coordinator =
        Coordinator::new(fast_config(), transport.clone(), "coordinator.local").unwrap();
    transport
        .bind("coordinator.local", coordinator.dispatch())
        .await;
    let client = coordinator.client();

    let alice = Player::new("alice", "alice.local", FixedChoice(Parity::Even));
    transport.bind("alice.local", alice.clone()).await;
    alice
        .join(&client, "coordinator.local", Duration::from_millis(200))
        .await
        .unwrap();

    // Registers like a well-behaved player, then never answers anything.
    let mute = Player::new("mute", "mute.local", RandomChoice);
    transport.bind("mute.local", Arc::new(SilentAgent)).await;
    mute.join(&client, "coordinator.local", Duration::from_millis(200))
        .await
        .unwrap();

    let summary = coordinator.run(1).await.unwrap();
    assert_eq!(summary.matches.len(), 1);
    let record = &summary.matches[0];

    // P02 timed out in AWAITING_JOIN: technical loss, never resolved.
    assert_eq!(record.outcome, Some(Outcome::TechnicalLossB));
    assert_eq!(record.cause, Some(ErrorCode::Timeout));
    assert!(record.drawn.is_none(), "a technical loss must never reach resolving");
    assert!(record
        .transcript
        .iter()
        .all(|t| !matches!(t.envelope.message, Message::ChoiceRequest { .. })));

    let winner = summary.standings.entry("P01").unwrap();
    let loser = summary.standings.entry("P02").unwrap();
    assert_eq!((winner.won, winner.points), (1, 3));
    assert_eq!((loser.lost, loser.points), (1, 0));
    assert_eq!(summary.champion.as_deref(), Some("P01"));
}

#[tokio::test(start_paused = true)]
async fn unreachable_player_does_not_block_the_tournament() {
    let transport = LocalTransport::new();
    let mut coordinator =
        Coordinator::new(fast_config(), transport.clone(), "coordinator.local").unwrap();
    transport
        .bind("coordinator.local", coordinator.dispatch())
        .await;
    let client = coordinator.client();

    for name in ["alice", "bob"] {
        let endpoint = format!("{name}.local");
        let player = Player::new(name, endpoint.clone(), RandomChoice);
        transport.bind(endpoint, player.clone()).await;
        player
            .join(&client, "coordinator.local", Duration::from_millis(200))
            .await
            .unwrap();
    }
    // Registers normally, then its endpoint goes away: every later call is
    // refused.
    let ghost = Player::new("ghost", "ghost.local", RandomChoice);
    transport.bind("ghost.local", ghost.clone()).await;
    ghost
        .join(&client, "coordinator.local", Duration::from_millis(200))
        .await
        .unwrap();
    transport.unbind("ghost.local").await;

    let summary = coordinator.run(1).await.unwrap();

    // 3 players -> 3 matches over 3 rounds (one bye each round); broadcasts
    // to the ghost fail without stalling anyone.
    assert_eq!(summary.rounds, 3);
    assert_eq!(summary.matches.len(), 3);
    let ghost_entry = summary.standings.entry("P03").unwrap();
    assert_eq!(ghost_entry.played, 2);
    assert_eq!(ghost_entry.lost, 2);
    assert_ne!(summary.champion.as_deref(), Some("P03"));

    for record in summary
        .matches
        .iter()
        .filter(|m| m.fixture.player_a == "P03" || m.fixture.player_b == "P03")
    {
        assert_eq!(record.cause, Some(ErrorCode::ConnectionRefused));
    }
}

#[tokio::test]
async fn http_invitation_round_trip() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let player = Player::new("remote", addr.clone(), FixedChoice(Parity::Odd));
    tokio::spawn(parity_tournament::http::serve(listener, player));

    let client = RpcClient::new(
        HttpTransport::new(),
        RetryPolicy {
            max_retries: 1,
            backoff_base: Duration::from_millis(20),
            backoff_cap: Duration::from_millis(100),
        },
    );
    let invite = Envelope::request(
        format_sender(Role::Referee, "R01"),
        Some("tok".to_owned()),
        Message::MatchInvite {
            match_id: "R1M1".into(),
            opponent: "P02".into(),
            game_type: GAME_TYPE.into(),
        },
    );
    let reply = client
        .call(&addr, &invite, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply.conversation_id, invite.conversation_id);
    assert_eq!(
        reply.message,
        Message::JoinAck {
            match_id: "R1M1".into()
        }
    );
}

#[tokio::test]
async fn registration_over_http() {
    let transport = LocalTransport::new();
    let coordinator =
        Coordinator::new(fast_config(), transport.clone(), "coordinator.local").unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(parity_tournament::http::serve(listener, coordinator.dispatch()));

    let client = RpcClient::new(HttpTransport::new(), RetryPolicy::default());
    let player = Player::new("far-away", "203.0.113.7:9000", RandomChoice);
    let identity = player
        .join(&client, &addr, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(identity, "P01");

    // The same endpoint registering twice is a duplicate.
    let twin = Player::new("far-away-twin", "203.0.113.7:9000", RandomChoice);
    let error = twin.join(&client, &addr, Duration::from_secs(5)).await;
    assert!(error.is_err());
}
