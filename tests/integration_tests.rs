// End-to-end tests: drafts driven through the supervisor's event channels,
// plus the WebSocket layer over a real loopback listener.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use draft_server::draft::{ClientConn, ConnId, DraftEvent, DraftSupervisor, Player, TeamId};
use draft_server::messages::SocketMessage;
use draft_server::server;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn player(id: i64, positions: &[&str]) -> Player {
    Player {
        id,
        firstname: format!("First{id}"),
        lastname: format!("Last{id}"),
        mlbteam: "Test Club".into(),
        positions: positions.iter().map(|s| s.to_string()).collect(),
    }
}

async fn connect(
    supervisor: &Arc<DraftSupervisor>,
    draft_id: i64,
    user: &str,
) -> (
    mpsc::Sender<DraftEvent>,
    mpsc::Receiver<SocketMessage>,
    ConnId,
) {
    let (outbox, rx) = mpsc::channel(64);
    let conn = ClientConn {
        id: ConnId::next(),
        user: user.into(),
        outbox,
    };
    let conn_id = conn.id;
    let events = supervisor
        .register(draft_id, conn)
        .await
        .expect("registration should succeed");
    (events, rx, conn_id)
}

async fn send(
    events: &mpsc::Sender<DraftEvent>,
    user: &str,
    conn_id: ConnId,
    message: SocketMessage,
) {
    events
        .send(DraftEvent::Inbound {
            user: user.into(),
            conn_id,
            message,
        })
        .await
        .expect("coordinator should be running");
}

async fn recv_matching<F>(rx: &mut mpsc::Receiver<SocketMessage>, mut pred: F) -> SocketMessage
where
    F: FnMut(&SocketMessage) -> bool,
{
    loop {
        let msg = rx.recv().await.expect("channel closed while waiting");
        if pred(&msg) {
            return msg;
        }
    }
}

async fn wait_for_pick_turn(rx: &mut mpsc::Receiver<SocketMessage>) -> TeamId {
    match recv_matching(rx, |m| matches!(m, SocketMessage::WaitingForPick { .. })).await {
        SocketMessage::WaitingForPick { team } => team,
        _ => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// Draft flow through the supervisor
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn two_team_draft_runs_to_completion() {
    let supervisor = DraftSupervisor::new(fixtures_dir());
    let (events, mut alice, alice_conn) = connect(&supervisor, 2, "alice").await;
    let (_, mut bob, bob_conn) = connect(&supervisor, 2, "bob").await;

    // Both connected: the first nomination goes to team 1.
    assert_eq!(wait_for_pick_turn(&mut alice).await, TeamId(1));
    wait_for_pick_turn(&mut bob).await;

    // Auction 1: alice nominates a catcher, bob outbids and wins.
    let catcher = player(101, &["C"]);
    send(
        &events,
        "alice",
        alice_conn,
        SocketMessage::Pick {
            player: catcher.clone(),
            bid: 100,
        },
    )
    .await;
    recv_matching(&mut bob, |m| matches!(m, SocketMessage::Auction { .. })).await;
    send(
        &events,
        "bob",
        bob_conn,
        SocketMessage::Bid {
            player: catcher,
            bid: 110,
        },
    )
    .await;
    match recv_matching(&mut alice, |m| matches!(m, SocketMessage::AuctionComplete(_))).await {
        SocketMessage::AuctionComplete(done) => {
            assert_eq!(done.winning_team, TeamId(2));
            assert_eq!(done.offering_team, TeamId(1));
            assert_eq!(done.player.salary, 110);
        }
        _ => unreachable!(),
    }

    // Auction 2: bob's turn, uncontested outfielder fills his roster.
    assert_eq!(wait_for_pick_turn(&mut alice).await, TeamId(2));
    send(
        &events,
        "bob",
        bob_conn,
        SocketMessage::Pick {
            player: player(102, &["OF"]),
            bid: 100,
        },
    )
    .await;
    recv_matching(&mut alice, |m| matches!(m, SocketMessage::AuctionComplete(_))).await;

    // Team 2 is full, so the nomination comes back to team 1 twice in a row.
    for id in [103, 104] {
        assert_eq!(wait_for_pick_turn(&mut alice).await, TeamId(1));
        let positions: &[&str] = if id == 103 { &["C"] } else { &["OF"] };
        send(
            &events,
            "alice",
            alice_conn,
            SocketMessage::Pick {
                player: player(id, positions),
                bid: 100,
            },
        )
        .await;
        recv_matching(&mut alice, |m| matches!(m, SocketMessage::AuctionComplete(_))).await;
    }

    // Every roster is full.
    recv_matching(&mut alice, |m| matches!(m, SocketMessage::DraftComplete {})).await;
    recv_matching(&mut bob, |m| matches!(m, SocketMessage::DraftComplete {})).await;
}

#[tokio::test(start_paused = true)]
async fn fresh_state_after_all_connections_drop() {
    let supervisor = DraftSupervisor::new(fixtures_dir());
    let (events, mut alice, alice_conn) = connect(&supervisor, 2, "alice").await;
    let (_, mut bob, bob_conn) = connect(&supervisor, 2, "bob").await;
    wait_for_pick_turn(&mut alice).await;
    wait_for_pick_turn(&mut bob).await;

    // Complete one auction so there is state to lose.
    send(
        &events,
        "alice",
        alice_conn,
        SocketMessage::Pick {
            player: player(101, &["C"]),
            bid: 100,
        },
    )
    .await;
    recv_matching(&mut alice, |m| matches!(m, SocketMessage::AuctionComplete(_))).await;

    // Everyone leaves; the coordinator exits.
    events
        .send(DraftEvent::Disconnect {
            user: "alice".into(),
            conn_id: alice_conn,
        })
        .await
        .unwrap();
    events
        .send(DraftEvent::Disconnect {
            user: "bob".into(),
            conn_id: bob_conn,
        })
        .await
        .unwrap();
    events.closed().await;

    // Reconnecting gets a coordinator rebuilt from the definition file,
    // without the finished auction.
    let (_, mut alice, _) = connect(&supervisor, 2, "alice").await;
    match recv_matching(&mut alice, |m| matches!(m, SocketMessage::DraftSummary(_))).await {
        SocketMessage::DraftSummary(summary) => {
            assert!(summary.picks.is_empty());
            assert!(summary.teams.iter().all(|t| t.players.is_empty()));
        }
        _ => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// WebSocket layer over loopback
// ---------------------------------------------------------------------------

async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let supervisor = DraftSupervisor::new(fixtures_dir());
    tokio::spawn(server::run(listener, supervisor));
    addr.to_string()
}

#[tokio::test]
async fn websocket_client_gets_summary_and_time_response() {
    let addr = spawn_server().await;

    let mut request = format!("ws://{addr}/ws/2").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-draft-user", "alice".parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let first = ws.next().await.unwrap().unwrap();
    let value: serde_json::Value = match &first {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    };
    assert_eq!(value["type"], "DraftSummary");
    assert_eq!(value["data"]["team"], 1);
    assert_eq!(value["data"]["name"], "Integration Draft");

    ws.send(Message::Text(
        r#"{"type":"TimeRequest","data":{}}"#.into(),
    ))
    .await
    .unwrap();
    loop {
        let value: serde_json::Value = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        };
        if value["type"] == "TimeResponse" {
            assert!(value["data"]["time"].is_string());
            break;
        }
    }
}

#[tokio::test]
async fn reply_queued_before_close_is_still_delivered() {
    let addr = spawn_server().await;

    let mut request = format!("ws://{addr}/ws/2").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-draft-user", "alice".parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    // A nomination before the draft starts draws a rejection; closing right
    // behind it must not lose the reply.
    let pick = serde_json::json!({
        "type": "Pick",
        "data": {
            "player": {
                "id": 101,
                "firstname": "First101",
                "lastname": "Last101",
                "mlbteam": "Test Club",
                "positions": ["C"],
            },
            "bid": 100,
        },
    });
    ws.send(Message::Text(pick.to_string().into())).await.unwrap();
    ws.close(None).await.unwrap();

    let mut saw_rejection = false;
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == "PlayerRejected" {
                    assert_eq!(
                        value["data"]["reason"],
                        "Pick received when not waiting for pick"
                    );
                    saw_rejection = true;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
    assert!(saw_rejection, "rejection reply was dropped on close");
}

#[tokio::test]
async fn websocket_handshake_rejects_bad_requests() {
    let addr = spawn_server().await;

    // Unknown path: 404 during the handshake.
    let request = format!("ws://{addr}/nope").into_client_request().unwrap();
    match tokio_tungstenite::connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        other => panic!("expected 404 handshake rejection, got {other:?}"),
    }

    // Missing user header: 401.
    let request = format!("ws://{addr}/ws/2").into_client_request().unwrap();
    match tokio_tungstenite::connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected 401 handshake rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn websocket_closes_when_draft_does_not_exist() {
    let addr = spawn_server().await;

    let mut request = format!("ws://{addr}/ws/99").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-draft-user", "alice".parse().unwrap());
    // The handshake succeeds (the path is well formed) but registration
    // fails, so the server drops the connection without sending anything.
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    loop {
        match ws.next().await {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Text(text))) => panic!("unexpected frame: {text}"),
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
}
