//! Integration tests for the Nightfall server: handshake, routing, room
//! lifecycle, a full game, reconnection, and the background supervisors.
//!
//! Every test binds a fresh server on an OS-assigned port and drives it
//! with real `tokio-tungstenite` clients. Users authenticate with a numeric
//! token (`?token=<id>`); room 1 is hosted by user 1.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nightfall::prelude::*;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

// =========================================================================
// Mock authenticator
// =========================================================================

/// Accepts `<id>` or `<id>:<name>` as the credential.
struct TestAuth;

impl Authenticator for TestAuth {
    async fn authenticate(&self, credential: &str) -> Result<Identity, SessionError> {
        let (id, name) = match credential.split_once(':') {
            Some((id, name)) => (id, name.to_string()),
            None => (credential, format!("player{credential}")),
        };
        let id: u64 = id
            .parse()
            .map_err(|_| SessionError::AuthFailed("not a number".into()))?;
        Ok(Identity {
            user_id: UserId(id),
            username: name,
        })
    }
}

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const WAIT: Duration = Duration::from_secs(5);

fn debug_config() -> ServerConfig {
    ServerConfig {
        allow_force_phase: true,
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> SocketAddr {
    let directory = InMemoryDirectory::with_rooms([
        RoomRecord::new(RoomId(1), UserId(1), 12),
        RoomRecord::new(RoomId(2), UserId(2), 2),
    ]);
    let server = NightfallServer::builder()
        .bind("127.0.0.1:0")
        .config(config)
        .build(TestAuth, directory)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("should have local addr");

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn connect_raw(addr: SocketAddr, query: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws{query}"))
        .await
        .expect("should connect");
    ws
}

/// Connects as `user` and consumes the `connected` message.
async fn connect(addr: SocketAddr, user: u64) -> (ClientWs, Value) {
    let mut ws = connect_raw(addr, &format!("?token={user}")).await;
    let connected = expect(&mut ws, "connected").await;
    (ws, connected)
}

async fn send(ws: &mut ClientWs, kind: &str, data: Value) {
    let text = json!({ "type": kind, "data": data, "timestamp": 0 }).to_string();
    ws.send(Message::Text(text.into())).await.expect("send");
}

async fn send_with_id(ws: &mut ClientWs, kind: &str, data: Value, id: &str) {
    let text = json!({ "type": kind, "data": data, "messageId": id }).to_string();
    ws.send(Message::Text(text.into())).await.expect("send");
}

/// Next JSON message, skipping control frames.
async fn next_json(ws: &mut ClientWs) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Skips messages until one of type `kind` arrives.
async fn expect(ws: &mut ClientWs, kind: &str) -> Value {
    loop {
        let msg = next_json(ws).await;
        if msg["type"] == kind {
            return msg;
        }
    }
}

async fn expect_error(ws: &mut ClientWs, code: &str) -> Value {
    let msg = expect(ws, "error").await;
    assert_eq!(msg["data"]["code"], code, "unexpected error {msg}");
    msg
}

async fn expect_phase(ws: &mut ClientWs, phase: &str) -> Value {
    loop {
        let msg = expect(ws, "phase:changed").await;
        if msg["data"]["phase"] == phase {
            return msg;
        }
    }
}

/// Reads until the server closes the socket and returns the close code.
async fn expect_close(ws: &mut ClientWs) -> u16 {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Close(None))) | None | Some(Err(_)) => {
                panic!("socket ended without a close code")
            }
            Some(Ok(_)) => continue,
        }
    }
}

async fn join(ws: &mut ClientWs, room: u64) -> Value {
    send(ws, "join-room", json!({ "roomId": room })).await;
    expect(ws, "room-joined").await
}

/// Seats users 1..=n in room 1, readies everyone, and starts a game.
/// Returns the clients (index 0 is the host) and each user's role.
async fn start_game(addr: SocketAddr, n: u64) -> (Vec<ClientWs>, HashMap<u64, String>) {
    let mut clients = Vec::new();
    for user in 1..=n {
        let (mut ws, _) = connect(addr, user).await;
        join(&mut ws, 1).await;
        clients.push(ws);
    }
    for ws in clients.iter_mut() {
        send(ws, "player-ready", json!({ "ready": true })).await;
    }
    let mut ready = 0;
    while ready < n {
        let msg = expect(&mut clients[0], "player-ready").await;
        if msg["data"]["ready"] == true {
            ready += 1;
        }
    }

    send(&mut clients[0], "start-game", json!({})).await;
    let mut roles = HashMap::new();
    for (i, ws) in clients.iter_mut().enumerate() {
        expect(ws, "game-started").await;
        let assigned = expect(ws, "role-assigned").await;
        let role = assigned["data"]["role"].as_str().expect("role").to_string();
        roles.insert(i as u64 + 1, role);
    }
    expect_phase(&mut clients[0], "NIGHT").await;
    (clients, roles)
}

/// Host forces the current phase closed and waits for `next`.
async fn force(host: &mut ClientWs, next: &str) {
    send(host, "force-phase", json!({})).await;
    expect_phase(host, next).await;
}

/// Has each voter vote for `target`, then waits until the host saw every
/// vote.
async fn vote_out(clients: &mut [ClientWs], voters: &[u64], target: u64) {
    for voter in voters {
        let ws = &mut clients[*voter as usize - 1];
        send(ws, "vote", json!({ "targetId": target })).await;
    }
    for _ in voters {
        expect(&mut clients[0], "vote-cast").await;
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_connect_with_query_token_sends_connected() {
    let addr = start_server(ServerConfig::default()).await;
    let (_ws, connected) = connect(addr, 42).await;

    assert_eq!(connected["data"]["userId"], 42);
    assert_eq!(connected["data"]["username"], "player42");
    assert_eq!(connected["data"]["reconnectAvailable"], false);
    assert!(connected["data"].get("pendingRoomId").is_none());
}

#[tokio::test]
async fn test_connect_with_percent_encoded_query_token() {
    let addr = start_server(ServerConfig::default()).await;
    let mut ws = connect_raw(addr, "?token=5%3AAda%20L").await;
    let connected = expect(&mut ws, "connected").await;

    assert_eq!(connected["data"]["userId"], 5);
    assert_eq!(connected["data"]["username"], "Ada L");
}

#[tokio::test]
async fn test_connect_with_bearer_header() {
    let addr = start_server(ServerConfig::default()).await;
    let mut request = format!("ws://{addr}/ws")
        .into_client_request()
        .expect("valid request");
    request
        .headers_mut()
        .insert("authorization", "Bearer 7:Mallory".parse().expect("header"));
    let (mut ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("should connect");

    let connected = expect(&mut ws, "connected").await;
    assert_eq!(connected["data"]["userId"], 7);
    assert_eq!(connected["data"]["username"], "Mallory");
}

#[tokio::test]
async fn test_invalid_credential_closes_with_policy_violation() {
    let addr = start_server(ServerConfig::default()).await;
    let mut ws = connect_raw(addr, "?token=not-a-number").await;
    assert_eq!(expect_close(&mut ws).await, 1008);
}

#[tokio::test]
async fn test_missing_credential_closes_with_policy_violation() {
    let addr = start_server(ServerConfig::default()).await;
    let mut ws = connect_raw(addr, "").await;
    assert_eq!(expect_close(&mut ws).await, 1008);
}

#[tokio::test]
async fn test_second_connection_supersedes_first() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut first, _) = connect(addr, 5).await;
    let (mut second, _) = connect(addr, 5).await;

    assert_eq!(expect_close(&mut first).await, 4000);
    send(&mut second, "ping", json!({})).await;
    expect(&mut second, "activity-pong").await;
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_malformed_message_is_rejected_and_connection_survives() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut ws, _) = connect(addr, 1).await;

    ws.send(Message::Text("not json".into())).await.expect("send");
    expect_error(&mut ws, "INVALID_MESSAGE").await;

    ws.send(Message::Text(r#"{"type": 5}"#.into())).await.expect("send");
    expect_error(&mut ws, "INVALID_MESSAGE").await;

    send(&mut ws, "ping", json!({})).await;
    expect(&mut ws, "activity-pong").await;
}

#[tokio::test]
async fn test_unknown_type_echoes_message_id() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut ws, _) = connect(addr, 1).await;

    send_with_id(&mut ws, "dance", json!({}), "m-7").await;
    let err = expect_error(&mut ws, "UNKNOWN_MESSAGE_TYPE").await;
    assert_eq!(err["messageId"], "m-7");
}

#[tokio::test]
async fn test_bad_fields_are_invalid_message() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut ws, _) = connect(addr, 1).await;

    send(&mut ws, "join-room", json!({ "roomId": "one" })).await;
    expect_error(&mut ws, "INVALID_MESSAGE").await;
}

// =========================================================================
// Lobby
// =========================================================================

#[tokio::test]
async fn test_join_unknown_room_is_room_not_found() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut ws, _) = connect(addr, 1).await;

    send_with_id(&mut ws, "join-room", json!({ "roomId": 99 }), "j-1").await;
    let err = expect_error(&mut ws, "ROOM_NOT_FOUND").await;
    assert_eq!(err["messageId"], "j-1");
}

#[tokio::test]
async fn test_join_notifies_room_and_rejoin_is_noop() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 1).await;
    let (mut guest, _) = connect(addr, 3).await;

    let joined = join(&mut host, 1).await;
    assert_eq!(joined["data"]["room"]["hostId"], 1);
    assert_eq!(joined["data"]["room"]["status"], "waiting");
    assert_eq!(joined["data"]["spectator"], false);

    let joined = join(&mut guest, 1).await;
    assert_eq!(joined["data"]["room"]["players"].as_array().unwrap().len(), 2);
    let notice = expect(&mut host, "player-joined").await;
    assert_eq!(notice["data"]["userId"], 3);
    assert_eq!(notice["data"]["reconnected"], false);

    // Joining again repeats the reply and tells nobody.
    let again = join(&mut guest, 1).await;
    assert_eq!(again["data"]["room"]["players"].as_array().unwrap().len(), 2);
    send(&mut host, "ping", json!({})).await;
    let next = next_json(&mut host).await;
    assert_eq!(next["type"], "activity-pong", "no second player-joined");
}

#[tokio::test]
async fn test_join_full_room_is_room_full() {
    let addr = start_server(ServerConfig::default()).await;
    let mut seated = Vec::new();
    for user in [2, 3] {
        let (mut ws, _) = connect(addr, user).await;
        join(&mut ws, 2).await;
        seated.push(ws);
    }
    let (mut late, _) = connect(addr, 4).await;
    send(&mut late, "join-room", json!({ "roomId": 2 })).await;
    expect_error(&mut late, "ROOM_FULL").await;

    // Spectating does not need a seat.
    send(&mut late, "spectate-room", json!({ "roomId": 2 })).await;
    let joined = expect(&mut late, "room-joined").await;
    assert_eq!(joined["data"]["spectator"], true);
}

#[tokio::test]
async fn test_spectating_disabled_is_rejected() {
    let mut config = ServerConfig::default();
    config.room.allow_spectators = false;
    let addr = start_server(config).await;
    let (mut ws, _) = connect(addr, 4).await;

    send(&mut ws, "spectate-room", json!({ "roomId": 1 })).await;
    expect_error(&mut ws, "SPECTATING_DISABLED").await;
}

#[tokio::test]
async fn test_leave_room_acks_and_notifies() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 1).await;
    let (mut guest, _) = connect(addr, 3).await;
    join(&mut host, 1).await;
    join(&mut guest, 1).await;

    send(&mut guest, "leave-room", json!({})).await;
    let left = expect(&mut guest, "room-left").await;
    assert_eq!(left["data"]["roomId"], 1);
    let notice = expect(&mut host, "player-left").await;
    assert_eq!(notice["data"]["userId"], 3);
    assert_eq!(notice["data"]["reason"], "left");

    send(&mut guest, "leave-room", json!({})).await;
    expect_error(&mut guest, "NOT_IN_ROOM").await;
}

#[tokio::test]
async fn test_stop_spectating_requires_spectator_seat() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut ws, _) = connect(addr, 1).await;
    join(&mut ws, 1).await;

    send(&mut ws, "stop-spectating", json!({})).await;
    expect_error(&mut ws, "NOT_IN_ROOM").await;
}

#[tokio::test]
async fn test_kick_player_by_host() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 1).await;
    let (mut guest, _) = connect(addr, 3).await;
    join(&mut host, 1).await;
    join(&mut guest, 1).await;

    send(&mut guest, "kick-player", json!({ "playerId": 1 })).await;
    expect_error(&mut guest, "NOT_HOST").await;

    send(&mut host, "kick-player", json!({ "playerId": 1 })).await;
    expect_error(&mut host, "INVALID_TARGET").await;

    send(&mut host, "kick-player", json!({ "playerId": 3 })).await;
    let kicked = expect(&mut guest, "kicked").await;
    assert_eq!(kicked["data"]["roomId"], 1);
    let notice = expect(&mut host, "player-left").await;
    assert_eq!(notice["data"]["reason"], "kicked");
}

#[tokio::test]
async fn test_start_game_preconditions() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 1).await;
    let (mut guest, _) = connect(addr, 3).await;
    join(&mut host, 1).await;
    join(&mut guest, 1).await;

    send(&mut guest, "start-game", json!({})).await;
    expect_error(&mut guest, "NOT_HOST").await;

    send(&mut host, "start-game", json!({})).await;
    expect_error(&mut host, "NOT_ENOUGH_PLAYERS").await;
}

#[tokio::test]
async fn test_start_game_requires_everyone_ready() {
    let addr = start_server(ServerConfig::default()).await;
    let mut clients = Vec::new();
    for user in 1..=5 {
        let (mut ws, _) = connect(addr, user).await;
        join(&mut ws, 1).await;
        clients.push(ws);
    }
    send(&mut clients[0], "player-ready", json!({ "ready": true })).await;
    expect(&mut clients[0], "player-ready").await;

    send(&mut clients[0], "start-game", json!({})).await;
    expect_error(&mut clients[0], "PLAYERS_NOT_READY").await;
}

#[tokio::test]
async fn test_chat_in_lobby_is_trimmed_and_room_wide() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 1).await;
    let (mut guest, _) = connect(addr, 3).await;
    join(&mut host, 1).await;
    join(&mut guest, 1).await;

    send(&mut guest, "chat-message", json!({ "message": "  hello  " })).await;
    for ws in [&mut host, &mut guest] {
        let chat = expect(ws, "chat-message").await;
        assert_eq!(chat["data"]["message"], "hello");
        assert_eq!(chat["data"]["channel"], "room");
        assert_eq!(chat["data"]["userId"], 3);
    }

    send(&mut guest, "chat-message", json!({ "message": "   " })).await;
    expect_error(&mut guest, "INVALID_MESSAGE").await;
}

#[tokio::test]
async fn test_force_phase_disabled_is_forbidden() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 1).await;
    join(&mut host, 1).await;

    send(&mut host, "force-phase", json!({})).await;
    expect_error(&mut host, "FORBIDDEN").await;
}

// =========================================================================
// Game flow
// =========================================================================

#[tokio::test]
async fn test_six_player_start_matches_distribution() {
    let addr = start_server(debug_config()).await;
    let (mut clients, roles) = start_game(addr, 6).await;

    let count = |role: &str| roles.values().filter(|r| *r == role).count();
    assert_eq!(count("werewolf"), 2);
    assert_eq!(count("seer"), 1);
    assert_eq!(count("doctor"), 1);
    assert_eq!(count("villager"), 2);
    assert_eq!(count("jester"), 0);

    // Joining a room mid-game is refused; voting at night is a phase error.
    let (mut late, _) = connect(addr, 9).await;
    send(&mut late, "join-room", json!({ "roomId": 1 })).await;
    expect_error(&mut late, "GAME_IN_PROGRESS").await;

    send(&mut clients[1], "vote", json!({ "targetId": 1 })).await;
    expect_error(&mut clients[1], "INVALID_PHASE").await;
}

#[tokio::test]
async fn test_forced_voting_executes_plurality_target() {
    let addr = start_server(debug_config()).await;
    let (mut clients, _roles) = start_game(addr, 6).await;

    force(&mut clients[0], "DAY").await;
    force(&mut clients[0], "VOTING").await;
    vote_out(&mut clients, &[1, 2, 3, 4], 6).await;

    send(&mut clients[0], "force-phase", json!({})).await;
    let results = expect(&mut clients[0], "voting-results").await;
    assert_eq!(results["data"]["executed"]["playerId"], 6);
    assert_eq!(results["data"]["executed"]["votes"], 4);
    assert_eq!(results["data"]["tie"], false);

    let day = expect(&mut clients[0], "day-results").await;
    let deaths = day["data"]["deaths"].as_array().unwrap();
    assert_eq!(deaths.len(), 1);
    assert_eq!(deaths[0]["cause"], "executed");

    let next = expect(&mut clients[0], "phase:changed").await;
    assert_eq!(next["data"]["phase"], "NIGHT");
    assert_eq!(next["data"]["day"], 2);
}

#[tokio::test]
async fn test_game_runs_to_village_win_and_room_reopens() {
    let addr = start_server(debug_config()).await;
    let (mut clients, roles) = start_game(addr, 6).await;
    let mut wolves: Vec<u64> = roles
        .iter()
        .filter(|(_, role)| *role == "werewolf")
        .map(|(user, _)| *user)
        .collect();
    wolves.sort();

    // Nobody acts at night, so only the two executions remove players.
    let mut dead = Vec::new();
    for (round, wolf) in wolves.iter().enumerate() {
        force(&mut clients[0], "DAY").await;
        force(&mut clients[0], "VOTING").await;
        let voters: Vec<u64> = (1..=6)
            .filter(|u| u != wolf && !dead.contains(u))
            .take(4)
            .collect();
        vote_out(&mut clients, &voters, *wolf).await;
        send(&mut clients[0], "force-phase", json!({})).await;
        dead.push(*wolf);
        if round == 0 {
            let results = expect(&mut clients[0], "voting-results").await;
            assert_eq!(results["data"]["executed"]["role"], "werewolf");
            expect_phase(&mut clients[0], "NIGHT").await;
        }
    }

    let ended = expect(&mut clients[0], "game-ended").await;
    assert_eq!(ended["data"]["winningFaction"], "village");
    assert_eq!(ended["data"]["reason"], "werewolves-eliminated");
    assert_eq!(ended["data"]["roles"].as_array().unwrap().len(), 6);

    let updated = expect(&mut clients[0], "room-updated").await;
    assert_eq!(updated["data"]["room"]["status"], "waiting");
    assert!(
        updated["data"]["room"]["players"]
            .as_array()
            .unwrap()
            .iter()
            .all(|p| p["ready"] == false)
    );
}

// =========================================================================
// Reconnection
// =========================================================================

#[tokio::test]
async fn test_reconnect_during_night_restores_game_state() {
    let addr = start_server(debug_config()).await;
    let (mut clients, roles) = start_game(addr, 6).await;

    let dropped = clients.remove(2);
    drop(dropped);
    let notice = expect(&mut clients[0], "player-left").await;
    assert_eq!(notice["data"]["userId"], 3);
    assert_eq!(notice["data"]["reason"], "disconnected");

    let (mut back, connected) = connect(addr, 3).await;
    assert_eq!(connected["data"]["reconnectAvailable"], true);
    assert_eq!(connected["data"]["pendingRoomId"], 1);

    send(&mut back, "reconnect", json!({ "expectedRoomId": 1 })).await;
    let restored = expect(&mut back, "reconnection-success").await;
    let state = &restored["data"]["gameState"];
    assert_eq!(state["phase"], "NIGHT");
    assert_eq!(state["day"], 1);
    assert_eq!(state["yourRole"], roles[&3].as_str());
    assert_eq!(restored["data"]["room"]["roomId"], 1);

    let notice = expect(&mut clients[0], "player-joined").await;
    assert_eq!(notice["data"]["userId"], 3);
    assert_eq!(notice["data"]["reconnected"], true);

    // The record is consumed exactly once.
    send(&mut back, "reconnect", json!({})).await;
    expect_error(&mut back, "RECONNECT_FAILED").await;
}

#[tokio::test]
async fn test_reconnect_to_wrong_room_keeps_record() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 1).await;
    let (mut guest, _) = connect(addr, 3).await;
    join(&mut host, 1).await;
    join(&mut guest, 1).await;
    drop(guest);
    expect(&mut host, "player-left").await;

    let (mut back, _) = connect(addr, 3).await;
    send(&mut back, "reconnect", json!({ "expectedRoomId": 2 })).await;
    expect_error(&mut back, "RECONNECT_FAILED").await;

    send(&mut back, "reconnect", json!({ "expectedRoomId": 1 })).await;
    let restored = expect(&mut back, "reconnection-success").await;
    assert!(restored["data"].get("gameState").is_none());
}

#[tokio::test]
async fn test_reconnect_without_record_fails() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut ws, _) = connect(addr, 8).await;
    send(&mut ws, "reconnect", json!({})).await;
    expect_error(&mut ws, "RECONNECT_FAILED").await;
}

#[tokio::test]
async fn test_reconnect_superseded_mid_reconnect_keeps_window_for_newest() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 1).await;
    let (mut guest, _) = connect(addr, 3).await;
    join(&mut host, 1).await;
    join(&mut guest, 1).await;
    drop(guest);
    expect(&mut host, "player-left").await;

    // The second connection asks to reconnect and is superseded by a third
    // before it hears back.
    let (mut second, _) = connect(addr, 3).await;
    send(&mut second, "reconnect", json!({ "expectedRoomId": 1 })).await;
    let (mut third, connected) = connect(addr, 3).await;
    assert_eq!(connected["data"]["reconnectAvailable"], true);

    send(&mut third, "reconnect", json!({ "expectedRoomId": 1 })).await;
    let restored = expect(&mut third, "reconnection-success").await;
    assert_eq!(restored["data"]["room"]["roomId"], 1);
    let players = restored["data"]["room"]["players"].as_array().unwrap();
    assert_eq!(players.iter().filter(|p| p["userId"] == 3).count(), 1);
    drop(second);
}

#[tokio::test]
async fn test_reconnect_to_full_waiting_room_fails_until_seat_frees() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut host, _) = connect(addr, 2).await;
    let (mut guest, _) = connect(addr, 3).await;
    join(&mut host, 2).await;
    join(&mut guest, 2).await;
    drop(guest);
    expect(&mut host, "player-left").await;

    let (mut newcomer, _) = connect(addr, 4).await;
    join(&mut newcomer, 2).await;

    let (mut back, _) = connect(addr, 3).await;
    send(&mut back, "reconnect", json!({ "expectedRoomId": 2 })).await;
    expect_error(&mut back, "RECONNECT_FAILED").await;

    send(&mut newcomer, "leave-room", json!({})).await;
    expect(&mut newcomer, "room-left").await;

    send(&mut back, "reconnect", json!({ "expectedRoomId": 2 })).await;
    let restored = expect(&mut back, "reconnection-success").await;
    assert_eq!(restored["data"]["room"]["players"].as_array().unwrap().len(), 2);
}

// =========================================================================
// Supervisors
// =========================================================================

#[tokio::test]
async fn test_host_loss_deletes_waiting_room_after_grace() {
    let mut config = ServerConfig::default();
    config.room.host_grace = Duration::from_millis(200);
    config.room.reconcile_interval = Duration::from_millis(50);
    let addr = start_server(config).await;

    let (mut host, _) = connect(addr, 1).await;
    let (mut guest, _) = connect(addr, 3).await;
    join(&mut host, 1).await;
    join(&mut guest, 1).await;
    drop(host);

    expect(&mut guest, "player-left").await;
    let deleted = expect(&mut guest, "room-deleted").await;
    assert_eq!(deleted["data"]["roomId"], 1);

    send(&mut guest, "join-room", json!({ "roomId": 1 })).await;
    expect_error(&mut guest, "ROOM_NOT_FOUND").await;
}

#[tokio::test]
async fn test_unanswered_heartbeats_close_connection() {
    let mut config = ServerConfig::default();
    config.heartbeat.interval = Duration::from_millis(100);
    config.heartbeat.max_missed = 2;
    let addr = start_server(config).await;

    let (mut host, _) = connect(addr, 1).await;
    let (mut silent, _) = connect(addr, 4).await;
    join(&mut host, 1).await;
    join(&mut silent, 1).await;

    // The host keeps reading, so its pings are answered; the silent
    // client's are not until it reads again below.
    let notice = expect(&mut host, "player-left").await;
    assert_eq!(notice["data"]["userId"], 4);
    assert_eq!(notice["data"]["reason"], "disconnected");
    assert_eq!(expect_close(&mut silent).await, 4002);
}

#[tokio::test]
async fn test_game_without_connected_players_is_abandoned() {
    let mut config = debug_config();
    config.reconnect.ttl = Duration::from_millis(300);
    let addr = start_server(config).await;
    let (clients, _) = start_game(addr, 6).await;
    drop(clients);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let (mut late, _) = connect(addr, 7).await;
    let joined = join(&mut late, 1).await;
    assert_eq!(joined["data"]["room"]["status"], "waiting");
}

#[tokio::test]
async fn test_idle_connection_is_warned_then_closed() {
    let mut config = ServerConfig::default();
    config.inactivity.timeout = Duration::from_millis(400);
    config.inactivity.warning_window = Duration::from_millis(200);
    config.inactivity.max_warnings = 1;
    let addr = start_server(config).await;

    let (mut ws, _) = connect(addr, 4).await;
    let warning = expect(&mut ws, "inactivity-warning").await;
    assert_eq!(warning["data"]["warning"], 1);
    assert_eq!(expect_close(&mut ws).await, 4001);
}
