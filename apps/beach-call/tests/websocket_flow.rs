use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use beach_call::auth::{JwtAuthority, TokenIssuer};
use beach_call::{routes, AppState, SessionError, SessionStatus};

type TestResult = Result<(), Box<dyn std::error::Error>>;
type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Server {
    addr: SocketAddr,
    state: AppState,
    authority: Arc<JwtAuthority>,
}

async fn spawn_server() -> Server {
    let authority = Arc::new(JwtAuthority::new(
        b"ws-test-secret",
        chrono::Duration::minutes(60),
    ));
    let state = AppState::new(authority.clone(), authority.clone(), 32);
    let app = routes::router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    Server {
        addr,
        state,
        authority,
    }
}

impl Server {
    async fn connect(&self, identity: &str) -> Client {
        let token = self.authority.issue(identity).expect("issue token").token;
        let url = format!("ws://{}/ws?token={}", self.addr, token);
        let (socket, _) = connect_async(url).await.expect("websocket connect");
        self.wait_until(|state| state.engine().registry().lookup(identity).is_some())
            .await;
        socket
    }

    async fn wait_until(&self, condition: impl Fn(&AppState) -> bool) {
        let deadline = Instant::now() + RECV_TIMEOUT;
        while !condition(&self.state) {
            assert!(Instant::now() < deadline, "condition not reached in time");
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Connect both parties and bring a call to `active`, draining the
    /// resulting notifications.
    async fn active_call(&self, caller: &str, target: &str) -> (Client, Client) {
        let mut caller_ws = self.connect(caller).await;
        let mut target_ws = self.connect(target).await;

        self.state
            .engine()
            .create(caller, target, "video")
            .expect("create");
        assert_eq!(next_event(&mut target_ws).await["data"]["status"], "pending");

        self.state.engine().accept(target).expect("accept");
        assert_eq!(next_event(&mut caller_ws).await["data"]["status"], "active");
        assert_eq!(next_event(&mut target_ws).await["data"]["status"], "active");

        (caller_ws, target_ws)
    }
}

async fn next_event(ws: &mut Client) -> Value {
    loop {
        let message = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json event"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn expect_silence(ws: &mut Client, window: Duration) {
    if let Ok(Some(Ok(message))) = timeout(window, ws.next()).await {
        panic!("expected no frame, got {message:?}");
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

#[tokio::test]
async fn rejects_upgrade_without_valid_token() -> TestResult {
    let server = spawn_server().await;

    for url in [
        format!("ws://{}/ws", server.addr),
        format!("ws://{}/ws?token=garbage", server.addr),
    ] {
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("upgrade should have been refused"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn full_call_flow_relays_signals_both_ways() -> TestResult {
    let server = spawn_server().await;
    let (mut alice, mut bob) = server.active_call("alice", "bob").await;

    let offer = json!({"type": "offer", "sdp": "v=0\r\no=alice"});
    send_json(&mut alice, json!({"event": "signal", "data": offer.clone()})).await;
    let received = next_event(&mut bob).await;
    assert_eq!(received["event"], "signal");
    assert_eq!(received["data"], offer);

    let answer = json!({"type": "answer", "sdp": "v=0\r\no=bob"});
    send_json(&mut bob, json!({"event": "signal", "data": answer.clone()})).await;
    let received = next_event(&mut alice).await;
    assert_eq!(received["event"], "signal");
    assert_eq!(received["data"], answer);

    let candidate = json!({"candidate": "candidate:1 1 udp 2122260223 10.0.0.1 9 typ host"});
    send_json(&mut alice, json!({"event": "signal", "data": candidate.clone()})).await;
    assert_eq!(next_event(&mut bob).await["data"], candidate);
    Ok(())
}

#[tokio::test]
async fn signals_before_accept_are_dropped() -> TestResult {
    let server = spawn_server().await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    server.state.engine().create("alice", "bob", "audio")?;
    assert_eq!(next_event(&mut bob).await["data"]["status"], "pending");

    send_json(&mut alice, json!({"event": "signal", "data": {"early": true}})).await;
    expect_silence(&mut bob, Duration::from_millis(300)).await;

    server.state.engine().accept("bob")?;
    assert_eq!(next_event(&mut alice).await["data"]["status"], "active");
    assert_eq!(next_event(&mut bob).await["data"]["status"], "active");

    send_json(&mut alice, json!({"event": "signal", "data": {"late": true}})).await;
    let received = next_event(&mut bob).await;
    assert_eq!(received["event"], "signal");
    assert_eq!(received["data"], json!({"late": true}));
    Ok(())
}

#[tokio::test]
async fn unknown_events_are_ignored() -> TestResult {
    let server = spawn_server().await;
    let (mut alice, mut bob) = server.active_call("alice", "bob").await;

    send_json(&mut alice, json!({"event": "typing", "data": {"on": true}})).await;
    send_json(&mut alice, json!({"event": "signal", "data": {"after": "unknown"}})).await;

    let received = next_event(&mut bob).await;
    assert_eq!(received["event"], "signal");
    assert_eq!(received["data"]["after"], "unknown");
    Ok(())
}

#[tokio::test]
async fn disconnect_ends_the_call_and_notifies_the_peer() -> TestResult {
    let server = spawn_server().await;
    let (mut alice, mut bob) = server.active_call("alice", "bob").await;

    alice.close(None).await?;

    let update = next_event(&mut bob).await;
    assert_eq!(update["event"], "session_updated");
    assert_eq!(update["data"]["status"], "disconnected");
    assert_eq!(update["data"]["caller"], "alice");

    server
        .wait_until(|state| state.engine().registry().lookup("alice").is_none())
        .await;
    assert_eq!(
        server.state.engine().get("bob"),
        Err(SessionError::NoSession)
    );
    server.state.engine().check_invariants()?;
    Ok(())
}

#[tokio::test]
async fn undecodable_frame_closes_the_connection() -> TestResult {
    let server = spawn_server().await;
    let (mut alice, mut bob) = server.active_call("alice", "bob").await;

    alice.send(Message::Text("not json".into())).await?;

    let update = next_event(&mut bob).await;
    assert_eq!(update["data"]["status"], "disconnected");
    Ok(())
}

#[tokio::test]
async fn reconnect_supersedes_previous_connection() -> TestResult {
    let server = spawn_server().await;
    let mut first = server.connect("alice").await;
    let first_id = server
        .state
        .engine()
        .registry()
        .lookup("alice")
        .map(|handle| handle.id())
        .expect("first connection registered");

    let mut bob = server.connect("bob").await;
    server.state.engine().create("alice", "bob", "video")?;
    assert_eq!(next_event(&mut bob).await["data"]["status"], "pending");

    let token = server.authority.issue("alice")?.token;
    let (mut second, _) = connect_async(format!("ws://{}/ws?token={}", server.addr, token)).await?;
    server
        .wait_until(|state| {
            state
                .engine()
                .registry()
                .lookup("alice")
                .is_some_and(|handle| handle.id() != first_id)
        })
        .await;

    // The superseded socket is closed by the server.
    let closed = timeout(RECV_TIMEOUT, async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "superseded connection was not closed");

    // Its teardown must not end the session or drop the new registration.
    expect_silence(&mut bob, Duration::from_millis(300)).await;
    let session = server.state.engine().get("alice")?;
    assert_eq!(session.status, SessionStatus::Pending);
    assert!(server.state.engine().registry().lookup("alice").is_some());

    server.state.engine().accept("bob")?;
    assert_eq!(next_event(&mut second).await["data"]["status"], "active");
    assert_eq!(next_event(&mut bob).await["data"]["status"], "active");

    send_json(&mut bob, json!({"event": "signal", "data": {"sdp": "answer"}})).await;
    let received = next_event(&mut second).await;
    assert_eq!(received["data"]["sdp"], "answer");
    Ok(())
}
