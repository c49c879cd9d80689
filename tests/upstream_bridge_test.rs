// Upstream bridging against a stub relay.
//
// The stub accepts any number of WebSocket sessions. Every frame it receives
// is forwarded to the test; it answers REQ with its canned events followed by
// EOSE, and EVENT with an accepting OK.

use futures::{SinkExt, StreamExt};
use peer_relay::{
    api::{create_router, RelayInformation},
    config::RelayConfig,
    event::compute_event_id,
    relay::RelayEngine,
};
use secp256k1::{KeyPair, Message as SchnorrMessage, Secp256k1, SecretKey};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct StubUpstream {
    url: String,
    received: mpsc::UnboundedReceiver<Value>,
}

impl StubUpstream {
    async fn start(events: Vec<Value>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let events = events.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let Message::Text(text) = msg else { continue };
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        let _ = tx.send(frame.clone());

                        match frame[0].as_str() {
                            Some("REQ") => {
                                let sub_id = frame[1].clone();
                                for event in &events {
                                    let out = json!(["EVENT", sub_id, event]).to_string();
                                    let _ = ws.send(Message::Text(out)).await;
                                }
                                let eose = json!(["EOSE", sub_id]).to_string();
                                let _ = ws.send(Message::Text(eose)).await;
                            }
                            Some("EVENT") => {
                                let ok = json!(["OK", frame[1]["id"], true, ""]).to_string();
                                let _ = ws.send(Message::Text(ok)).await;
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        Self { url, received }
    }

    async fn next_frame(&mut self) -> Value {
        timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("stub received nothing")
            .expect("stub stopped")
    }
}

async fn spawn_relay(config: RelayConfig) -> (SocketAddr, Arc<RelayEngine>) {
    let engine = Arc::new(RelayEngine::new(&config));
    let router = create_router(Arc::clone(&engine), RelayInformation::default(), "public");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, engine)
}

fn bridged_config(relays: Vec<String>, grace_ms: u64) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.nostr.disable_signature = true;
    config.upstream.relays = relays;
    config.upstream.eose_grace_ms = grace_ms;
    config.upstream.connect_timeout_ms = 1000;
    config.upstream.backoff_step_ms = 50;
    config
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", addr))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn make_event(content: &str, tags: &[[&str; 2]]) -> Value {
    let pubkey = "f".repeat(64);
    let tags: Vec<Vec<String>> = tags
        .iter()
        .map(|[k, v]| vec![k.to_string(), v.to_string()])
        .collect();
    let created_at = chrono::Utc::now().timestamp();
    let id = compute_event_id(&pubkey, created_at, 1, &tags, content);
    json!({
        "id": id,
        "pubkey": pubkey,
        "created_at": created_at,
        "kind": 1,
        "tags": tags,
        "content": content,
        "sig": "0".repeat(128),
    })
}

fn signed_event(content: &str) -> Value {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[3u8; 32]).unwrap();
    let keypair = KeyPair::from_secret_key(&secp, &sk);
    let pubkey = hex::encode(keypair.x_only_public_key().0.serialize());
    let id = compute_event_id(&pubkey, 1_700_000_000, 1, &[], content);
    let message = SchnorrMessage::from_slice(&hex::decode(&id).unwrap()).unwrap();
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);
    json!({
        "id": id,
        "pubkey": pubkey,
        "created_at": 1_700_000_000,
        "kind": 1,
        "tags": [],
        "content": content,
        "sig": sig.to_string(),
    })
}

#[tokio::test]
async fn test_upstream_event_arrives_before_delayed_eose() {
    let remote = make_event("from upstream", &[["t", "lobby"]]);
    let mut stub = StubUpstream::start(vec![remote.clone()]).await;
    let (addr, engine) = spawn_relay(bridged_config(vec![stub.url.clone()], 800)).await;
    let mut ws = connect(addr).await;

    let started = Instant::now();
    send(&mut ws, json!(["REQ", "s", { "#t": ["lobby"] }])).await;

    assert_eq!(recv(&mut ws).await, json!(["EVENT", "s", remote]));
    assert_eq!(recv(&mut ws).await, json!(["EOSE", "s"]));
    assert!(started.elapsed() >= Duration::from_millis(800));
    assert!(engine.contains_event(remote["id"].as_str().unwrap()));

    // Upstream REQ uses a derived id and aliased tag filters
    let req = stub.next_frame().await;
    assert_eq!(req[0], "REQ");
    assert_eq!(req[1], "up_s_0");
    assert_eq!(req[2]["#t"], json!(["lobby"]));
    assert_eq!(req[2]["#room"], json!(["lobby"]));
}

#[tokio::test]
async fn test_upstream_events_fan_out_to_other_subscriptions() {
    let remote = make_event("shared", &[]);
    let stub = StubUpstream::start(vec![remote.clone()]).await;
    let (addr, _engine) = spawn_relay(bridged_config(vec![stub.url.clone()], 300)).await;

    let mut watcher = connect(addr).await;
    send(&mut watcher, json!(["REQ", "watch", { "kinds": [1] }])).await;
    // Watcher's own link delivers the event first
    assert_eq!(recv(&mut watcher).await, json!(["EVENT", "watch", remote]));
    assert_eq!(recv(&mut watcher).await, json!(["EOSE", "watch"]));

    // Already stored: the second subscription replays it, no rebroadcast
    let mut other = connect(addr).await;
    send(&mut other, json!(["REQ", "other", { "kinds": [1] }])).await;
    assert_eq!(recv(&mut other).await, json!(["EVENT", "other", remote]));
    assert_eq!(recv(&mut other).await, json!(["EOSE", "other"]));
    assert!(timeout(Duration::from_millis(300), watcher.next()).await.is_err());
}

#[tokio::test]
async fn test_unreachable_upstream_degrades_to_local() {
    // Bind then drop to get a port with nothing listening
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (addr, _engine) = spawn_relay(bridged_config(vec![dead], 200)).await;
    let mut ws = connect(addr).await;

    let local = make_event("local", &[]);
    send(&mut ws, json!(["EVENT", local])).await;
    assert_eq!(recv(&mut ws).await[2], true);

    send(&mut ws, json!(["REQ", "s", {}])).await;
    assert_eq!(recv(&mut ws).await, json!(["EVENT", "s", local]));
    assert_eq!(recv(&mut ws).await, json!(["EOSE", "s"]));
}

#[tokio::test]
async fn test_startup_sync_merges_recent_history() {
    let remote = make_event("history", &[]);
    let mut stub = StubUpstream::start(vec![remote.clone()]).await;
    let (_addr, engine) = spawn_relay(bridged_config(vec![stub.url.clone()], 300)).await;

    assert_eq!(engine.sync_from_upstream().await, 1);
    assert!(engine.contains_event(remote["id"].as_str().unwrap()));

    let req = stub.next_frame().await;
    assert!(req[1].as_str().unwrap().starts_with("sync_"));
    assert_eq!(req[2]["limit"], 200);
    let since = req[2]["since"].as_i64().unwrap();
    assert!(since <= chrono::Utc::now().timestamp() - 86_399);

    // A second sync finds nothing new
    assert_eq!(engine.sync_from_upstream().await, 0);
}

#[tokio::test]
async fn test_startup_sync_without_upstream_is_noop() {
    let (_addr, engine) = spawn_relay(bridged_config(vec![], 300)).await;
    assert_eq!(engine.sync_from_upstream().await, 0);
}

#[tokio::test]
async fn test_verified_events_are_published_upstream() {
    let mut stub = StubUpstream::start(vec![]).await;
    let mut config = bridged_config(vec![stub.url.clone()], 300);
    config.nostr.disable_signature = false;
    let (addr, _engine) = spawn_relay(config).await;
    let mut ws = connect(addr).await;

    let event = signed_event("outbound");
    send(&mut ws, json!(["EVENT", event])).await;
    assert_eq!(recv(&mut ws).await, json!(["OK", event["id"], true, ""]));

    assert_eq!(stub.next_frame().await, json!(["EVENT", event]));
}

#[tokio::test]
async fn test_resent_event_is_published_again() {
    let mut stub = StubUpstream::start(vec![]).await;
    let mut config = bridged_config(vec![stub.url.clone()], 300);
    config.nostr.disable_signature = false;
    let (addr, engine) = spawn_relay(config).await;
    let mut ws = connect(addr).await;

    let event = signed_event("resent");
    for _ in 0..2 {
        send(&mut ws, json!(["EVENT", event])).await;
        assert_eq!(recv(&mut ws).await, json!(["OK", event["id"], true, ""]));
        assert_eq!(stub.next_frame().await, json!(["EVENT", event]));
    }
    assert_eq!(engine.event_count(), 1);
}

#[tokio::test]
async fn test_unverified_events_are_not_published_upstream() {
    let mut stub = StubUpstream::start(vec![]).await;
    let (addr, _engine) = spawn_relay(bridged_config(vec![stub.url.clone()], 300)).await;
    let mut ws = connect(addr).await;

    let event = make_event("stays local", &[]);
    send(&mut ws, json!(["EVENT", event])).await;
    assert_eq!(recv(&mut ws).await[2], true);

    let forwarded = timeout(Duration::from_millis(500), stub.received.recv()).await;
    assert!(forwarded.is_err(), "unexpected upstream frame: {:?}", forwarded);
}
