//! CATS protocol integration tests.
//!
//! Each test builds a real [`catsd::server::Server`] bound to an ephemeral
//! localhost port, drives its accept loop as a background Tokio task, and
//! talks to it with a real `cats-client` connection over a real TCP socket —
//! end to end: bootstrap, encode, compress, frame, send, and the matching
//! read back. Both ends run in this one test binary; the protocol is a
//! single long-lived connection, not a multi-host deployment, so there is no
//! process or network-namespace topology to model here.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cats_client::{dial, Config};
use cats_codec::codec::{EncodeInput, Payload};
use cats_codec::files::FileSource;
use cats_core::config::CatsConfig;
use cats_core::Headers;
use catsd::dispatch::Api;
use catsd::handlers::{
    EchoHandler, FilesEchoHandler, FormHandler, InteractiveHandler, SignInHandler, ThrottleHandler, ECHO_HANDLER_ID,
    FILES_ECHO_HANDLER_ID, FORM_HANDLER_ID, INTERACTIVE_HANDLER_ID, SIGN_IN_HANDLER_ID, THROTTLE_HANDLER_ID,
};
use catsd::server::Server;

/// Spin up a server with the demo handlers registered, on an OS-assigned
/// port, and return its address plus the `Server` handle (tests that drive
/// `broadcast` need the latter). The accept loop runs for the lifetime of
/// the test binary; there's no shutdown path because process exit reclaims
/// the port, matching how the demo binary itself runs.
async fn spawn_server() -> (SocketAddr, Arc<Server>) {
    let mut config = CatsConfig::default();
    config.network.host = "127.0.0.1".to_string();
    config.network.port = 0;

    let mut api = Api::new();
    api.register(ECHO_HANDLER_ID, Arc::new(EchoHandler::default()), None, None).unwrap();
    api.register(FORM_HANDLER_ID, Arc::new(FormHandler::default()), None, None).unwrap();
    api.register(INTERACTIVE_HANDLER_ID, Arc::new(InteractiveHandler::default()), None, None).unwrap();
    api.register(SIGN_IN_HANDLER_ID, Arc::new(SignInHandler::default()), None, None).unwrap();
    api.register(THROTTLE_HANDLER_ID, Arc::new(ThrottleHandler::default()), None, None).unwrap();
    api.register(FILES_ECHO_HANDLER_ID, Arc::new(FilesEchoHandler::default()), None, None).unwrap();

    let server = Server::new(config, api);
    let listener = server.bind().await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let server = Arc::new(server);
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });

    (addr, server)
}

// `Payload` has no `Debug` impl in the production codec path; wrap it here
// so failure messages stay readable.
struct PayloadDebug<'a>(&'a Payload);

impl std::fmt::Debug for PayloadDebug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Payload::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Payload::Document(v) => write!(f, "Document({v})"),
            Payload::Files(fs) => write!(f, "Files({} files)", fs.len()),
        }
    }
}

fn payload_bytes(payload: &Payload) -> &[u8] {
    match payload {
        Payload::Bytes(b) => b,
        other => panic!("expected a bytes payload, got {:?}", PayloadDebug(other)),
    }
}

// ── Scenario A: echo bytes ─────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_echo_bytes() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let (headers, payload) = client
        .send(ECHO_HANDLER_ID, EncodeInput::Bytes(b"\x01\x02\x03".to_vec()), Headers::default(), None)
        .await
        .expect("send");

    assert_eq!(headers.status(), 200);
    assert_eq!(payload_bytes(&payload), b"\x01\x02\x03");
}

// ── Scenario B: echo with skip ─────────────────────────────────────────────

#[tokio::test]
async fn scenario_b_echo_with_skip() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let mut headers = Headers::default();
    headers.insert("Skip", serde_json::json!(5)).expect("insert Skip header");

    let (_headers, payload) =
        client.send(ECHO_HANDLER_ID, EncodeInput::Bytes(b"1234567890".to_vec()), headers, None).await.expect("send");

    assert_eq!(payload_bytes(&payload), b"67890");
}

// ── Scenario C: JSON form validation ───────────────────────────────────────

#[tokio::test]
async fn scenario_c_form_accepts_valid_document() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let doc = serde_json::json!({"id": 3, "name": "cifrazia"});
    let (headers, payload) =
        client.send(FORM_HANDLER_ID, EncodeInput::Document(doc), Headers::default(), None).await.expect("send");

    assert_eq!(headers.status(), 200);
    match payload {
        Payload::Document(v) => {
            assert!(v.get("token").and_then(|t| t.as_str()).is_some());
            assert!(v.get("code").and_then(|c| c.as_str()).is_some());
        }
        other => panic!("expected a document payload, got {:?}", PayloadDebug(&other)),
    }
}

#[tokio::test]
async fn scenario_c_form_rejects_non_object_payload() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let doc = serde_json::json!("not even an object");
    let (headers, _payload) =
        client.send(FORM_HANDLER_ID, EncodeInput::Document(doc), Headers::default(), None).await.expect("send");

    assert_eq!(headers.status(), 400);
}

#[tokio::test]
async fn scenario_c_form_rejects_out_of_range_id() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let doc = serde_json::json!({"id": 99, "name": "cifrazia"});
    let (headers, _payload) =
        client.send(FORM_HANDLER_ID, EncodeInput::Document(doc), Headers::default(), None).await.expect("send");

    assert_eq!(headers.status(), 400);
}

// ── Scenario E: interactive input ──────────────────────────────────────────

#[tokio::test]
async fn scenario_e_interactive_yes_reply() {
    let (addr, _server) = spawn_server().await;
    let (client, mut incoming) = dial(addr, Config::default()).await.expect("dial");

    let send_client = client.clone();
    let send_task = tokio::spawn(async move {
        send_client
            .send(INTERACTIVE_HANDLER_ID, EncodeInput::Bytes(b"start".to_vec()), Headers::default(), None)
            .await
            .expect("send")
    });

    let question = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
        .await
        .expect("timed out waiting for input")
        .expect("channel closed");
    assert_eq!(payload_bytes(&question.payload), b"Are you ok?");

    client.reply_input(question.message_id, EncodeInput::Bytes(b"yes".to_vec()), Headers::default()).await.expect("reply");

    let (headers, payload) = tokio::time::timeout(Duration::from_secs(2), send_task).await.expect("send task timed out").expect("join");

    assert_eq!(headers.status(), 200);
    assert_eq!(payload_bytes(&payload), b"Nice!");
}

#[tokio::test]
async fn scenario_e_interactive_cancel_yields_500() {
    let (addr, _server) = spawn_server().await;
    let (client, mut incoming) = dial(addr, Config::default()).await.expect("dial");

    let send_client = client.clone();
    let send_task = tokio::spawn(async move {
        send_client
            .send(INTERACTIVE_HANDLER_ID, EncodeInput::Bytes(b"start".to_vec()), Headers::default(), None)
            .await
            .expect("send")
    });

    let question = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
        .await
        .expect("timed out waiting for input")
        .expect("channel closed");

    client.cancel_input(question.message_id).await.expect("cancel");

    let (headers, _payload) = tokio::time::timeout(Duration::from_secs(2), send_task).await.expect("send task timed out").expect("join");

    assert_eq!(headers.status(), 500);
}

// ── Scenario F: rate-limited echo ──────────────────────────────────────────

#[tokio::test]
async fn scenario_f_unthrottled_echo_is_fast() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let payload = vec![b'x'; 100_000];
    let start = std::time::Instant::now();
    let (_headers, out) = client.send(ECHO_HANDLER_ID, EncodeInput::Bytes(payload), Headers::default(), None).await.expect("send");
    let elapsed = start.elapsed();

    assert_eq!(payload_bytes(&out).len(), 100_000);
    assert!(elapsed < Duration::from_millis(1500), "unthrottled echo took {elapsed:?}");
}

#[tokio::test]
async fn scenario_f_throttled_echo_is_slower() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    client.set_download_speed(100_000).await.expect("set speed");

    let payload = vec![b'x'; 100_000];
    let start = std::time::Instant::now();
    let (_headers, out) =
        client.send(ECHO_HANDLER_ID, EncodeInput::Bytes(payload), Headers::default(), None).await.expect("send");
    let elapsed = start.elapsed();

    assert_eq!(payload_bytes(&out).len(), 100_000);
    assert!(elapsed >= Duration::from_millis(400), "throttled echo finished suspiciously fast: {elapsed:?}");
}

// ── Cross-cutting: ping keeps an idle connection alive ─────────────────────

#[tokio::test]
async fn ping_round_trip_does_not_error() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    client.ping().await.expect("ping");

    let (headers, payload) =
        client.send(ECHO_HANDLER_ID, EncodeInput::Bytes(b"still alive".to_vec()), Headers::default(), None).await.expect("send");
    assert_eq!(headers.status(), 200);
    assert_eq!(payload_bytes(&payload), b"still alive");
}

// ── Cross-cutting: large payload crosses the compression threshold ────────

#[tokio::test]
async fn large_payload_round_trips_through_compression() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let payload = vec![b'z'; 20_000];
    let (headers, out) =
        client.send(ECHO_HANDLER_ID, EncodeInput::Bytes(payload.clone()), Headers::default(), None).await.expect("send");

    assert_eq!(headers.status(), 200);
    assert_eq!(payload_bytes(&out), payload.as_slice());
}

// ── Cross-cutting: unknown handler id surfaces as a 404 ────────────────────

#[tokio::test]
async fn unknown_handler_id_yields_404_and_keeps_connection_open() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let (headers, _payload) =
        client.send(0x7fff, EncodeInput::Bytes(b"nobody home".to_vec()), Headers::default(), None).await.expect("send");
    assert_eq!(headers.status(), 404);

    let (headers, payload) =
        client.send(ECHO_HANDLER_ID, EncodeInput::Bytes(b"still here".to_vec()), Headers::default(), None).await.expect("send");
    assert_eq!(headers.status(), 200);
    assert_eq!(payload_bytes(&payload), b"still here");
}

// ── Cross-cutting: channel broadcast reaches signed-in members only ───────

#[tokio::test]
async fn signed_in_connection_receives_broadcast_to_its_model_and_model_id_channels() {
    let (addr, server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let received = Arc::new(std::sync::Mutex::new(Vec::<Vec<u8>>::new()));
    let sink = received.clone();
    client.subscribe(
        ECHO_HANDLER_ID,
        Arc::new(move |_headers, payload| {
            if let Payload::Bytes(b) = payload {
                sink.lock().unwrap().push(b);
            }
        }),
    );

    let doc = serde_json::json!({"model_name": "user", "id": "42"});
    let (_headers, _payload) = client.send(SIGN_IN_HANDLER_ID, EncodeInput::Document(doc), Headers::default(), None).await.expect("sign in");

    server.broadcast("model_user", ECHO_HANDLER_ID, EncodeInput::Bytes(b"hello room".to_vec()), Headers::default()).await;
    server
        .broadcast("model_user:42", ECHO_HANDLER_ID, EncodeInput::Bytes(b"hello you specifically".to_vec()), Headers::default())
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let seen = received.lock().unwrap().clone();
    assert_eq!(seen, vec![b"hello room".to_vec(), b"hello you specifically".to_vec()]);
}

#[tokio::test]
async fn signed_out_connection_receives_no_broadcast() {
    let (addr, server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let received = Arc::new(std::sync::Mutex::new(Vec::<Vec<u8>>::new()));
    let sink = received.clone();
    client.subscribe(
        ECHO_HANDLER_ID,
        Arc::new(move |_headers, payload| {
            if let Payload::Bytes(b) = payload {
                sink.lock().unwrap().push(b);
            }
        }),
    );

    let doc = serde_json::json!({"model_name": "user", "id": "42"});
    client.send(SIGN_IN_HANDLER_ID, EncodeInput::Document(doc), Headers::default(), None).await.expect("sign in");
    client.send(SIGN_IN_HANDLER_ID, EncodeInput::Document(serde_json::json!({})), Headers::default(), None).await.expect("sign out");

    server.broadcast("model_user", ECHO_HANDLER_ID, EncodeInput::Bytes(b"hello room".to_vec()), Headers::default()).await;
    server
        .broadcast("model_user:42", ECHO_HANDLER_ID, EncodeInput::Bytes(b"hello you specifically".to_vec()), Headers::default())
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(received.lock().unwrap().is_empty());
}

// ── Cross-cutting: files codec round-trips over the wire, offset and all ──

#[tokio::test]
async fn files_codec_round_trips_with_an_offset_spanning_one_whole_source() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    let sources = vec![
        FileSource::Bytes { key: "a".into(), name: "a.txt".into(), mime: None, bytes: b"hello".to_vec() },
        FileSource::Bytes { key: "b".into(), name: "b.txt".into(), mime: None, bytes: b"world!".to_vec() },
    ];
    let mut headers = Headers::default();
    headers.insert("Offset", serde_json::Value::from(5)).unwrap();

    let (_headers, payload) =
        client.send(FILES_ECHO_HANDLER_ID, EncodeInput::Files(sources), headers, None).await.expect("send files");

    let files = match payload {
        Payload::Files(f) => f,
        other => panic!("expected a files payload, got {:?}", PayloadDebug(&other)),
    };

    // Source "a" was entirely consumed by the offset and should round-trip
    // as empty, not desync the framing or reappear with stale contents.
    let mut a = Vec::new();
    std::fs::File::open(files.get("a").unwrap().path()).unwrap().read_to_end(&mut a).unwrap();
    assert!(a.is_empty());

    let mut b = Vec::new();
    std::fs::File::open(files.get("b").unwrap().path()).unwrap().read_to_end(&mut b).unwrap();
    assert_eq!(b, b"world!");
}

// ── Cross-cutting: download-speed negotiation also flows server→client ────

#[tokio::test]
async fn server_can_ask_the_client_to_repace_the_clients_own_outbound_stream() {
    let (addr, _server) = spawn_server().await;
    let (client, _incoming) = dial(addr, Config::default()).await.expect("dial");

    // THROTTLE_HANDLER_ID sends a DownloadSpeed action back down the wire;
    // the client's read loop applies it to its own outbound `Delay`, so the
    // *next* thing this client sends is what gets paced, not the server's
    // reply to this call.
    client
        .send(THROTTLE_HANDLER_ID, EncodeInput::Bytes(100_000u32.to_be_bytes().to_vec()), Headers::default(), None)
        .await
        .expect("ask server to re-pace this client");

    let payload = vec![b'x'; 100_000];
    let start = std::time::Instant::now();
    let (_headers, out) = client.send(ECHO_HANDLER_ID, EncodeInput::Bytes(payload), Headers::default(), None).await.expect("send");
    let elapsed = start.elapsed();

    assert_eq!(payload_bytes(&out).len(), 100_000);
    assert!(elapsed >= Duration::from_millis(400), "client's re-paced send finished suspiciously fast: {elapsed:?}");
}
