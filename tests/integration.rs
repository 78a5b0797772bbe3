//! End-to-end tests against an in-process fake replication daemon.
//!
//! The fake daemon implements the HTTP surface the peer connector speaks
//! (`/whoami`, `/feed`, `/blobs`, `/blobs/has`) plus a tiny image host for
//! ingestion tests. Blob writes are confirmed only after a configurable
//! number of availability polls, mimicking the store's asynchronous write.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use notefeed::config::{
    BlobsConfig, Config, IdentityConfig, IngestConfig, PeerConfig, RecipientsConfig,
};
use notefeed::ingest::{self, IngestOptions};
use notefeed::models::FeedNote;
use notefeed::peer::{blob_ref, PeerClient};
use notefeed::{boxing, encode, keystore, publish, tail};

const DAEMON_ID: &str = "@fakedaemon=.ed25519";
const PEER_ID: &str = "@peerfeed=.ed25519";

#[derive(Default)]
struct DaemonState {
    entries: Vec<Value>,
    /// blob ref → remaining 404 polls before the blob reads as available
    blobs: HashMap<String, u32>,
    blob_delay: u32,
}

type Shared = Arc<Mutex<DaemonState>>;

async fn start_daemon(blob_delay: u32) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(DaemonState {
        blob_delay,
        ..Default::default()
    }));

    let app = Router::new()
        .route("/whoami", get(handle_whoami))
        .route("/feed", post(handle_publish).get(handle_read_feed))
        .route("/blobs", post(handle_blob_add))
        .route("/blobs/has", get(handle_blob_has))
        .route("/img/{name}", get(handle_image))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

async fn handle_whoami() -> Json<Value> {
    Json(json!({ "id": DAEMON_ID }))
}

async fn handle_publish(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = state.lock().unwrap();
    let seq = s.entries.len() as i64 + 1;
    let prev = s
        .entries
        .last()
        .map(|e| e["key"].as_str().unwrap().to_string());
    let entry = json!({
        "key": format!("%entry{}", seq),
        "value": {
            "author": DAEMON_ID,
            "sequence": seq,
            "previous": prev,
            "timestamp": 1_700_000_000_000i64 + seq,
            "content": body["content"],
        }
    });
    s.entries.push(entry.clone());
    Json(entry)
}

async fn handle_read_feed(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> String {
    let author = params.get("author").cloned().unwrap_or_default();
    let gt: i64 = params
        .get("gt")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let s = state.lock().unwrap();
    s.entries
        .iter()
        .filter(|e| e["value"]["author"] == author.as_str())
        .filter(|e| e["value"]["sequence"].as_i64().unwrap_or(0) > gt)
        .map(|e| format!("{}\n", e))
        .collect()
}

async fn handle_blob_add(State(state): State<Shared>, body: Bytes) -> StatusCode {
    let mut s = state.lock().unwrap();
    let delay = s.blob_delay;
    s.blobs.insert(blob_ref(&body), delay);
    StatusCode::ACCEPTED
}

async fn handle_blob_has(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    let wanted = params.get("ref").cloned().unwrap_or_default();
    let mut s = state.lock().unwrap();
    match s.blobs.get_mut(&wanted) {
        None => StatusCode::NOT_FOUND,
        Some(0) => StatusCode::OK,
        Some(remaining) => {
            *remaining -= 1;
            StatusCode::NOT_FOUND
        }
    }
}

async fn handle_image(AxumPath(name): AxumPath<String>) -> (StatusCode, Vec<u8>) {
    if name == "broken.png" {
        (StatusCode::NOT_FOUND, Vec::new())
    } else {
        (StatusCode::OK, format!("image-bytes:{}", name).into_bytes())
    }
}

fn test_config(base_url: &str, dir: &Path) -> Config {
    Config {
        identity: IdentityConfig {
            path: dir.join("secret"),
        },
        peer: PeerConfig {
            base_url: base_url.to_string(),
            connect_timeout_secs: 2,
            request_timeout_secs: 5,
        },
        recipients: RecipientsConfig {
            path: dir.join("recipients.json"),
        },
        blobs: BlobsConfig {
            poll_interval_ms: 10,
            poll_max_attempts: 5,
        },
        ingest: IngestConfig {
            max_concurrent_fetches: 3,
            fetch_timeout_secs: 5,
        },
    }
}

fn sample_note(is_public: bool) -> Value {
    json!({
        "rowid": 5,
        "title": "Hi",
        "url": "http://e.com",
        "tags": "a,b",
        "description": "d",
        "comments": "",
        "annotations": "",
        "created_at": "2024-01-01T00:00:00Z",
        "is_public": is_public,
    })
}

fn write_note_file(dir: &Path, note: &Value) -> std::path::PathBuf {
    let path = dir.join("note.json");
    std::fs::write(&path, serde_json::to_string(note).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn publish_public_note_emits_receipt_and_cleartext_entry() {
    let (base_url, state) = start_daemon(0).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&base_url, tmp.path());
    let note_path = write_note_file(tmp.path(), &sample_note(true));

    let receipt_line = publish::run_publish(&cfg, Some(note_path), false)
        .await
        .unwrap();
    let receipt: FeedNote = serde_json::from_str(&receipt_line).unwrap();

    assert_eq!(receipt.note_title, "Hi");
    assert_eq!(receipt.note_tags, "a,b");
    assert_eq!(receipt.author, DAEMON_ID);
    assert_eq!(receipt.seq, 1);
    assert!(receipt.is_public);
    assert_eq!(receipt.key, "%entry1");
    assert_eq!(receipt.prev, None);

    // The entry the daemon stored is a cleartext post object.
    let s = state.lock().unwrap();
    let content = &s.entries[0]["value"]["content"];
    assert_eq!(content["type"], "post");
    assert!(content["text"]
        .as_str()
        .unwrap()
        .starts_with(encode::BRANDING));
    assert_eq!(content["localnative"]["note"]["title"], "Hi");
    assert!(content["localnative"]["note"].get("rowid").is_none());
    assert!(content.get("recps").is_none());
}

#[tokio::test]
async fn publish_private_note_seals_before_the_daemon_sees_it() {
    let (base_url, state) = start_daemon(0).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&base_url, tmp.path());

    // A real recipient whose secret key we hold, to prove decryptability.
    let recipient_dir = TempDir::new().unwrap();
    let recipient = keystore::load_or_create(&recipient_dir.path().join("secret")).unwrap();
    std::fs::write(
        &cfg.recipients.path,
        serde_json::to_string(&vec![recipient.id()]).unwrap(),
    )
    .unwrap();

    let note_path = write_note_file(tmp.path(), &sample_note(false));
    let receipt_line = publish::run_publish(&cfg, Some(note_path), false)
        .await
        .unwrap();
    let receipt: FeedNote = serde_json::from_str(&receipt_line).unwrap();
    assert!(!receipt.is_public);

    // What crossed the wire is an opaque ciphertext string.
    let ciphertext = {
        let s = state.lock().unwrap();
        s.entries[0]["value"]["content"]
            .as_str()
            .expect("private content must be a string")
            .to_string()
    };
    assert!(ciphertext.ends_with(".box"));
    assert!(!ciphertext.contains("Hi"));

    // The named recipient can unbox it back to the full message.
    let plain = boxing::open(&ciphertext, recipient.signing_key()).unwrap();
    let message: Value = serde_json::from_slice(&plain).unwrap();
    assert_eq!(message["type"], "post");
    assert_eq!(message["localnative"]["note"]["title"], "Hi");
    assert_eq!(message["recps"][0], recipient.id());
}

#[tokio::test]
async fn publish_private_without_recipients_fails_with_no_output() {
    let (base_url, state) = start_daemon(0).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&base_url, tmp.path());
    std::fs::write(&cfg.recipients.path, "[]").unwrap();

    let note_path = write_note_file(tmp.path(), &sample_note(false));
    let err = publish::run_publish(&cfg, Some(note_path), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("recipient"));

    // Nothing was committed to the log.
    assert!(state.lock().unwrap().entries.is_empty());
}

/// Seed the fake daemon with a five-entry peer feed where only entry 3
/// (private, addressed to us) and entries 4-5 (public posts) match.
fn seed_peer_feed(state: &Shared, our_key: ed25519_dalek::VerifyingKey) {
    let mut make = |seq: i64, content: Value| {
        state.lock().unwrap().entries.push(json!({
            "key": format!("%peer{}", seq),
            "value": {
                "author": PEER_ID,
                "sequence": seq,
                "previous": if seq > 1 { json!(format!("%peer{}", seq - 1)) } else { Value::Null },
                "timestamp": 1_600_000_000_000i64 + seq,
                "content": content,
            }
        }));
    };

    let other = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);

    let private_note = |title: &str| {
        json!({
            "type": "post",
            "text": format!("2024-01-01T00:00:00Z\n**{}**", title),
            "mentions": [],
            "localnative": { "note": {
                "title": title, "url": "http://p.com", "tags": "t",
                "description": "", "comments": "", "annotations": "",
                "created_at": "2024-01-01T00:00:00Z",
            }},
        })
    };

    // 1: unrelated plain entry
    make(1, json!({"type": "contact", "contact": "@x.ed25519", "following": true}));
    // 2: ciphertext not addressed to us
    let foreign = boxing::seal(
        &serde_json::to_vec(&private_note("foreign")).unwrap(),
        &[other.verifying_key()],
    )
    .unwrap();
    make(2, json!(foreign));
    // 3: ciphertext addressed to us — the first real match
    let ours = boxing::seal(
        &serde_json::to_vec(&private_note("for us")).unwrap(),
        &[our_key],
    )
    .unwrap();
    make(3, json!(ours));
    // 4, 5: public posts that must never be reached in the first pass
    make(4, private_note("later public 4"));
    make(5, private_note("later public 5"));
}

#[tokio::test]
async fn tail_emits_first_match_only_and_resumes_from_checkpoint() {
    let (base_url, state) = start_daemon(0).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&base_url, tmp.path());

    let identity = keystore::load_or_create(&cfg.identity.path).unwrap();
    seed_peer_feed(&state, identity.verifying_key());

    // First pass: entry 3 matches; 4 and 5 are never emitted.
    let found = tail::run_tail(&cfg, PEER_ID, 0).await.unwrap().unwrap();
    assert_eq!(found.seq, 3);
    assert_eq!(found.note_title, "for us");
    assert!(!found.is_public);
    assert_eq!(found.author, PEER_ID);
    assert_eq!(found.key, "%peer3");
    assert_eq!(found.prev, Some("%peer2".to_string()));

    // Scheduler advances the checkpoint and re-invokes.
    let next = tail::run_tail(&cfg, PEER_ID, 3).await.unwrap().unwrap();
    assert_eq!(next.seq, 4);
    assert_eq!(next.note_title, "later public 4");
    assert!(next.is_public);

    // Caught up past the end: empty batch, no match.
    let done = tail::run_tail(&cfg, PEER_ID, 5).await.unwrap();
    assert!(done.is_none());
}

#[tokio::test]
async fn tail_of_unknown_feed_returns_none() {
    let (base_url, _state) = start_daemon(0).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&base_url, tmp.path());

    let result = tail::run_tail(&cfg, "@nobody=.ed25519", 0).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn ingest_blobs_reachable_images_and_tolerates_a_broken_one() {
    let (base_url, state) = start_daemon(1).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&base_url, tmp.path());
    let client = PeerClient::connect(&cfg).await.unwrap();

    let html = format!(
        r#"<h1>Snapshot</h1>
           <p>first <img alt="one" src="{base}/img/a.png"> then
              <img alt="two" src="{base}/img/b.png"> and
              <img alt="bad" src="{base}/img/broken.png"></p>"#,
        base = base_url
    );
    let opts = IngestOptions {
        title: "My Page".to_string(),
        url: "http://example.com/page".to_string(),
        ignore_broken_img_links: true,
        as_blob: false,
    };

    let md = ingest::ingest(&client, &cfg, &html, &opts).await.unwrap();

    let ref_a = blob_ref(b"image-bytes:a.png");
    let ref_b = blob_ref(b"image-bytes:b.png");
    assert!(md.contains(&format!("![one]({})", ref_a)));
    assert!(md.contains(&format!("![two]({})", ref_b)));
    assert!(md.contains("![bad]()"));

    assert!(md.starts_with("\u{feff}# My Page"));
    assert!(md.ends_with("[source](http://example.com/page)\n"));
    assert!(!md.contains("\n\n\n"));

    // Both reachable images were replicated to the blob store.
    let s = state.lock().unwrap();
    assert!(s.blobs.contains_key(&ref_a));
    assert!(s.blobs.contains_key(&ref_b));
}

#[tokio::test]
async fn ingest_as_blob_stores_markdown_and_returns_its_ref() {
    let (base_url, state) = start_daemon(1).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&base_url, tmp.path());
    let client = PeerClient::connect(&cfg).await.unwrap();

    let opts = IngestOptions {
        title: "Plain".to_string(),
        url: "http://e.com".to_string(),
        ignore_broken_img_links: false,
        as_blob: true,
    };
    let returned = ingest::ingest(&client, &cfg, "<p>no images here</p>", &opts)
        .await
        .unwrap();

    assert!(returned.starts_with('&'));
    assert!(returned.ends_with(".sha256"));
    assert!(state.lock().unwrap().blobs.contains_key(&returned));
}

#[tokio::test]
async fn blob_confirmation_timeout_surfaces_as_error() {
    // The store never confirms within the poll budget.
    let (base_url, _state) = start_daemon(100).await;
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&base_url, tmp.path());
    cfg.blobs.poll_max_attempts = 2;
    let client = PeerClient::connect(&cfg).await.unwrap();

    let opts = IngestOptions {
        title: "t".to_string(),
        url: "u".to_string(),
        ignore_broken_img_links: false,
        as_blob: true,
    };
    let err = ingest::ingest(&client, &cfg, "<p>x</p>", &opts)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not retrievable after 2 attempts"));
}

#[tokio::test]
async fn connect_fails_fast_when_daemon_is_down() {
    // Grab a port that nothing is listening on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&format!("http://{}", addr), tmp.path());

    let err = PeerClient::connect(&cfg).await.unwrap_err();
    assert!(err.to_string().contains("unreachable"));
}
