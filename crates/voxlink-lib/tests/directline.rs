//! Direct Line backend against a loopback fake of the Direct Line REST API.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use common::{RecordingSynth, ScriptedRecognizer, eventually};
use voxlink_lib::VoiceSession;
use voxlink_lib::config::BackendConfig;
use voxlink_lib::directline::DirectLineBackend;
use voxlink_lib::provider::ConversationBackend;
use voxlink_lib::voxlink_core::error::BackendError;
use voxlink_lib::voxlink_core::types::{ReplayPolicy, TranscriptTurn};

const SECRET: &str = "dl-secret";
const CONVERSATION: &str = "conv-1";

#[derive(Debug, Clone)]
struct Seen {
    path: String,
    auth: Option<String>,
    watermark: Option<String>,
}

/// In-memory Direct Line service. Status overrides of 0 mean "answer 200".
struct FakeDirectLine {
    seen: Mutex<Vec<Seen>>,
    generate_body: Mutex<Option<Value>>,
    activities: Mutex<Vec<Value>>,
    sent: Mutex<Vec<Value>>,
    expires_in: u64,
    refreshes: AtomicUsize,
    poll_status: AtomicU16,
    send_status: AtomicU16,
}

impl FakeDirectLine {
    fn new(expires_in: u64) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::default(),
            generate_body: Mutex::default(),
            activities: Mutex::default(),
            sent: Mutex::default(),
            expires_in,
            refreshes: AtomicUsize::new(0),
            poll_status: AtomicU16::new(0),
            send_status: AtomicU16::new(0),
        })
    }

    fn record(&self, path: &str, headers: &HeaderMap, watermark: Option<String>) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().unwrap().push(Seen {
            path: path.to_string(),
            auth,
            watermark,
        });
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn polls(&self) -> Vec<Seen> {
        self.seen()
            .into_iter()
            .filter(|s| s.path == "GET activities")
            .collect()
    }

    fn bot_says(&self, text: &str) {
        let mut activities = self.activities.lock().unwrap();
        let id = format!("{CONVERSATION}|{:07}", activities.len());
        activities.push(json!({
            "type": "message",
            "id": id,
            "from": {"id": "voxlink-bot", "role": "bot"},
            "text": text,
        }));
    }

    fn token(&self, token: &str) -> Json<Value> {
        Json(json!({
            "conversationId": CONVERSATION,
            "token": token,
            "expires_in": self.expires_in,
        }))
    }
}

fn overridden(status: &AtomicU16) -> Option<StatusCode> {
    match status.load(Ordering::SeqCst) {
        0 => None,
        code => StatusCode::from_u16(code).ok(),
    }
}

async fn generate(
    State(dl): State<Arc<FakeDirectLine>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    dl.record("POST tokens/generate", &headers, None);
    *dl.generate_body.lock().unwrap() = Some(body);
    let expected = format!("Bearer {SECRET}");
    let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if auth != Some(expected.as_str()) {
        return (StatusCode::FORBIDDEN, "unknown secret").into_response();
    }
    dl.token("token-generated").into_response()
}

async fn start_conversation(
    State(dl): State<Arc<FakeDirectLine>>,
    headers: HeaderMap,
) -> Json<Value> {
    dl.record("POST conversations", &headers, None);
    dl.token("token-conversation")
}

async fn refresh(State(dl): State<Arc<FakeDirectLine>>, headers: HeaderMap) -> Json<Value> {
    dl.record("POST tokens/refresh", &headers, None);
    dl.refreshes.fetch_add(1, Ordering::SeqCst);
    dl.token("token-refreshed")
}

async fn list_activities(
    State(dl): State<Arc<FakeDirectLine>>,
    Path(_conversation): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let watermark = query.get("watermark").cloned();
    dl.record("GET activities", &headers, watermark.clone());
    if let Some(status) = overridden(&dl.poll_status) {
        return (status, "token expired").into_response();
    }
    let activities = dl.activities.lock().unwrap().clone();
    let from = watermark.and_then(|w| w.parse().ok()).unwrap_or(0usize);
    let page: Vec<Value> = activities[from.min(activities.len())..].to_vec();
    Json(json!({
        "activities": page,
        "watermark": activities.len().to_string(),
    }))
    .into_response()
}

async fn post_activity(
    State(dl): State<Arc<FakeDirectLine>>,
    Path(_conversation): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    dl.record("POST activities", &headers, None);
    if let Some(status) = overridden(&dl.send_status) {
        return (status, "denied").into_response();
    }
    dl.sent.lock().unwrap().push(body.clone());
    let mut activities = dl.activities.lock().unwrap();
    let id = format!("{CONVERSATION}|{:07}", activities.len());
    let author = body["from"]["id"].clone();
    let text = body["text"].clone();
    activities.push(json!({
        "type": "message",
        "id": id,
        "from": {"id": author, "role": "user"},
        "text": text,
    }));
    Json(json!({ "id": id })).into_response()
}

async fn start(dl: Arc<FakeDirectLine>) -> BackendConfig {
    let app = Router::new()
        .route("/tokens/generate", post(generate))
        .route("/tokens/refresh", post(refresh))
        .route("/conversations", post(start_conversation))
        .route(
            "/conversations/{id}/activities",
            get(list_activities).post(post_activity),
        )
        .with_state(dl);
    BackendConfig {
        directline_url: common::serve(app).await,
        secret: Some(SECRET.into()),
        poll_interval_ms: 100,
        ..BackendConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_exchanges_the_secret_then_starts_a_conversation() {
    common::init_tracing();
    let dl = FakeDirectLine::new(3600);
    let config = start(dl.clone()).await;

    let _backend = DirectLineBackend::connect(&config).await.unwrap();
    eventually("first poll", || !dl.polls().is_empty()).await;

    let seen = dl.seen();
    assert_eq!(seen[0].path, "POST tokens/generate");
    assert_eq!(seen[0].auth.as_deref(), Some("Bearer dl-secret"));
    assert_eq!(seen[1].path, "POST conversations");
    assert_eq!(seen[1].auth.as_deref(), Some("Bearer token-generated"));
    assert_eq!(
        dl.generate_body.lock().unwrap().clone(),
        Some(json!({"user": {"id": "voxlink-user"}}))
    );

    let polls = dl.polls();
    let first_poll = &polls[0];
    assert_eq!(first_poll.auth.as_deref(), Some("Bearer token-conversation"));
    assert_eq!(first_poll.watermark, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_secret_is_a_token_error() {
    let dl = FakeDirectLine::new(3600);
    let config = BackendConfig {
        secret: Some("wrong".into()),
        ..start(dl.clone()).await
    };

    match DirectLineBackend::connect(&config).await {
        Err(BackendError::Token(msg)) => assert!(msg.contains("403"), "{msg}"),
        Err(other) => panic!("expected a token error, got {other:?}"),
        Ok(_) => panic!("connect succeeded with a rejected secret"),
    }
    assert!(dl.polls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bot_messages_arrive_once_and_the_watermark_advances() {
    let dl = FakeDirectLine::new(3600);
    let config = start(dl.clone()).await;
    let backend = DirectLineBackend::connect(&config).await.unwrap();
    let mut sub = backend.subscribe();
    assert!(sub.current.is_empty());

    dl.bot_says("**Hallo!**");
    let snapshot = tokio::time::timeout(Duration::from_secs(5), sub.updates.recv())
        .await
        .expect("no transcript update")
        .unwrap();
    assert_eq!(
        snapshot,
        vec![TranscriptTurn::assistant("conv-1|0000000", "**Hallo!**")]
    );

    eventually("a poll with the new watermark", || {
        dl.polls()
            .iter()
            .any(|p| p.watermark.as_deref() == Some("1"))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sub.updates.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_posts_a_message_activity_as_the_user() {
    let dl = FakeDirectLine::new(3600);
    let config = start(dl.clone()).await;
    let backend = DirectLineBackend::connect(&config).await.unwrap();

    backend.send("Wie spät ist es?").await.unwrap();

    assert_eq!(
        dl.sent.lock().unwrap().clone(),
        vec![json!({
            "type": "message",
            "from": {"id": "voxlink-user"},
            "text": "Wie spät ist es?",
        })]
    );
    let post = dl
        .seen()
        .into_iter()
        .find(|s| s.path == "POST activities")
        .unwrap();
    assert_eq!(post.auth.as_deref(), Some("Bearer token-conversation"));

    // The echo comes back as a user turn.
    eventually("echo in transcript", || {
        backend
            .subscribe()
            .current
            .iter()
            .any(|t| t.text == "Wie spät ist es?")
    })
    .await;
    let turns = backend.subscribe().current;
    assert_eq!(
        turns,
        vec![TranscriptTurn::user("conv-1|0000000", "Wie spät ist es?")]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unauthorized_send_is_a_token_error() {
    let dl = FakeDirectLine::new(3600);
    let config = start(dl.clone()).await;
    let backend = DirectLineBackend::connect(&config).await.unwrap();

    dl.send_status.store(401, Ordering::SeqCst);
    assert!(matches!(
        backend.send("hallo").await,
        Err(BackendError::Token(msg)) if msg.contains("401")
    ));

    dl.send_status.store(500, Ordering::SeqCst);
    assert!(matches!(
        backend.send("hallo").await,
        Err(BackendError::Transport(msg)) if msg.contains("500")
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_is_refreshed_at_half_its_lifetime() {
    let dl = FakeDirectLine::new(1);
    let config = start(dl.clone()).await;
    let _backend = DirectLineBackend::connect(&config).await.unwrap();

    eventually("a refresh", || dl.refreshes.load(Ordering::SeqCst) > 0).await;
    let refresh = dl
        .seen()
        .into_iter()
        .find(|s| s.path == "POST tokens/refresh")
        .unwrap();
    assert_eq!(refresh.auth.as_deref(), Some("Bearer token-conversation"));

    eventually("a poll with the refreshed token", || {
        dl.polls()
            .iter()
            .any(|p| p.auth.as_deref() == Some("Bearer token-refreshed"))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_polls_surface_in_session_status_until_recovery() {
    common::init_tracing();
    let dl = FakeDirectLine::new(3600);
    let config = start(dl.clone()).await;
    let backend = Arc::new(DirectLineBackend::connect(&config).await.unwrap());
    let session = VoiceSession::start(
        ScriptedRecognizer::new([]),
        RecordingSynth::new(),
        backend,
        ReplayPolicy::SkipHistory,
    );
    assert_eq!(session.status().backend_error, None);

    dl.poll_status.store(403, Ordering::SeqCst);
    eventually("backend error in status", || {
        session
            .status()
            .backend_error
            .is_some_and(|e| e.contains("403"))
    })
    .await;
    let status = session.status();
    assert!(status.message.starts_with("Conversation unavailable"), "{}", status.message);

    dl.poll_status.store(0, Ordering::SeqCst);
    eventually("backend error cleared", || {
        session.status().backend_error.is_none()
    })
    .await;
    assert_eq!(session.status().message, "Conversation restored");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bot_reply_is_spoken_through_the_session() {
    let dl = FakeDirectLine::new(3600);
    let config = start(dl.clone()).await;
    let backend = Arc::new(DirectLineBackend::connect(&config).await.unwrap());
    let synth = RecordingSynth::new();
    let session = VoiceSession::start(
        ScriptedRecognizer::new([]),
        synth.clone(),
        backend,
        ReplayPolicy::SkipHistory,
    );

    dl.bot_says("**Es ist <b>zwölf</b> Uhr.**");
    eventually("speech", || !synth.spoken().is_empty()).await;
    assert_eq!(synth.spoken(), vec!["Es ist zwölf Uhr."]);
    assert_eq!(session.last_spoken().as_deref(), Some("conv-1|0000000"));
}
