//! Bot Framework Direct Line conversation backend.
//!
//! ```text
//! connect: POST /tokens/generate (secret) ─► POST /conversations (token)
//! poller:  GET /conversations/{id}/activities?watermark=… ─► TranscriptFeed
//!          POST /tokens/refresh at half the token lifetime
//! send:    POST /conversations/{id}/activities
//! ```
//!
//! Poll and refresh failures after connect are published on the health
//! channel and cleared by the next successful poll.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use voxlink_core::error::BackendError;
use voxlink_core::types::{Role, TranscriptTurn};

use crate::config::BackendConfig;
use crate::feed::TranscriptFeed;
use crate::provider::{ConversationBackend, Subscription};

/// Used when the service omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 1_800;

// ─── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    conversation_id: Option<String>,
    #[serde(rename = "expires_in")]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivitySet {
    #[serde(default)]
    activities: Vec<Activity>,
    watermark: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Option<String>,
    pub from: Option<ChannelAccount>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutgoingActivity<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    from: ChannelAccount,
    text: &'a str,
}

/// Map Direct Line activities to transcript turns. Only `message` activities
/// with an id are turns. Only an author with role `bot` is the assistant;
/// everything else, including activities without `from`, is never spoken.
pub fn activities_to_turns(activities: &[Activity]) -> Vec<TranscriptTurn> {
    activities
        .iter()
        .filter(|a| a.kind == "message")
        .filter_map(|a| {
            let id = a.id.clone()?;
            let role = match &a.from {
                Some(from) if from.role.as_deref() == Some("bot") => Role::Assistant,
                _ => Role::User,
            };
            Some(TranscriptTurn::new(id, role, a.text.clone().unwrap_or_default()))
        })
        .collect()
}

// ─── Client ────────────────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    base_url: String,
    conversation_id: String,
    user_id: String,
    token: Mutex<String>,
}

impl Client {
    fn token(&self) -> String {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn send(&self, text: &str) -> Result<(), BackendError> {
        let activity = OutgoingActivity {
            kind: "message",
            from: ChannelAccount {
                id: self.user_id.clone(),
                role: None,
            },
            text,
        };
        let resp = self
            .http
            .post(format!(
                "{}/conversations/{}/activities",
                self.base_url, self.conversation_id
            ))
            .bearer_auth(self.token())
            .json(&activity)
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("send failed: {e}")))?;
        check_status(resp).await.map(drop)
    }

    async fn activities(&self, watermark: Option<&str>) -> Result<ActivitySet, BackendError> {
        let mut request = self
            .http
            .get(format!(
                "{}/conversations/{}/activities",
                self.base_url, self.conversation_id
            ))
            .bearer_auth(self.token());
        if let Some(watermark) = watermark {
            request = request.query(&[("watermark", watermark)]);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("poll failed: {e}")))?;
        check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Transport(format!("invalid activity set: {e}")))
    }

    async fn refresh(&self) -> Result<Duration, BackendError> {
        let resp = self
            .http
            .post(format!("{}/tokens/refresh", self.base_url))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| BackendError::Token(format!("refresh failed: {e}")))?;
        let refreshed: TokenResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Token(format!("invalid refresh response: {e}")))?;
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = refreshed.token;
        Ok(lifetime(refreshed.expires_in))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        Err(BackendError::Token(format!("{status}: {body}")))
    } else {
        Err(BackendError::Transport(format!("{status}: {body}")))
    }
}

fn lifetime(expires_in: Option<u64>) -> Duration {
    Duration::from_secs(expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS))
}

// ─── Backend ───────────────────────────────────────────────────────────────

pub struct DirectLineBackend {
    client: Arc<Client>,
    feed: Arc<TranscriptFeed>,
    health: Arc<watch::Sender<Option<BackendError>>>,
    poller: JoinHandle<()>,
}

impl DirectLineBackend {
    /// Exchange the secret for a token, start a conversation and begin polling.
    pub async fn connect(config: &BackendConfig) -> Result<Self, BackendError> {
        let secret = config
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BackendError::Unavailable("Direct Line secret not configured".into()))?;
        let http = reqwest::Client::new();
        let base_url = config.directline_url.trim_end_matches('/').to_string();

        let resp = http
            .post(format!("{base_url}/tokens/generate"))
            .bearer_auth(secret)
            .json(&serde_json::json!({ "user": { "id": config.user_id } }))
            .send()
            .await
            .map_err(|e| BackendError::Token(format!("token request failed: {e}")))?;
        let generated: TokenResponse = check_status(resp)
            .await
            .map_err(|e| BackendError::Token(e.to_string()))?
            .json()
            .await
            .map_err(|e| BackendError::Token(format!("invalid token response: {e}")))?;

        let resp = http
            .post(format!("{base_url}/conversations"))
            .bearer_auth(&generated.token)
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("conversation start failed: {e}")))?;
        let started: TokenResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Transport(format!("invalid conversation response: {e}")))?;

        let conversation_id = started
            .conversation_id
            .or(generated.conversation_id)
            .ok_or_else(|| BackendError::Transport("no conversation id returned".into()))?;
        info!("direct line conversation {conversation_id} started");

        let client = Arc::new(Client {
            http,
            base_url,
            conversation_id,
            user_id: config.user_id.clone(),
            token: Mutex::new(started.token),
        });
        let feed = Arc::new(TranscriptFeed::new());
        let health = Arc::new(watch::Sender::new(None));
        let poller = tokio::spawn(poll_activities(
            client.clone(),
            feed.clone(),
            health.clone(),
            Duration::from_millis(config.poll_interval_ms.max(100)),
            lifetime(started.expires_in.or(generated.expires_in)),
        ));

        Ok(Self {
            client,
            feed,
            health,
            poller,
        })
    }
}

impl Drop for DirectLineBackend {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[async_trait]
impl ConversationBackend for DirectLineBackend {
    async fn send(&self, text: &str) -> Result<(), BackendError> {
        self.client.send(text).await
    }

    fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    fn health(&self) -> watch::Receiver<Option<BackendError>> {
        self.health.subscribe()
    }
}

/// Publish `error` only when it differs from the current health.
fn publish(health: &watch::Sender<Option<BackendError>>, error: Option<BackendError>) {
    health.send_if_modified(move |current| {
        if *current == error {
            return false;
        }
        *current = error;
        true
    });
}

async fn poll_activities(
    client: Arc<Client>,
    feed: Arc<TranscriptFeed>,
    health: Arc<watch::Sender<Option<BackendError>>>,
    interval: Duration,
    token_lifetime: Duration,
) {
    let mut watermark: Option<String> = None;
    let mut refresh_at = Instant::now() + token_lifetime / 2;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if Instant::now() >= refresh_at {
            match client.refresh().await {
                Ok(lifetime) => {
                    debug!("direct line token refreshed");
                    refresh_at = Instant::now() + lifetime / 2;
                }
                Err(e) => {
                    warn!("direct line: {e}");
                    refresh_at = Instant::now() + interval * 10;
                    publish(&health, Some(e));
                }
            }
        }

        match client.activities(watermark.as_deref()).await {
            Ok(set) => {
                publish(&health, None);
                let turns = activities_to_turns(&set.activities);
                if !turns.is_empty() {
                    feed.append(turns);
                }
                if set.watermark.is_some() {
                    watermark = set.watermark;
                }
            }
            Err(e) => {
                warn!("direct line: {e}");
                publish(&health, Some(e));
            }
        }
    }
}
