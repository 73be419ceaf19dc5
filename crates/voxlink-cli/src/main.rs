//! voxlink CLI: voice session server and its remote control.
//!
//! ```text
//! voxlink serve [--config voxlink.json] [--host 127.0.0.1] [--port 2003] [--voice de-DE-KatjaNeural]
//! voxlink listen / stop / mute / status [--server http://localhost:2003]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxlink_lib::config::VoiceConfig;
use voxlink_lib::directline::DirectLineBackend;
use voxlink_lib::provider::{ConversationBackend, UnavailableBackend};
use voxlink_lib::stt::AzureRecognizer;
use voxlink_lib::tts::AzureSynthesizer;
use voxlink_lib::voxlink_core::types::ReplayPolicy;
use voxlink_lib::{VoiceSession, server};

const DEFAULT_SERVER: &str = "http://localhost:2003";
const DEFAULT_LOG_FILTER: &str = "voxlink_lib=debug,voxlink=info";

/// voxlink: speak to a chat bot and hear its answers
#[derive(Parser)]
#[command(name = "voxlink", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice session behind the HTTP control API
    Serve {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen host
        #[arg(long)]
        host: Option<String>,
        /// Listen port
        #[arg(long)]
        port: Option<u16>,
        /// Azure Speech region
        #[arg(long)]
        region: Option<String>,
        /// Synthesis voice
        #[arg(long)]
        voice: Option<String>,
        /// Recognition and synthesis language
        #[arg(long)]
        language: Option<String>,
        /// What to do with messages already in the conversation
        #[arg(long, value_enum)]
        replay: Option<Replay>,
    },
    /// Capture one utterance and send it
    Listen {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Cancel the capture in progress
    Stop {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Toggle mute
    Mute {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Show session status
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Replay {
    SkipHistory,
    SpeakLatest,
}

impl From<Replay> for ReplayPolicy {
    fn from(replay: Replay) -> Self {
        match replay {
            Replay::SkipHistory => ReplayPolicy::SkipHistory,
            Replay::SpeakLatest => ReplayPolicy::SpeakLatest,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            region,
            voice,
            language,
            replay,
        } => {
            let mut config = VoiceConfig::load(config.as_deref())?;
            config.apply_env(|name| std::env::var(name).ok());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(region) = region {
                config.speech.region = region;
            }
            if let Some(voice) = voice {
                config.speech.voice = voice;
            }
            if let Some(language) = language {
                config.speech.recognition_language = language.clone();
                config.speech.synthesis_language = language;
            }
            if let Some(replay) = replay {
                config.session.replay_policy = replay.into();
            }
            config.validate()?;
            serve(config).await
        }

        Command::Listen { server } => request(&server, "capture/start", true).await,
        Command::Stop { server } => request(&server, "capture/stop", true).await,
        Command::Mute { server } => request(&server, "mute", true).await,
        Command::Status { server } => request(&server, "status", false).await,
    }
}

async fn serve(config: VoiceConfig) -> anyhow::Result<()> {
    let recognizer = Arc::new(AzureRecognizer::new(&config.speech)?);
    let synthesizer = Arc::new(AzureSynthesizer::new(&config.speech)?);

    let backend: Arc<dyn ConversationBackend> =
        match DirectLineBackend::connect(&config.backend).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                warn!("continuing without conversation: {e}");
                Arc::new(UnavailableBackend::new(e))
            }
        };

    let session = VoiceSession::start(
        recognizer,
        synthesizer,
        backend,
        config.session.replay_policy,
    );
    let app = server::router(session.clone());

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("voxlink listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("server error")?;

    session.shutdown();
    Ok(())
}

async fn request(server: &str, endpoint: &str, post: bool) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{}/{endpoint}", server.trim_end_matches('/'));
    let builder = if post { client.post(&url) } else { client.get(&url) };
    let resp = builder
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let pretty = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or(body);
    println!("{pretty}");

    if !status.is_success() {
        bail!("server answered {status}");
    }
    Ok(())
}
