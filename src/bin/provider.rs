#![forbid(unsafe_code)]

//! `provider` — demo peer that answers protocol negotiations.
//!
//! Listens on the demo TCP transport, creates a provider session for the
//! first peer that connects (via the multiplexer's new-peer hook), waits
//! for the remote negotiation to finish, and exits 0 only when negotiation
//! and both code generations succeed.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_accord::codegen::LlmCodeGenerator;
use agent_accord::llm::{LlmClient, OpenAiCompatClient};
use agent_accord::mux::{ProviderSessionHook, SessionMultiplexer};
use agent_accord::negotiator::CapabilityInfoProvider;
use agent_accord::session::{MetaSession, SessionHandle, SessionOutcome};
use agent_accord::transport::{tcp, FrameSink};
use agent_accord::{AppError, EngineConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "provider", about = "Demo negotiation provider", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the local DID document (JSON with an `id` field).
    #[arg(long)]
    did_document: PathBuf,

    /// Address to listen on, e.g. `127.0.0.1:8765`.
    #[arg(long, default_value = "127.0.0.1:8765")]
    listen: String,

    /// Capability statement reported when the evaluator asks.
    #[arg(
        long,
        default_value = "This provider can implement JSON request/response protocols over an ordered message channel."
    )]
    capability: String,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// Capability callback answering with the configured statement.
struct StaticCapability(String);

#[async_trait]
impl CapabilityInfoProvider for StaticCapability {
    async fn get_capability_info(&self, _: &str, _: &str, _: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// New-peer hook: builds one provider session and runs its driver.
struct DemoProviderHook {
    config: Arc<EngineConfig>,
    llm: Arc<dyn LlmClient>,
    capability: Arc<dyn CapabilityInfoProvider>,
    sink: Arc<dyn FrameSink>,
    outcome_tx: Mutex<Option<oneshot::Sender<SessionOutcome>>>,
}

#[async_trait]
impl ProviderSessionHook for DemoProviderHook {
    async fn on_new_peer(&self, did: &str) -> Option<SessionHandle> {
        let Some(outcome_tx) = self.outcome_tx.lock().await.take() else {
            info!(%did, "already serving a peer, refusing session");
            return None;
        };

        info!(%did, "creating provider session");
        let generator = Arc::new(LlmCodeGenerator::new(self.llm.clone()));
        let (mut session, handle) = MetaSession::provider(
            self.config.clone(),
            self.sink.clone(),
            self.llm.clone(),
            generator,
            Some(self.capability.clone()),
        );

        tokio::spawn(async move {
            let outcome = session.wait_remote_negotiation().await;
            let _ = outcome_tx.send(outcome);
        });
        Some(handle)
    }
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!(%err, "provider failed");
            std::process::exit(2);
        }
    }
}

async fn run(args: Cli) -> Result<bool> {
    let mut config = if args.config.exists() {
        EngineConfig::load_from_path(&args.config)?
    } else {
        EngineConfig::default()
    };
    config.load_llm_credentials()?;
    let config = Arc::new(config);

    let local_did = load_did(&args.did_document)?;
    let listener = TcpListener::bind(args.listen.as_str())
        .await
        .map_err(|err| AppError::Transport(format!("cannot listen on {}: {err}", args.listen)))?;
    info!(%local_did, listen = %args.listen, "waiting for a requester");

    let link = tcp::accept_one(&listener, &local_did).await?;
    let peer_did = link.peer_did.clone();

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(&config.llm)?);
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let hook = Arc::new(DemoProviderHook {
        config,
        llm,
        capability: Arc::new(StaticCapability(args.capability)),
        sink: link.sink.clone(),
        outcome_tx: Mutex::new(Some(outcome_tx)),
    });

    let mux = Arc::new(SessionMultiplexer::with_provider_hook(hook));
    let cancel = CancellationToken::new();
    let pump = tokio::spawn(tcp::pump(
        link.source,
        mux.clone(),
        peer_did.clone(),
        cancel.clone(),
    ));

    let outcome = outcome_rx
        .await
        .map_err(|_| AppError::Transport("provider session ended without an outcome".into()))?;
    info!(
        success = outcome.success,
        module_path = ?outcome.module_path,
        "negotiation finished"
    );

    mux.deregister(&peer_did).await;
    cancel.cancel();
    let _ = pump.await;

    Ok(outcome.success)
}

fn load_did(path: &PathBuf) -> Result<String> {
    #[derive(serde::Deserialize)]
    struct DidDocument {
        id: String,
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("cannot read DID document: {err}")))?;
    let document: DidDocument = serde_json::from_str(&raw)
        .map_err(|err| AppError::Config(format!("invalid DID document: {err}")))?;
    Ok(document.id)
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}
