#![forbid(unsafe_code)]

//! `requester` — demo peer that drives a protocol negotiation.
//!
//! Dials a provider over the length-delimited TCP demo transport, exchanges
//! DID hello frames, negotiates a protocol for the given requirement, and
//! exits 0 only when negotiation and both code generations succeed.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_accord::codegen::LlmCodeGenerator;
use agent_accord::llm::OpenAiCompatClient;
use agent_accord::mux::SessionMultiplexer;
use agent_accord::negotiator::RequesterContext;
use agent_accord::session::MetaSession;
use agent_accord::transport::tcp;
use agent_accord::{AppError, EngineConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "requester", about = "Demo negotiation requester", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the local DID document (JSON with an `id` field).
    #[arg(long)]
    did_document: PathBuf,

    /// Provider address to dial, e.g. `127.0.0.1:8765`.
    #[arg(long)]
    peer: String,

    /// Natural-language protocol requirement.
    #[arg(long)]
    requirement: String,

    /// Expected input format description.
    #[arg(long)]
    input_description: String,

    /// Expected output format description.
    #[arg(long)]
    output_description: String,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
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
            error!(%err, "requester failed");
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
    info!(%local_did, peer = %args.peer, "dialing provider");

    let link = tcp::connect(args.peer.as_str(), &local_did).await?;
    let peer_did = link.peer_did.clone();

    let llm: Arc<dyn agent_accord::llm::LlmClient> = Arc::new(OpenAiCompatClient::new(&config.llm)?);
    let generator = Arc::new(LlmCodeGenerator::new(llm.clone()));
    let (mut session, handle) = MetaSession::requester(
        config,
        link.sink.clone(),
        llm,
        generator,
        RequesterContext {
            requirement: args.requirement,
            input_description: args.input_description,
            output_description: args.output_description,
        },
    );

    let mux = Arc::new(SessionMultiplexer::new());
    mux.register(peer_did.clone(), handle).await;

    let cancel = CancellationToken::new();
    let pump = tokio::spawn(tcp::pump(
        link.source,
        mux.clone(),
        peer_did.clone(),
        cancel.clone(),
    ));

    let outcome = session.negotiate_protocol().await;
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

