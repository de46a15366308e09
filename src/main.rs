//! framegate - binary entry point.
//!
//! Wires the four core components (engine, manager, dispatcher, discovery)
//! together, restores persisted parsers and bindings, then runs either the
//! TCP server or a short simulated stream.

mod simulate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use framegate_engine::Engine;
use framegate_gateway::{Discovery, DiscoveryConfig, Dispatcher, FlightPolicy, Manager, TcpServer};
use framegate_providers::{OracleClient, ProviderKind};
use framegate_types::Signature;

const STORAGE_DIR: &str = "./storage";
const SEED_DIR: &str = "./seeds";
const SYSTEM_PROMPT: &str = "agents/system_prompt.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Provider {
    /// Local generator (simple prompt/response JSON protocol).
    Local,
    /// Hosted generator (generateContent protocol, needs GEMINI_API_KEY).
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Replay a small built-in stream through the gateway and exit.
    Simulate,
    /// Accept raw frames over TCP.
    Server,
}

#[derive(Debug, Parser)]
#[command(name = "framegate", about = "Self-extending binary protocol gateway", version)]
struct Cli {
    /// Oracle provider used for discovery and repair.
    #[arg(long, value_enum, default_value_t = Provider::Cloud)]
    provider: Provider,

    /// Model name (defaults depend on the provider).
    #[arg(long)]
    model: Option<String>,

    /// Oracle API endpoint (defaults depend on the provider).
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long, value_enum, default_value_t = Mode::Simulate)]
    mode: Mode,

    /// Listen address for server mode.
    #[arg(long, default_value = "127.0.0.1:9000")]
    addr: String,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn effective_model(&self) -> String {
        match (&self.model, self.provider) {
            (Some(model), _) => model.clone(),
            (None, Provider::Local) => "deepseek-coder:1.3b".to_string(),
            (None, Provider::Cloud) => "gemini-2.0-flash".to_string(),
        }
    }

    fn effective_endpoint(&self) -> String {
        match (&self.endpoint, self.provider) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Provider::Local) => "http://localhost:11434/api/generate".to_string(),
            (None, Provider::Cloud) => {
                "https://generativelanguage.googleapis.com/v1beta/models".to_string()
            }
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let engine = Arc::new(Engine::new());
    let manager = Arc::new(
        Manager::new(
            Arc::clone(&engine),
            STORAGE_DIR,
            Some(PathBuf::from(SEED_DIR)),
        )
        .context("failed to open storage directory")?,
    );

    manager
        .seed_parsers()
        .context("failed to copy seed parsers")?;

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&manager)));

    // restore parsers and their self-declared signatures
    let declared = manager
        .load_saved_parsers()
        .context("failed to load saved parsers")?;
    for (protocol, signature) in declared {
        tracing::info!(protocol = %protocol, signature = %signature, "restored parser binding");
        dispatcher.bind(&signature, protocol);
    }

    // the manifest is authoritative and wins over source comments
    match manager.load_manifest() {
        Ok(manifest) => {
            for (hex_sig, protocol) in manifest {
                match Signature::from_hex(&hex_sig) {
                    Ok(signature) => {
                        tracing::info!(protocol = %protocol, signature = %signature, "restored manifest binding");
                        dispatcher.bind(&signature, protocol);
                    }
                    Err(e) => {
                        tracing::warn!(signature = %hex_sig, "skipping bad manifest entry: {e}");
                    }
                }
            }
        }
        Err(e) => tracing::warn!("could not read manifest, starting with source bindings: {e}"),
    }

    let kind = match cli.provider {
        Provider::Local => ProviderKind::Local,
        Provider::Cloud => ProviderKind::Cloud,
    };
    let oracle = OracleClient::new(kind, cli.effective_model(), cli.effective_endpoint());
    let discovery = Arc::new(Discovery::new(
        Arc::clone(&dispatcher),
        Arc::clone(&manager),
        oracle,
        DiscoveryConfig {
            max_retries: 3,
            policy: FlightPolicy::Block,
            prompt_path: PathBuf::from(SYSTEM_PROMPT),
            ..DiscoveryConfig::default()
        },
    ));

    match cli.mode {
        Mode::Simulate => simulate::run(&dispatcher, &manager, &discovery).await,
        Mode::Server => {
            let server = TcpServer::new(Arc::clone(&dispatcher), discovery);
            server
                .listen_and_serve(&cli.addr)
                .await
                .with_context(|| format!("failed to serve on {}", cli.addr))?;
            Ok(())
        }
    }
}
