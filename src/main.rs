//! GenAI MCP Server
//!
//! Stateless MCP server exposing generative-AI and event-directory tools over
//! JSON-RPC on HTTP.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use genai_mcp_server::config::{Args, Config, LogFormat};
use genai_mcp_server::mcp::lifecycle::{spawn_signal_handler, RegistryFactory, Supervisor};
use genai_mcp_server::metrics::Metrics;
use genai_mcp_server::{http, tools, VERSION};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    init_tracing(args.debug, args.log_format);

    // Build configuration from args
    let config: Config = args.into();

    info!("GenAI MCP Server v{}", VERSION);
    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; Gemini tools will return errors");
    }
    if config.connpass_api_key.is_none() {
        warn!("CONNPASS_API_KEY is not set; event tools will return errors");
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let factory: RegistryFactory = Arc::new(tools::build_registry);
    let supervisor = Supervisor::new(Arc::new(config), Metrics::new(), shutdown.clone(), factory);

    match http::start_server(supervisor, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}
