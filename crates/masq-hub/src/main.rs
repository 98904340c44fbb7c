use axum::{routing::get, Router};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::pipeline::PipelineSettings;
use crate::workspace::Workspace;

mod api;
mod error;
mod pipeline;
mod source;
mod workspace;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "masq-hub", version = "0.1.0", about = "MASQ Export Hub")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:4000")]
    bind: String,

    /// Root of the request workspace (resources/processed, resources/logs)
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Path to config file
    #[arg(long, default_value = "masq-hub.toml")]
    config: PathBuf,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Clone)]
struct Config {
    #[serde(default = "default_block_size")]
    block_size: u64,
    #[serde(default = "default_workers")]
    readers: usize,
    #[serde(default = "default_workers")]
    transformers: usize,
    #[serde(default = "default_queue_capacity")]
    raw_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    processed_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            readers: default_workers(),
            transformers: default_workers(),
            raw_queue_capacity: default_queue_capacity(),
            processed_queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_block_size() -> u64 {
    100_000
}
fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    65_536
}

impl Config {
    fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            block_size: self.block_size.max(1),
            readers: self.readers.max(1),
            transformers: self.transformers.max(1),
            raw_capacity: self.raw_queue_capacity.max(1),
            processed_capacity: self.processed_queue_capacity.max(1),
        }
    }
}

// =============================================================================
// Application State
// =============================================================================

pub struct AppState {
    workspace: Workspace,
    settings: PipelineSettings,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "masq_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        let content = std::fs::read_to_string(&args.config).unwrap_or_default();
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("ignoring malformed config {:?}: {err}", args.config);
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    let state = Arc::new(AppState {
        workspace: Workspace::new(&args.workspace),
        settings: config.pipeline_settings(),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/request/list", get(api::request_list))
        .route("/request/info", get(api::request_info))
        .route("/request/{request_id}", get(api::export_request))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = args.bind.parse().expect("Invalid bind address");
    tracing::info!("MASQ Export Hub");
    tracing::info!("  API:       http://{}/request/list", addr);
    tracing::info!("  Workspace: {:?}", args.workspace);
    tracing::info!(
        "  Pipeline:  block_size={} readers={} transformers={}",
        config.block_size,
        config.readers,
        config.transformers
    );

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
