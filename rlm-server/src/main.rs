//! HTTP surface for the reasoning loop.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use rlm::io::config::load_config_with_env;
use rlm::step::StepEngine;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "rlm-server")]
#[command(about = "HTTP server for single-step and multi-turn reasoning")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Path to the TOML configuration file
    #[arg(long, default_value = "rlm.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    rlm::logging::init("rlm_server=info,rlm=info");

    let args = Args::parse();

    let config = load_config_with_env(&args.config)?;
    info!(
        config = %args.config.display(),
        project_root = %config.project_root.display(),
        mock_mode = config.mock_mode,
        "starting rlm-server"
    );

    // Blocking HTTP clients must be created before entering the runtime.
    let engine = StepEngine::from_config(config)?;
    let state = AppState::new(engine);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    // `state` outlives the runtime so the engine is dropped outside async code.
    let result = runtime.block_on(serve(state.clone(), addr));
    drop(runtime);
    drop(state);
    result
}

async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::api_router())
        .layer(cors)
        .with_state(state);

    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
