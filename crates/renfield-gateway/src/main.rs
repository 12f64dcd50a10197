use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod collaborators_stub;
mod devices;
mod error;
mod http;
mod notifications;
mod turn_queue;
mod ws;

use renfield_core::config::RenfieldConfig;

/// CLI entrypoint for the interaction-routing engine (§2). Every other knob
/// lives in the config file / `RENFIELD_*` env vars (§6 environment
/// surface) — this only carries what a caller needs before config is even
/// loaded.
#[derive(Debug, Parser)]
#[command(name = "renfield-gateway", version, about = "Renfield Device Gateway")]
struct Cli {
    /// Path to renfield.toml. Falls back to RENFIELD_CONFIG, then
    /// ~/.renfield/renfield.toml.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renfield_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: explicit path > RENFIELD_CONFIG env > ~/.renfield/renfield.toml
    let config = RenfieldConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        RenfieldConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = app::AppState::new(config);
    let router = app::build_router(Arc::clone(&state));

    spawn_idle_sweep(Arc::clone(&state));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, git_sha = env!("RENFIELD_GIT_SHA"), "renfield gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Three missed 30s heartbeats is the spec's 90s idle tolerance default
/// (§5). The registry only flips `online`; it never closes a socket itself.
fn spawn_idle_sweep(state: Arc<app::AppState>) {
    use renfield_core::config::HEARTBEAT_INTERVAL_SECS;

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            tick.tick().await;
            let stale = state.devices.sweep_idle(chrono::Duration::seconds(3 * HEARTBEAT_INTERVAL_SECS as i64));
            if stale > 0 {
                tracing::debug!(stale, "swept idle devices offline");
            }
            state.session_registry.evict_idle(std::time::Duration::from_secs(3 * HEARTBEAT_INTERVAL_SECS));
        }
    });
}
