use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod context;
mod control;
mod dispatch;
mod game_api;
mod metrics;
mod presence;
mod relay;
#[cfg(test)]
mod test_helpers;

use crate::config::{FileConfig, load_config};
use crate::context::BridgeContext;
use crate::control::{ControlChannel, ControlConfig};
use crate::dispatch::Dispatcher;
use crate::game_api::RestGameApi;
use crate::metrics::BridgeMetrics;
use crate::presence::PresencePoller;
use crate::relay::RelayState;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Bridge between a management platform and a poll-only game server")]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = "tether.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Override the local relay port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "tether=debug,tether_core=debug,tower_http=debug,info"
    } else {
        "tether=info,tether_core=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut file_config: FileConfig = load_config(&cli.config)
        .extract()
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        file_config.relay.port = port;
    }
    file_config.validate()?;

    info!("Starting Tether");

    let metrics = Arc::new(BridgeMetrics::new());
    let game = Arc::new(RestGameApi::new(
        &file_config.game.api_url,
        &file_config.game.admin_password,
        file_config.game.request_timeout(),
    )?);
    let ctx = Arc::new(BridgeContext::new(
        game,
        file_config.relay.lookup_timeout(),
        metrics.clone(),
    ));

    let cancel = CancellationToken::new();
    let dispatcher = Arc::new(Dispatcher::new(ctx.clone()));
    let channel = ControlChannel::new(
        ControlConfig {
            url: file_config.control.url.clone(),
            identity_token: file_config.control.identity_token.clone(),
            registration_token: file_config.control.registration_token.clone(),
            backoff: file_config.control.backoff(),
            connect_timeout: file_config.control.connect_timeout(),
        },
        dispatcher,
        metrics,
        cancel.clone(),
    );
    channel.connect();

    let poller = PresencePoller::new(ctx.clone(), channel.clone());
    let presence_task = tokio::spawn(poller.run(
        file_config.presence.poll_interval(),
        cancel.clone(),
    ));

    let app = relay::router(RelayState::new(ctx, channel.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan));

    let addr = file_config.relay.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind relay on {addr}"))?;
    info!("Relay listening on http://{}", listener.local_addr()?);

    let shutdown_signal = {
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received shutdown signal, cleaning up...");
            cancel.cancel();
        }
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Relay server error");

    channel.shutdown();
    if let Err(e) = presence_task.await {
        warn!("Presence poller did not stop cleanly: {}", e);
    }

    info!("Shutdown complete");
    server_result
}
