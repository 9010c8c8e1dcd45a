//! vlwg - VLESS-over-WebSocket tunneling gateway
//!
//! Terminates an inbound WebSocket upgrade, authenticates the client by
//! a shared identifier, parses a VLESS request header from the first
//! frame, and shuttles bytes full-duplex between the WebSocket and an
//! outbound socket until either side closes.

mod config;
mod dialer;
mod identity;
mod routes;
mod tunnel;
mod wsstream;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vlwg_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("starting vlwg on {}:{}", config.host, config.port);
    if !config.fallback_hosts.is_empty() {
        tracing::info!(fallback_hosts = ?config.fallback_hosts, "fallback destinations configured");
    }

    let redis_client = match &config.redis_url {
        Some(url) => {
            tracing::info!("connecting to dynamic identity backend...");
            Some(identity::init_client(url).await?)
        }
        None => {
            tracing::info!("no REDIS_URL set; dynamic identity backend disabled");
            None
        }
    };

    let identity_store = identity::IdentityStore::new(config.static_identifier, redis_client);
    let dialer = dialer::OutboundDialer::new(config.fallback_hosts.clone(), config.connect_timeout);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = routes::AppState::new(config, identity_store, dialer);

    // Only `/health` is routed by path; every other request is handed to
    // the dispatcher (C6), which decides between the tunnel engine and
    // the management surface based on the `Upgrade` header (spec §4.6).
    let app = Router::new()
        .route("/health", get(health_check))
        .fallback(routes::gateway::dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
