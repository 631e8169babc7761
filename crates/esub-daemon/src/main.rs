//! esub-daemon entry point.
//!
//! This file is intentionally thin: it loads config, sets up tracing, builds
//! the subscription manager and shared state, wires middleware, and starts
//! the HTTP server.  All route handlers live in `routes.rs`; all shared state
//! types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use esub_config::{load_layered_yaml, resolve_secrets};
use esub_core::{FanoutSink, SubscriptionManager};
use esub_daemon::{routes, state};
use esub_remote::{PaperSubscriptionService, SharedCredentials, SubscriptionService};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "esub-daemon")]
#[command(about = "Event subscription manager daemon", long_about = None)]
struct Args {
    /// Config layers, merged in order (later wins).
    #[arg(long = "config", default_value = "config/base.yaml")]
    config: Vec<String>,

    /// Overrides `daemon.addr` from config.
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();
    let args = Args::parse();

    let paths: Vec<&str> = args.config.iter().map(String::as_str).collect();
    let loaded = load_layered_yaml(&paths)?;
    let settings = loaded.settings()?;
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");

    // Missing app credentials do not stop the process: the manager comes up
    // degraded and the status route reports why.
    let secrets = resolve_secrets(&settings.credentials);
    let credentials = Arc::new(SharedCredentials::new(
        secrets.as_ref().ok().and_then(|s| s.access_token.clone()),
    ));

    let paper = Arc::new(PaperSubscriptionService::new());
    let notifications = paper.notifications();
    let remote = paper.clone();
    let manager = Arc::new(SubscriptionManager::connect(
        &settings,
        credentials.clone(),
        move || {
            let secrets = secrets?;
            debug!(?secrets, "app credentials resolved");
            Ok(remote as Arc<dyn SubscriptionService>)
        },
    ));
    manager.spawn_notification_pump(notifications);

    let fanout = Arc::new(FanoutSink::new());
    state::register_configured(&manager, &fanout, &settings.subscriptions);
    state::spawn_refresh_watcher(credentials);

    let shared = Arc::new(
        state::AppState::new(Arc::clone(&manager), fanout).with_config_hash(loaded.config_hash),
    );

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_for(&settings.daemon.cors_origins));

    let addr = match args.addr {
        Some(a) => a,
        None => settings
            .daemon
            .addr
            .parse()
            .with_context(|| format!("invalid daemon.addr '{}'", settings.daemon.addr))?,
    };
    info!("esub-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    manager.shutdown();
    info!("esub-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// CORS limited to the configured overlay origins. Unparseable entries are
/// logged and skipped.
fn cors_for(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid cors origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
