//! # LearnCat Backend - Main Application Entry Point
//!
//! HTTP and WebSocket server for the LearnCat learning app.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared application state, session accounting and metrics
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and per-endpoint metrics
//! - **handlers**: HTTP request handlers and route table
//! - **audio**: Microphone sample framing and 16-bit PCM encoding
//! - **websocket**: Per-connection host for the frame accumulator
//! - **judge**: Language-model backed answer judging
//! - **store**: Game session persistence
//! - **error**: Error types and HTTP error responses

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod judge;
mod middleware;
mod state;
mod store;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use judge::OpenAiJudge;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::SqliteGameSessionStore;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once a termination signal arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Startup order:
/// 1. `.env`, tracing and configuration
/// 2. Judge client and game session store
/// 3. HTTP server with CORS, tracing, metrics and request logging
/// 4. Graceful stop on SIGTERM/SIGINT
#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting learncat-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    if config.judge.api_key.trim().is_empty() {
        warn!("No judge API key configured; /api/v1/judge will answer with fallback verdicts");
    }

    let judge = OpenAiJudge::new().context("Failed to build judge HTTP client")?;
    let store = SqliteGameSessionStore::open(&config.database.path)
        .with_context(|| format!("Failed to open game session store at {}", config.database.path))?;

    let app_state = AppState::new(config.clone(), Arc::new(judge), Arc::new(store));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Middleware runs in reverse registration order on the way in.
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging filtered by `RUST_LOG`, defaulting to
/// `learncat_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "learncat_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialise tracing")?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise [`SHUTDOWN_SIGNAL`] on the first one.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
