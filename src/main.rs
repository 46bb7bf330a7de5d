//! # stt-bridge - Main Application Entry Point
//!
//! A real-time speech-to-text bridge. Clients stream raw 16 kHz PCM over a
//! WebSocket and receive partial and final transcripts back as JSON.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, config file, environment)
//! - **transcription**: Whisper model loading and streaming recognizers
//! - **session**: the per-connection streaming state machine
//! - **websocket**: the actix actor that connects a socket to a session
//! - **health**: the `/health` endpoint
//! - **middleware**: request logging
//! - **error**: error taxonomy and HTTP error responses
//!
//! ## Startup Order:
//! 1. Load `.env`, initialise tracing, load and validate configuration
//! 2. Load the Whisper model; any failure exits before the port is bound
//! 3. Bind the listener and serve until SIGINT/SIGTERM

mod audio;
mod config;
mod device;
mod error;
mod health;
mod middleware;
mod session;
mod state;
mod transcription;
mod websocket;

#[cfg(test)]
mod testing;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::session::{SessionManager, TracingObserver};
use crate::state::AppState;
use crate::transcription::{RecognizerFactory, WhisperAssets, WhisperFactory};
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::load().map_err(AppError::from)?;
    config
        .validate()
        .map_err(|e| AppError::ConfigError(e.to_string()))?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let factory = match load_recognizer(&config).await {
        Ok(factory) => factory,
        Err(err) => {
            let err = AppError::ModelUnavailable(format!("{:#}", err));
            error!("{}", err);
            return Err(err.into());
        }
    };

    let model = factory.describe();
    let sessions = SessionManager::new(
        Arc::new(factory),
        Arc::new(TracingObserver),
        config.session.clone(),
    );
    let app_state = AppState::new(config.clone(), sessions);
    let bind_addr = config.bind_address();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Logger::default())
            .wrap(middleware::RequestLogging)
            .route("/health", web::get().to(health::health_check))
            .configure(websocket::configure)
    })
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run();

    info!("Listening on ws://{}", bind_addr);
    info!(
        "Model: {} ({}), {} Hz mono 16-bit PCM",
        model.name, model.source, model.sample_rate
    );

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

/// Initialise `tracing` with `RUST_LOG`, defaulting to
/// `stt_bridge=debug,actix_web=info`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stt_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the model and build the factory every session draws its
/// recognizer from.
async fn load_recognizer(config: &AppConfig) -> Result<WhisperFactory> {
    let device = device::device_from_config(&config.model.device);
    let assets = WhisperAssets::load(&config.model, device)
        .await
        .context("Failed to load Whisper model")?;

    Ok(WhisperFactory::new(assets, config.recognizer.clone()))
}

/// Resolve on SIGINT or SIGTERM.
#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        _ => {
            warn!("Failed to install signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C");
    }
}
