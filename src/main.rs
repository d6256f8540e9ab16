//! # Translation Gateway - Main Application Entry Point
//!
//! A real-time speech translation gateway: browser clients stream
//! microphone audio over a WebSocket, the gateway relays it to the cloud
//! speech service over a framed WebSocket protocol, and translated interim
//! and final results stream back to the client as they arrive. A
//! synchronous text-translation endpoint rides alongside.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state and metrics
//! - **language**: language-tag normalization gating every session
//! - **audio**: bounded audio ingress buffering
//! - **speech**: the upstream provider protocol, connection, and recognizer
//! - **registry**: concurrent session registry with idle eviction
//! - **websocket**: the streaming client bridge
//! - **handlers**: REST request handlers
//! - **health** / **middleware** / **error**: the service plumbing

mod audio;       // Audio ingress buffer (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod language;    // Language code normalization (language.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod registry;    // Session registry and idle sweeper (registry.rs)
mod service;     // Speech service capability trait (service.rs)
mod speech;      // Upstream speech service layer (speech/ directory)
mod state;       // Application state management (state.rs)
mod websocket;   // Streaming client bridge (websocket.rs)

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use registry::SessionRegistry;
use service::{AzureSpeechService, SpeechService};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag flipped by the signal handler task. Checked by the
/// shutdown waiter so the server can drain sessions before exiting.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    // Startup failures (missing credentials, unusable port) exit non-zero
    // before the listener binds.
    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting translation-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let registry = Arc::new(SessionRegistry::new());
    let speech: Arc<dyn SpeechService> = Arc::new(AzureSpeechService::new(
        config.speech.clone(),
        Arc::clone(&registry),
    ));
    let app_state = AppState::new(config.clone(), Arc::clone(&registry), speech);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Background idle eviction for abandoned streaming sessions.
    let sweeper = registry.run_sweeper(
        Duration::from_secs(config.streaming.sweep_interval_secs),
        Duration::from_secs(config.streaming.max_idle_secs),
    );

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/translate", web::post().to(handlers::translate_text))
                    .route(
                        "/streaming/start",
                        web::post().to(handlers::start_streaming_session),
                    )
                    .route(
                        "/streaming/process",
                        web::post().to(handlers::process_audio_chunk),
                    )
                    .route(
                        "/streaming/close",
                        web::post().to(handlers::close_streaming_session),
                    )
                    .route(
                        "/streaming/ws/{session_id}",
                        web::get().to(websocket::streaming_websocket),
                    ),
            )
            // Health check at root level as well, for load balancers.
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Every active session gets its terminal event and a normal
            // WebSocket close before the listener goes away.
            registry.shutdown_all().await;
            server_handle.stop(true).await;
        }
    }

    sweeper.abort();
    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "translation_gateway=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms; returns once it is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
