//! XwalkDriver server entry point
//!
//! Starts the HTTP command server: WebDriver-style JSON commands in, browser
//! automation out. Sessions run on dedicated worker tasks behind the session
//! manager; the HTTP layer only routes.
//!
//! ## Environment variables
//! - `XWALKDRIVER_HOST`: listen address (default: 127.0.0.1)
//! - `XWALKDRIVER_PORT`: listen port (default: 9515)
//! - `XWALKDRIVER_MAX_SESSIONS`: concurrent session cap (default: 16)
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use xwalkdriver::config::Config;
use xwalkdriver::server;
use xwalkdriver::session::SessionManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing - respect RUST_LOG environment variable
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    info!("XwalkDriver v{}", xwalkdriver::VERSION);

    let config = Config::from_env()?;
    info!("Configuration loaded: host={}, port={}", config.host, config.port);

    let manager = Arc::new(SessionManager::sim(config.clone()));
    info!("Session manager initialized");

    let app = server::router(manager.clone());
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting HTTP server on {}", addr);

    // Setup graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).unwrap();
            let mut sigint = signal(SignalKind::interrupt()).unwrap();

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT signal");
                }
            }
        }

        #[cfg(windows)]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C signal");
        }

        let _ = shutdown_tx.send(());
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Shutdown signal received, stopping server...");
        })
        .await?;

    // Quit any sessions still alive
    info!("Cleaning up all sessions...");
    manager.quit_all().await;

    info!("Server shutdown complete");
    Ok(())
}
