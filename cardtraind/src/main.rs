mod api;
mod connection;
mod cookies;
mod error;
mod paths;
mod server;
mod settings;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cardtrain::session::Session;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use api::ApiClient;
use connection::{ConnectionConfig, ConnectionManager};
use cookies::CredentialStore;
use paths::AppPaths;
use server::Daemon;
use settings::DaemonConfig;

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let paths = AppPaths::new()?;
    info!("Data directory: {:?}", paths.data_dir());

    let config = DaemonConfig::load_or_default(&paths.config_file())?;
    let credentials =
        CredentialStore::open_or_empty(paths.credentials_file(), config.credential_days);

    let api = ApiClient::new(config.api_url.clone(), Arc::new(Mutex::new(credentials)));
    let connection = ConnectionManager::with_websocket(ConnectionConfig {
        url: config.ws_url.clone(),
        handshake_timeout: config.handshake_timeout(),
        reconnect_delay: config.reconnect_delay(),
    });
    let daemon = Arc::new(Daemon::new(
        Session::with_log_capacity(config.log_capacity),
        connection,
        api,
    ));

    if daemon.connect().await {
        info!("Training socket ready ({})", config.ws_url);
    } else {
        warn!("Training socket unavailable; retrying every {:?}", config.reconnect_delay());
    }

    let listener = TcpListener::bind(&config.ipc_addr).await?;
    info!("cardtraind listening on {}", config.ipc_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                info!("Client connected: {}", addr);
                let daemon = Arc::clone(&daemon);
                tokio::spawn(async move {
                    if let Err(e) = server::serve_client(stream, daemon).await {
                        error!("Client handler error: {}", e);
                    }
                });
            }
            _ = daemon.shutdown_requested() => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
        }
    }

    // Let in-flight responses flush before the socket goes away.
    tokio::time::sleep(Duration::from_millis(50)).await;
    daemon.connection().shutdown();
    info!("cardtraind stopped");
    Ok(())
}
