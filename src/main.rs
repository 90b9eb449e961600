use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crosslister::api::router;
use crosslister::canvas::{CanvasConfig, CanvasHttpClient};
use crosslister::services::audit::AuditLog;
use crosslister::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "crosslister=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CanvasConfig::new_from_env()?;
    info!(
        "Canvas client configured for {} (account {})",
        config.base_url, config.account_id
    );

    let canvas = Arc::new(CanvasHttpClient::new(config)?);
    let audit = Arc::new(AuditLog::from_env());
    let state = AppState { canvas, audit };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
