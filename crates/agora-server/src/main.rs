use std::net::SocketAddr;

use tracing::info;

use agora_server::{Config, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let app = build_app(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Agora relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
