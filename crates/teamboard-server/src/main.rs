use std::sync::Arc;

use tracing::info;

use teamboard_server::build_app;
use teamboard_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teamboard=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("join policy: {:?}", config.join_policy);

    let db = Arc::new(teamboard_db::Database::open(&config.db_path)?);
    let (app, _) = build_app(&config, db);

    let addr = config.addr()?;
    info!("Teamboard server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
