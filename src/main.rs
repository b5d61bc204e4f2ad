use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use artbooms_rss::config::Config;
use artbooms_rss::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "artbooms_rss=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("ARTBOOMS_CONFIG").unwrap_or_else(|_| "artbooms.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded configuration from {} (archive {}, cache {})",
        config_path,
        config.archive_url,
        config.cache_path.display()
    );

    let state = Arc::new(AppState::from_config(&config)?);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server starting on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
