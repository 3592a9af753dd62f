use std::{sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use changekeeper_backend::{
    app_router,
    config::Config,
    db::connection::{create_pool, DbPool},
    repositories::SchemaCatalog,
    services::{entities, BroadcastChangeFeed, ChangeFeed},
    state::AppState,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "changekeeper_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        jwt_secret = %mask_secret(&config.jwt_secret),
        bind_addr = %config.bind_addr,
        quick_undo_ttl_seconds = config.quick_undo_ttl_seconds,
        quick_undo_max_ttl_seconds = config.quick_undo_max_ttl_seconds,
        undo_sweep_interval_seconds = config.undo_sweep_interval_seconds,
        admin_undo_any = config.admin_undo_any,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let pool: DbPool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Column allow-list and restorers are fixed for the life of the process
    let catalog = SchemaCatalog::load(&pool).await?;
    let registry = entities::build_registry(catalog)?;

    let feed: Arc<dyn ChangeFeed> = Arc::new(BroadcastChangeFeed::new(config.change_feed_capacity));
    let state = AppState::new(pool, config.clone(), registry, feed);

    if config.undo_sweep_interval_seconds > 0 {
        Arc::clone(&state.quick_undo)
            .spawn_sweeper(Duration::from_secs(config.undo_sweep_interval_seconds));
    } else {
        tracing::info!("Quick undo sweeper disabled");
    }

    let app = app_router(state);

    // Start server
    tracing::info!("Server listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
