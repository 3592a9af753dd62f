use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use changekeeper_backend::{
    config::Config, db::connection::create_pool, repositories::undo_log as undo_log_repo,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "undo_log_cleanup=info,changekeeper_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let pool = create_pool(&config.database_url).await?;

    let deleted = undo_log_repo::delete_expired(&pool, Utc::now())
        .await
        .context("cleanup expired quick undo entries")?;
    tracing::info!("Deleted {} expired quick undo entries", deleted);

    sqlx::query("VACUUM (ANALYZE) undo_log")
        .execute(&pool)
        .await
        .context("vacuum undo_log table")?;

    Ok(())
}
