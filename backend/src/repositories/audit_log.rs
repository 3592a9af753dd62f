use sqlx::PgPool;

use crate::models::audit_log::AuditLog;

const SELECT_COLUMNS: &str =
    "id, occurred_at, actor_id, event_type, target_type, target_id, summary, metadata";

pub async fn insert_audit_log(pool: &PgPool, log: &AuditLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_logs \
         (id, occurred_at, actor_id, event_type, target_type, target_id, summary, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(&log.id)
    .bind(log.occurred_at)
    .bind(&log.actor_id)
    .bind(&log.event_type)
    .bind(&log.target_type)
    .bind(&log.target_id)
    .bind(&log.summary)
    .bind(&log.metadata)
    .execute(pool)
    .await
    .map(|_| ())
}

/// Notes about one entity, newest first.
pub async fn list_for_target(
    pool: &PgPool,
    target_type: &str,
    target_id: &str,
) -> Result<Vec<AuditLog>, sqlx::Error> {
    let query = format!(
        "SELECT {} FROM audit_logs WHERE target_type = $1 AND target_id = $2 \
         ORDER BY occurred_at DESC, id DESC",
        SELECT_COLUMNS
    );
    sqlx::query_as::<_, AuditLog>(&query)
        .bind(target_type)
        .bind(target_id)
        .fetch_all(pool)
        .await
}
