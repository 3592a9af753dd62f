use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgConnection, PgPool};

use crate::models::snapshot::CanonicalRecord;
use crate::models::undo_log::UndoLogEntry;
use crate::types::UndoLogId;

const SELECT_COLUMNS: &str = "id, actor, action, entity_type, entity_id, operation, before_state, \
                              created_at, expires_at, consumed";

#[derive(Debug, Clone)]
pub struct NewUndoLogEntry<'a> {
    pub id: UndoLogId,
    pub actor: &'a str,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub operation: &'a str,
    pub before: Option<&'a CanonicalRecord>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub async fn insert_entry(
    pool: &PgPool,
    entry: &NewUndoLogEntry<'_>,
) -> Result<UndoLogEntry, sqlx::Error> {
    let query = format!(
        "INSERT INTO undo_log \
         (id, actor, action, entity_type, entity_id, operation, before_state, created_at, expires_at, consumed) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE) \
         RETURNING {}",
        SELECT_COLUMNS
    );
    sqlx::query_as::<_, UndoLogEntry>(&query)
        .bind(entry.id)
        .bind(entry.actor)
        .bind(entry.action)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.operation)
        .bind(entry.before.map(Json))
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .fetch_one(pool)
        .await
}

/// Entries the actor can still act on at `now`, newest first.
pub async fn list_active(
    pool: &PgPool,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Vec<UndoLogEntry>, sqlx::Error> {
    let query = format!(
        "SELECT {} FROM undo_log \
         WHERE actor = $1 AND expires_at > $2 AND consumed = FALSE \
         ORDER BY created_at DESC, id",
        SELECT_COLUMNS
    );
    sqlx::query_as::<_, UndoLogEntry>(&query)
        .bind(actor)
        .bind(now)
        .fetch_all(pool)
        .await
}

pub async fn fetch_entry(
    pool: &PgPool,
    id: UndoLogId,
) -> Result<Option<UndoLogEntry>, sqlx::Error> {
    let query = format!("SELECT {} FROM undo_log WHERE id = $1", SELECT_COLUMNS);
    sqlx::query_as::<_, UndoLogEntry>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Loads an entry and holds a row lock on it until the transaction ends.
pub async fn lock_entry(
    conn: &mut PgConnection,
    id: UndoLogId,
) -> Result<Option<UndoLogEntry>, sqlx::Error> {
    let query = format!("SELECT {} FROM undo_log WHERE id = $1 FOR UPDATE", SELECT_COLUMNS);
    sqlx::query_as::<_, UndoLogEntry>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn mark_consumed(conn: &mut PgConnection, id: UndoLogId) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE undo_log SET consumed = TRUE WHERE id = $1 AND consumed = FALSE")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Physically removes entries that expired at or before `now`.
pub async fn delete_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM undo_log WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
