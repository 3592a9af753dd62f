use sqlx::{types::Json, PgConnection, PgPool, Postgres, QueryBuilder};

use crate::models::change_entry::{ChangeEntry, NewChange};
use crate::repositories::common::push_clause;
use crate::types::ChangeId;

const SELECT_COLUMNS: &str = "id, entity_type, entity_id, operation, before_state, after_state, \
                              actor, created_at, consumed";

#[derive(Debug, Clone, Default)]
pub struct ChangeLogFilters {
    /// `None` lists every actor's entries.
    pub actor: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

/// Appends one entry. Runs on whatever connection the caller holds, so it
/// joins the caller's transaction when there is one.
pub async fn insert_change(
    conn: &mut PgConnection,
    change: &NewChange,
) -> Result<ChangeEntry, sqlx::Error> {
    let query = format!(
        "INSERT INTO change_log \
         (entity_type, entity_id, operation, before_state, after_state, actor, created_at, consumed) \
         VALUES ($1, $2, $3, $4, $5, $6, NOW(), FALSE) \
         RETURNING {}",
        SELECT_COLUMNS
    );
    sqlx::query_as::<_, ChangeEntry>(&query)
        .bind(&change.entity_type)
        .bind(&change.entity_id)
        .bind(change.operation.as_str())
        .bind(change.before.as_ref().map(Json))
        .bind(change.after.as_ref().map(Json))
        .bind(&change.actor)
        .fetch_one(conn)
        .await
}

pub async fn fetch_change(pool: &PgPool, id: ChangeId) -> Result<Option<ChangeEntry>, sqlx::Error> {
    let query = format!("SELECT {} FROM change_log WHERE id = $1", SELECT_COLUMNS);
    sqlx::query_as::<_, ChangeEntry>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Loads an entry and holds a row lock on it until the transaction ends.
pub async fn lock_change(
    conn: &mut PgConnection,
    id: ChangeId,
) -> Result<Option<ChangeEntry>, sqlx::Error> {
    let query = format!(
        "SELECT {} FROM change_log WHERE id = $1 FOR UPDATE",
        SELECT_COLUMNS
    );
    sqlx::query_as::<_, ChangeEntry>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Flips `consumed` to true. Returns false when the entry was already consumed.
pub async fn mark_consumed(conn: &mut PgConnection, id: ChangeId) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("UPDATE change_log SET consumed = TRUE WHERE id = $1 AND consumed = FALSE")
            .bind(id)
            .execute(conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn list_recent_changes(
    pool: &PgPool,
    filters: &ChangeLogFilters,
    limit: i64,
) -> Result<Vec<ChangeEntry>, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {} FROM change_log", SELECT_COLUMNS));
    let mut has_clause = false;
    apply_change_log_filters(&mut builder, &mut has_clause, filters);
    builder
        .push(" ORDER BY id DESC LIMIT ")
        .push_bind(limit);

    builder.build_query_as::<ChangeEntry>().fetch_all(pool).await
}

fn apply_change_log_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    has_clause: &mut bool,
    filters: &ChangeLogFilters,
) {
    if let Some(actor) = filters.actor.as_ref() {
        push_clause(builder, has_clause);
        builder.push("actor = ").push_bind(actor.to_string());
    }
    if let Some(entity_type) = filters.entity_type.as_ref() {
        push_clause(builder, has_clause);
        builder
            .push("entity_type = ")
            .push_bind(entity_type.to_string());
    }
    if let Some(entity_id) = filters.entity_id.as_ref() {
        push_clause(builder, has_clause);
        builder.push("entity_id = ").push_bind(entity_id.to_string());
    }
}
