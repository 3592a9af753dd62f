//! Schema-driven row access for tracked entity tables.
//!
//! Every identifier pushed into SQL here comes from a [`TableColumns`] entry of
//! the introspected catalog; record keys are only ever used to look names up.
//! Values travel as one bound JSON parameter and are converted to column types
//! by Postgres (`to_jsonb` on the way out, `jsonb_populate_record` on the way in).

use serde_json::Value;
use sqlx::{types::Json, PgConnection, Postgres, QueryBuilder};

use crate::error::ChangeError;
use crate::models::snapshot::CanonicalRecord;
use crate::repositories::common::quote_ident;
use crate::repositories::schema::TableColumns;

/// Postgres SQLSTATE class for data exceptions (bad input syntax, out of range, ...).
const DATA_EXCEPTION_CLASS: &str = "22";
const NOT_NULL_VIOLATION: &str = "23502";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

fn require_column<'t>(table: &'t TableColumns, column: &str) -> Result<&'t str, ChangeError> {
    table.column(column).ok_or_else(|| {
        ChangeError::validation(format!(
            "unknown column {} for {}",
            column,
            table.name()
        ))
    })
}

/// Fetches one row as a JSON object, matching `key_column` by its text form.
pub async fn fetch_row(
    conn: &mut PgConnection,
    table: &TableColumns,
    key_column: &str,
    key: &str,
) -> Result<Option<Value>, ChangeError> {
    let key_column = require_column(table, key_column)?;
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT to_jsonb(t) FROM ");
    builder
        .push(quote_ident(table.name()))
        .push(" AS t WHERE t.")
        .push(quote_ident(key_column))
        .push("::text = ")
        .push_bind(key.to_string());

    let row = builder
        .build_query_scalar::<Json<Value>>()
        .fetch_optional(conn)
        .await
        .map_err(|e| ChangeError::persistence(format!("fetch {} {}", table.name(), key), e))?;
    Ok(row.map(|json| json.0))
}

/// Fetches every row whose `column` equals `value`, ordered by `order_by`.
pub async fn fetch_rows_by(
    conn: &mut PgConnection,
    table: &TableColumns,
    column: &str,
    value: &str,
    order_by: &[&str],
) -> Result<Vec<Value>, ChangeError> {
    let column = require_column(table, column)?;
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT to_jsonb(t) FROM ");
    builder
        .push(quote_ident(table.name()))
        .push(" AS t WHERE t.")
        .push(quote_ident(column))
        .push("::text = ")
        .push_bind(value.to_string());

    if !order_by.is_empty() {
        builder.push(" ORDER BY ");
        let mut separated = builder.separated(", ");
        for order_column in order_by {
            separated.push(format!("t.{}", quote_ident(require_column(table, order_column)?)));
        }
    }

    let rows = builder
        .build_query_scalar::<Json<Value>>()
        .fetch_all(conn)
        .await
        .map_err(|e| ChangeError::persistence(format!("fetch {} rows", table.name()), e))?;
    Ok(rows.into_iter().map(|json| json.0).collect())
}

/// Inserts or replaces one row keyed by `key_column`.
///
/// Only the columns present in `record` are written. Keys that are not columns
/// of the table are rejected before any SQL is built.
pub async fn upsert_row(
    conn: &mut PgConnection,
    table: &TableColumns,
    key_column: &str,
    record: &CanonicalRecord,
) -> Result<(), ChangeError> {
    let key_column = require_column(table, key_column)?;
    if !record.contains_key(key_column) {
        return Err(ChangeError::validation(format!(
            "record for {} is missing key column {}",
            table.name(),
            key_column
        )));
    }
    let columns = record_columns(table, record)?;

    let mut builder = insert_from_record(table, &columns, record);
    builder
        .push(" ON CONFLICT (")
        .push(quote_ident(key_column))
        .push(")");

    let updates: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|column| *column != key_column)
        .collect();
    if updates.is_empty() {
        builder.push(" DO NOTHING");
    } else {
        builder.push(" DO UPDATE SET ");
        let mut separated = builder.separated(", ");
        for column in updates {
            let ident = quote_ident(column);
            separated.push(format!("{ident} = EXCLUDED.{ident}"));
        }
    }

    builder
        .build()
        .execute(conn)
        .await
        .map_err(|e| classify_write_error(table.name(), e))?;
    Ok(())
}

/// Inserts one row without touching existing ones; a key collision is an error.
pub async fn insert_row(
    conn: &mut PgConnection,
    table: &TableColumns,
    key_column: &str,
    record: &CanonicalRecord,
) -> Result<(), ChangeError> {
    let key_column = require_column(table, key_column)?;
    if !record.contains_key(key_column) {
        return Err(ChangeError::validation(format!(
            "record for {} is missing key column {}",
            table.name(),
            key_column
        )));
    }
    let columns = record_columns(table, record)?;

    insert_from_record(table, &columns, record)
        .build()
        .execute(conn)
        .await
        .map_err(|e| classify_write_error(table.name(), e))?;
    Ok(())
}

fn record_columns<'t>(
    table: &'t TableColumns,
    record: &CanonicalRecord,
) -> Result<Vec<&'t str>, ChangeError> {
    record
        .keys()
        .map(|key| require_column(table, key))
        .collect()
}

fn insert_from_record<'q>(
    table: &TableColumns,
    columns: &[&str],
    record: &'q CanonicalRecord,
) -> QueryBuilder<'q, Postgres> {
    let table_ident = quote_ident(table.name());
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO ");
    builder.push(&table_ident).push(" (");
    push_column_list(&mut builder, columns);
    builder.push(") SELECT ");
    push_column_list(&mut builder, columns);
    builder
        .push(" FROM jsonb_populate_record(NULL::")
        .push(&table_ident)
        .push(", ")
        .push_bind(Json(record))
        .push(")");
    builder
}

/// Deletes rows whose `column` equals `value`; returns the affected count.
pub async fn delete_rows_by(
    conn: &mut PgConnection,
    table: &TableColumns,
    column: &str,
    value: &str,
) -> Result<u64, ChangeError> {
    let column = require_column(table, column)?;
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("DELETE FROM ");
    builder
        .push(quote_ident(table.name()))
        .push(" WHERE ")
        .push(quote_ident(column))
        .push("::text = ")
        .push_bind(value.to_string());

    let result = builder
        .build()
        .execute(conn)
        .await
        .map_err(|e| classify_write_error(table.name(), e))?;
    Ok(result.rows_affected())
}

fn push_column_list(builder: &mut QueryBuilder<'_, Postgres>, columns: &[&str]) {
    let mut separated = builder.separated(", ");
    for column in columns {
        separated.push(quote_ident(column));
    }
}

/// Records Postgres rejects on content are the caller's fault; a clash with
/// another row's unique key is a conflict.
fn classify_write_error(table: &str, err: sqlx::Error) -> ChangeError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    match code.as_deref() {
        Some(UNIQUE_VIOLATION) => {
            ChangeError::conflict(format!("record clashes with an existing {} row: {}", table, err))
        }
        Some(NOT_NULL_VIOLATION | FOREIGN_KEY_VIOLATION | CHECK_VIOLATION) => {
            ChangeError::validation(format!("record violates a {} constraint: {}", table, err))
        }
        Some(code) if code.starts_with(DATA_EXCEPTION_CLASS) => {
            ChangeError::validation(format!("record does not fit {}: {}", table, err))
        }
        _ => ChangeError::persistence(format!("write {}", table), err),
    }
}
