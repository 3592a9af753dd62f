use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::AppError,
    models::{actor::Actor, change_entry::ChangeEntry, ChangeListQuery},
    state::AppState,
    types::ChangeId,
};

#[derive(Debug, Serialize)]
pub struct ChangeEntryResponse {
    pub id: ChangeId,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub consumed: bool,
}

impl From<ChangeEntry> for ChangeEntryResponse {
    fn from(entry: ChangeEntry) -> Self {
        Self {
            id: entry.id,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            operation: entry.operation,
            before_state: entry.before_state.map(|json| json.0),
            after_state: entry.after_state.map(|json| json.0),
            actor: entry.actor,
            created_at: entry.created_at,
            consumed: entry.consumed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UndoResponse {
    pub status: &'static str,
    pub redo_id: ChangeId,
}

pub async fn list_changes(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ChangeListQuery>,
) -> Result<Json<Vec<ChangeEntryResponse>>, AppError> {
    let entries = state.recorder.list_recent(&actor, &query).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

pub async fn get_change(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(change_id): Path<String>,
) -> Result<Json<ChangeEntryResponse>, AppError> {
    let change_id = parse_change_id(&change_id)?;
    let entry = state.recorder.find(&actor, change_id).await?;
    Ok(Json(entry.into()))
}

pub async fn undo_change(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(change_id): Path<String>,
) -> Result<Json<UndoResponse>, AppError> {
    let change_id = parse_change_id(&change_id)?;
    let outcome = state.undo.undo(change_id, &actor).await?;
    Ok(Json(UndoResponse {
        status: outcome.status,
        redo_id: outcome.redo_id,
    }))
}

fn parse_change_id(raw: &str) -> Result<ChangeId, AppError> {
    match raw.parse::<ChangeId>() {
        Ok(id) if id.value() > 0 => Ok(id),
        _ => Err(AppError::BadRequest(format!("Invalid change id: {}", raw))),
    }
}
