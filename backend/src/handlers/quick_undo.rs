use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::AppError,
    models::{actor::Actor, undo_log::UndoLogEntry},
    services::quick_undo::QuickUndoOutcome,
    state::AppState,
    types::UndoLogId,
};

#[derive(Debug, Serialize)]
pub struct QuickUndoResponse {
    pub id: UndoLogId,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<UndoLogEntry> for QuickUndoResponse {
    fn from(entry: UndoLogEntry) -> Self {
        Self {
            id: entry.id,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            operation: entry.operation,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
        }
    }
}

pub async fn list_quick_undo(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<QuickUndoResponse>>, AppError> {
    let entries = state.quick_undo.list(&actor).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

pub async fn perform_quick_undo(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(undo_id): Path<String>,
) -> Result<Json<QuickUndoOutcome>, AppError> {
    let undo_id = undo_id
        .parse::<UndoLogId>()
        .map_err(|_| AppError::BadRequest(format!("Invalid quick undo id: {}", undo_id)))?;
    let outcome = state.quick_undo.perform(undo_id, &actor).await?;
    Ok(Json(outcome))
}
