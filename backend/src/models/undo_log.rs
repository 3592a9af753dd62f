use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};
use std::time::Duration;
use validator::Validate;

use crate::{
    error::ChangeError,
    models::{
        change_entry::ChangeOperation,
        snapshot::{record_from_value, CanonicalRecord},
    },
    types::UndoLogId,
};

/// One row of `undo_log`: a single-shot, expiring undo of a recent action.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UndoLogEntry {
    pub id: UndoLogId,
    pub actor: String,
    /// Free-form label shown to the user, e.g. "bulk status change".
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    /// Operation that was performed and is to be reversed.
    pub operation: String,
    pub before_state: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl UndoLogEntry {
    /// Expired or consumed entries are permanently inert.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && self.expires_at > now
    }

    pub fn kind(&self) -> Result<ChangeOperation, ChangeError> {
        self.operation.parse()
    }

    pub fn before_record(&self) -> Result<Option<CanonicalRecord>, ChangeError> {
        self.before_state
            .as_ref()
            .map(|json| record_from_value(json.0.clone()))
            .transpose()
    }
}

/// Input for staging a quick-undo entry.
#[derive(Debug, Clone, Validate)]
pub struct StageQuickUndo {
    #[validate(length(min = 1, max = 200))]
    pub action: String,
    #[validate(length(min = 1, max = 100))]
    pub entity_type: String,
    #[validate(length(min = 1, max = 200))]
    pub entity_id: String,
    pub operation: ChangeOperation,
    /// Pre-action snapshot; required for update and delete.
    pub before: Option<CanonicalRecord>,
    /// Falls back to the configured default when absent.
    pub ttl: Option<Duration>,
}

impl StageQuickUndo {
    pub fn new(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: ChangeOperation,
    ) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            before: None,
            ttl: None,
        }
    }

    pub fn with_before(mut self, before: CanonicalRecord) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Field rules plus the snapshot requirement for update and delete.
    pub fn check(&self) -> Result<(), ChangeError> {
        self.validate()?;
        match self.operation {
            ChangeOperation::Create => Ok(()),
            ChangeOperation::Update | ChangeOperation::Delete => match &self.before {
                Some(before) if !before.is_empty() => Ok(()),
                _ => Err(ChangeError::validation(format!(
                    "{} requires a pre-action snapshot",
                    self.operation
                ))),
            },
        }
    }
}
