use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};
use std::{fmt, str::FromStr};

use crate::{
    error::ChangeError,
    models::snapshot::{record_from_value, CanonicalRecord},
    types::ChangeId,
};

/// Kind of mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }

    /// Structural inverse: create and delete swap, update stays update.
    pub fn inverse(self) -> Self {
        match self {
            ChangeOperation::Create => ChangeOperation::Delete,
            ChangeOperation::Update => ChangeOperation::Update,
            ChangeOperation::Delete => ChangeOperation::Create,
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeOperation::Create),
            "update" => Ok(ChangeOperation::Update),
            "delete" => Ok(ChangeOperation::Delete),
            other => Err(ChangeError::validation(format!(
                "unsupported operation: {}",
                other
            ))),
        }
    }
}

/// One row of `change_log`. Immutable once written, apart from `consumed`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChangeEntry {
    pub id: ChangeId,
    pub entity_type: String,
    pub entity_id: String,
    /// Stored as text; parsed through [`ChangeEntry::kind`] so rows written by
    /// older code never break listing.
    pub operation: String,
    pub before_state: Option<Json<Value>>,
    pub after_state: Option<Json<Value>>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub consumed: bool,
}

impl ChangeEntry {
    pub fn kind(&self) -> Result<ChangeOperation, ChangeError> {
        self.operation.parse()
    }

    pub fn before(&self) -> Option<&Value> {
        self.before_state.as_ref().map(|json| &json.0)
    }

    pub fn after(&self) -> Option<&Value> {
        self.after_state.as_ref().map(|json| &json.0)
    }

    pub fn before_record(&self) -> Result<Option<CanonicalRecord>, ChangeError> {
        self.before().cloned().map(record_from_value).transpose()
    }

    pub fn after_record(&self) -> Result<Option<CanonicalRecord>, ChangeError> {
        self.after().cloned().map(record_from_value).transpose()
    }
}

/// A change about to be appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub actor: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: ChangeOperation,
    pub before: Option<CanonicalRecord>,
    pub after: Option<CanonicalRecord>,
}

impl NewChange {
    /// Builds a change, enforcing the before/after shape of each operation.
    pub fn new(
        actor: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: ChangeOperation,
        before: Option<CanonicalRecord>,
        after: Option<CanonicalRecord>,
    ) -> Result<Self, ChangeError> {
        let change = Self {
            actor: actor.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            before,
            after,
        };
        change.validate()?;
        Ok(change)
    }

    /// The entry that reverses `entry`, attributed to `actor`.
    pub fn inverse_of(entry: &ChangeEntry, actor: impl Into<String>) -> Result<Self, ChangeError> {
        let operation = entry.kind()?;
        Self::new(
            actor,
            entry.entity_type.clone(),
            entry.entity_id.clone(),
            operation.inverse(),
            entry.after_record()?,
            entry.before_record()?,
        )
    }

    fn validate(&self) -> Result<(), ChangeError> {
        if self.actor.trim().is_empty() {
            return Err(ChangeError::validation("actor must not be empty"));
        }
        if self.entity_type.trim().is_empty() {
            return Err(ChangeError::validation("entity_type must not be empty"));
        }
        if self.entity_id.trim().is_empty() {
            return Err(ChangeError::validation("entity_id must not be empty"));
        }

        let has_before = self.before.as_ref().is_some_and(|r| !r.is_empty());
        let has_after = self.after.as_ref().is_some_and(|r| !r.is_empty());
        match self.operation {
            ChangeOperation::Create if self.before.is_some() || !has_after => Err(
                ChangeError::validation("create requires an after state and no before state"),
            ),
            ChangeOperation::Delete if self.after.is_some() || !has_before => Err(
                ChangeError::validation("delete requires a before state and no after state"),
            ),
            ChangeOperation::Update if !has_before || !has_after => Err(ChangeError::validation(
                "update requires both before and after states",
            )),
            _ => Ok(()),
        }
    }
}
