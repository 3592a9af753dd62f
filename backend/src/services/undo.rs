//! Undo by change id.
//!
//! The entry is locked, the inverse is applied through the restore registry,
//! the entry is flipped to consumed and the inverse is recorded, all in one
//! transaction. Redo is undo of the returned entry.

use serde::Serialize;
use sqlx::PgConnection;
use std::sync::Arc;

use crate::error::ChangeError;
use crate::models::{
    actor::Actor,
    change_entry::{ChangeEntry, ChangeOperation, NewChange},
    snapshot::{changed_fields, CanonicalRecord},
};
use crate::repositories::{
    change_log as change_log_repo,
    transaction::{begin_transaction, commit_transaction, rollback_transaction},
};
use crate::services::{
    audit_log::{append_note, AuditTrail},
    change_recorder::ChangeRecorder,
    restore::RestoreRegistry,
};
use crate::types::ChangeId;

pub const UNDONE: &str = "undone";

/// What has to happen to the entity to reverse an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReversalStep {
    Delete,
    Restore(CanonicalRecord),
}

/// create reverses to delete; update and delete reverse to restoring `before`.
pub fn plan_reversal(
    operation: ChangeOperation,
    before: Option<CanonicalRecord>,
) -> Result<ReversalStep, ChangeError> {
    match operation {
        ChangeOperation::Create => Ok(ReversalStep::Delete),
        ChangeOperation::Update | ChangeOperation::Delete => before
            .filter(|record| !record.is_empty())
            .map(ReversalStep::Restore)
            .ok_or_else(|| {
                ChangeError::validation(format!("{} has no before state to restore", operation))
            }),
    }
}

pub async fn apply_reversal(
    registry: &RestoreRegistry,
    conn: &mut PgConnection,
    entity_type: &str,
    entity_id: &str,
    step: ReversalStep,
) -> Result<(), ChangeError> {
    match step {
        ReversalStep::Delete => registry.delete(conn, entity_type, entity_id).await,
        ReversalStep::Restore(record) => {
            registry
                .restore(conn, entity_type, entity_id, record)
                .await
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoOutcome {
    pub status: &'static str,
    pub change_id: ChangeId,
    pub redo_id: ChangeId,
}

/// Human-readable description of a reversal for the audit trail.
pub fn reversal_summary(entry: &ChangeEntry, redo_id: ChangeId) -> String {
    let mut summary = format!(
        "Reverted {} of {} {} (change {}, redo {})",
        entry.operation, entry.entity_type, entry.entity_id, entry.id, redo_id
    );
    if let (Ok(Some(before)), Ok(Some(after))) = (entry.before_record(), entry.after_record()) {
        let fields = changed_fields(&before, &after);
        if !fields.is_empty() {
            summary.push_str("; restored fields: ");
            summary.push_str(&fields.join(", "));
        }
    }
    summary
}

#[derive(Clone)]
pub struct UndoService {
    registry: Arc<RestoreRegistry>,
    recorder: ChangeRecorder,
    audit: Arc<dyn AuditTrail>,
    admin_undo_any: bool,
}

impl UndoService {
    pub fn new(
        registry: Arc<RestoreRegistry>,
        recorder: ChangeRecorder,
        audit: Arc<dyn AuditTrail>,
    ) -> Self {
        Self {
            registry,
            recorder,
            audit,
            admin_undo_any: false,
        }
    }

    pub fn with_admin_override(mut self, enabled: bool) -> Self {
        self.admin_undo_any = enabled;
        self
    }

    pub async fn undo(&self, change_id: ChangeId, actor: &Actor) -> Result<UndoOutcome, ChangeError> {
        let mut tx = begin_transaction(self.recorder.pool()).await?;
        match self.undo_in(&mut tx, change_id, actor).await {
            Ok((entry, redo)) => {
                commit_transaction(tx).await?;
                tracing::info!(
                    change_id = %change_id,
                    redo_id = %redo.id,
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    actor = %actor.id,
                    "Change undone"
                );
                self.recorder.notify(&redo);
                append_note(
                    self.audit.as_ref(),
                    &actor.id,
                    "change_undone",
                    &entry.entity_type,
                    &entry.entity_id,
                    &reversal_summary(&entry, redo.id),
                )
                .await;
                Ok(UndoOutcome {
                    status: UNDONE,
                    change_id,
                    redo_id: redo.id,
                })
            }
            Err(err) => {
                if let Err(rollback_err) = rollback_transaction(tx).await {
                    tracing::error!(
                        change_id = %change_id,
                        error = %rollback_err,
                        "Rollback after failed undo failed"
                    );
                }
                tracing::warn!(change_id = %change_id, actor = %actor.id, error = %err, "Undo failed");
                Err(err)
            }
        }
    }

    async fn undo_in(
        &self,
        conn: &mut PgConnection,
        change_id: ChangeId,
        actor: &Actor,
    ) -> Result<(ChangeEntry, ChangeEntry), ChangeError> {
        let entry = change_log_repo::lock_change(conn, change_id)
            .await
            .map_err(|e| ChangeError::persistence(format!("lock change {}", change_id), e))?
            .filter(|entry| actor.may_act_for(&entry.actor, self.admin_undo_any))
            .ok_or_else(|| ChangeError::not_found(format!("change {} not found", change_id)))?;

        if entry.consumed {
            return Err(ChangeError::conflict("already undone"));
        }

        let context = format!(
            "undo change {} ({} {}/{})",
            entry.id, entry.operation, entry.entity_type, entry.entity_id
        );
        let operation = entry.kind().map_err(|e| e.context(&context))?;
        let step = plan_reversal(operation, entry.before_record()?).map_err(|e| e.context(&context))?;
        apply_reversal(
            &self.registry,
            conn,
            &entry.entity_type,
            &entry.entity_id,
            step,
        )
        .await
        .map_err(|e| e.context(&context))?;

        if !change_log_repo::mark_consumed(conn, entry.id)
            .await
            .map_err(|e| ChangeError::persistence(format!("consume change {}", entry.id), e))?
        {
            return Err(ChangeError::conflict("already undone"));
        }

        let inverse = NewChange::inverse_of(&entry, actor.id.clone()).map_err(|e| e.context(&context))?;
        let redo = self.recorder.record_in(conn, &inverse).await?;
        Ok((entry, redo))
    }
}
