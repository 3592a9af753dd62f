//! Quick-undo log: single-shot, expiring undo of a recent action.
//!
//! Independent of the change history. A performed quick undo is recorded as an
//! ordinary change entry, but neither log references the other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::ChangeError;
use crate::models::{
    actor::Actor,
    change_entry::{ChangeEntry, ChangeOperation, NewChange},
    undo_log::{StageQuickUndo, UndoLogEntry},
};
use crate::repositories::{
    transaction::{begin_transaction, commit_transaction, rollback_transaction},
    undo_log::{self as undo_log_repo, NewUndoLogEntry},
};
use crate::services::{
    audit_log::{append_note, AuditTrail},
    change_recorder::ChangeRecorder,
    restore::RestoreRegistry,
    undo::{apply_reversal, plan_reversal, ReversalStep, UNDONE},
};
use crate::types::UndoLogId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickUndoPolicy {
    pub default_ttl: Duration,
    pub max_ttl: Duration,
    pub admin_undo_any: bool,
}

impl QuickUndoPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.quick_undo_ttl_seconds),
            max_ttl: Duration::from_secs(config.quick_undo_max_ttl_seconds),
            admin_undo_any: config.admin_undo_any,
        }
    }

    /// Resolves the TTL of a staged entry, rejecting zero and over-long values.
    pub fn resolve_ttl(&self, requested: Option<Duration>) -> Result<Duration, ChangeError> {
        let ttl = requested.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(ChangeError::validation("ttl must be positive"));
        }
        if ttl > self.max_ttl {
            return Err(ChangeError::validation(format!(
                "ttl of {}s exceeds the maximum of {}s",
                ttl.as_secs(),
                self.max_ttl.as_secs()
            )));
        }
        Ok(ttl)
    }
}

impl Default for QuickUndoPolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(86_400),
            admin_undo_any: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickUndoOutcome {
    pub status: &'static str,
}

/// Expiry instant for an entry staged at `created_at`.
pub fn expiry_after(created_at: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, ChangeError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| created_at.checked_add_signed(ttl))
        .ok_or_else(|| ChangeError::validation(format!("ttl of {}s is out of range", ttl.as_secs())))
}

/// Checks that a locked entry can still be performed at `now`.
pub fn ensure_performable(entry: &UndoLogEntry, now: DateTime<Utc>) -> Result<(), ChangeError> {
    if entry.consumed {
        return Err(ChangeError::conflict("already undone"));
    }
    if entry.expires_at <= now {
        return Err(ChangeError::conflict("quick undo expired"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct QuickUndoService {
    registry: Arc<RestoreRegistry>,
    recorder: ChangeRecorder,
    audit: Arc<dyn AuditTrail>,
    policy: QuickUndoPolicy,
}

impl QuickUndoService {
    pub fn new(
        registry: Arc<RestoreRegistry>,
        recorder: ChangeRecorder,
        audit: Arc<dyn AuditTrail>,
        policy: QuickUndoPolicy,
    ) -> Self {
        Self {
            registry,
            recorder,
            audit,
            policy,
        }
    }

    pub fn policy(&self) -> &QuickUndoPolicy {
        &self.policy
    }

    /// Stages an undo for an action `actor` has just performed.
    pub async fn stage(&self, actor: &str, input: StageQuickUndo) -> Result<UndoLogId, ChangeError> {
        if actor.trim().is_empty() {
            return Err(ChangeError::validation("actor must not be empty"));
        }
        input.check()?;
        if !self.registry.supports(&input.entity_type) {
            return Err(ChangeError::validation(format!(
                "unknown entity type: {}",
                input.entity_type
            )));
        }
        let ttl = self.policy.resolve_ttl(input.ttl)?;
        let created_at = Utc::now();
        let expires_at = expiry_after(created_at, ttl)?;
        let entry = NewUndoLogEntry {
            id: UndoLogId::new(),
            actor,
            action: &input.action,
            entity_type: &input.entity_type,
            entity_id: &input.entity_id,
            operation: input.operation.as_str(),
            before: input.before.as_ref(),
            created_at,
            expires_at,
        };
        let stored = undo_log_repo::insert_entry(self.recorder.pool(), &entry)
            .await
            .map_err(|e| ChangeError::persistence("stage quick undo", e))?;

        tracing::debug!(
            undo_id = %stored.id,
            actor,
            entity_type = %stored.entity_type,
            entity_id = %stored.entity_id,
            expires_at = %stored.expires_at,
            "Staged quick undo"
        );
        Ok(stored.id)
    }

    /// Stages an undo, capturing the pre-action snapshot from the store.
    ///
    /// Call before the action mutates the entity. Nothing is captured for a
    /// create, since there is no prior state.
    pub async fn stage_now(
        &self,
        actor: &str,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        operation: ChangeOperation,
        ttl: Option<Duration>,
    ) -> Result<UndoLogId, ChangeError> {
        let mut input = StageQuickUndo::new(action, entity_type, entity_id, operation);
        if operation != ChangeOperation::Create {
            let mut conn = self
                .recorder
                .pool()
                .acquire()
                .await
                .map_err(|e| ChangeError::persistence("acquire connection", e))?;
            let before = self.registry.snapshot(&mut conn, entity_type, entity_id).await?;
            input = input.with_before(before);
        }
        if let Some(ttl) = ttl {
            input = input.with_ttl(ttl);
        }
        self.stage(actor, input).await
    }

    /// Active entries of `actor`, newest first.
    pub async fn list(&self, actor: &Actor) -> Result<Vec<UndoLogEntry>, ChangeError> {
        undo_log_repo::list_active(self.recorder.pool(), &actor.id, Utc::now())
            .await
            .map_err(|e| ChangeError::persistence("list quick undo entries", e))
    }

    pub async fn perform(&self, id: UndoLogId, actor: &Actor) -> Result<QuickUndoOutcome, ChangeError> {
        let mut tx = begin_transaction(self.recorder.pool()).await?;
        match self.perform_in(&mut tx, id, actor).await {
            Ok((entry, change)) => {
                commit_transaction(tx).await?;
                tracing::info!(
                    undo_id = %id,
                    change_id = %change.id,
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    actor = %actor.id,
                    "Quick undo performed"
                );
                self.recorder.notify(&change);
                append_note(
                    self.audit.as_ref(),
                    &actor.id,
                    "quick_undo_performed",
                    &entry.entity_type,
                    &entry.entity_id,
                    &format!(
                        "Quick undo of \"{}\" ({} {} {})",
                        entry.action, entry.operation, entry.entity_type, entry.entity_id
                    ),
                )
                .await;
                Ok(QuickUndoOutcome { status: UNDONE })
            }
            Err(err) => {
                if let Err(rollback_err) = rollback_transaction(tx).await {
                    tracing::error!(
                        undo_id = %id,
                        error = %rollback_err,
                        "Rollback after failed quick undo failed"
                    );
                }
                tracing::warn!(undo_id = %id, actor = %actor.id, error = %err, "Quick undo failed");
                Err(err)
            }
        }
    }

    async fn perform_in(
        &self,
        conn: &mut PgConnection,
        id: UndoLogId,
        actor: &Actor,
    ) -> Result<(UndoLogEntry, ChangeEntry), ChangeError> {
        let entry = undo_log_repo::lock_entry(conn, id)
            .await
            .map_err(|e| ChangeError::persistence(format!("lock quick undo {}", id), e))?
            .filter(|entry| actor.may_act_for(&entry.actor, self.policy.admin_undo_any))
            .ok_or_else(|| ChangeError::not_found(format!("quick undo {} not found", id)))?;
        ensure_performable(&entry, Utc::now())?;

        let context = format!(
            "quick undo {} ({} {}/{})",
            id, entry.operation, entry.entity_type, entry.entity_id
        );
        let operation = entry.kind().map_err(|e| e.context(&context))?;
        let step = plan_reversal(operation, entry.before_record()?).map_err(|e| e.context(&context))?;
        let current = self
            .registry
            .snapshot_optional(conn, &entry.entity_type, &entry.entity_id)
            .await
            .map_err(|e| e.context(&context))?;
        let deleting = step == ReversalStep::Delete;

        apply_reversal(
            &self.registry,
            conn,
            &entry.entity_type,
            &entry.entity_id,
            step,
        )
        .await
        .map_err(|e| e.context(&context))?;

        if !undo_log_repo::mark_consumed(conn, id)
            .await
            .map_err(|e| ChangeError::persistence(format!("consume quick undo {}", id), e))?
        {
            return Err(ChangeError::conflict("already undone"));
        }

        let change = if deleting {
            let before = current.ok_or_else(|| {
                ChangeError::not_found(format!("{} {} not found", entry.entity_type, entry.entity_id))
            })?;
            NewChange::new(
                actor.id.clone(),
                entry.entity_type.clone(),
                entry.entity_id.clone(),
                ChangeOperation::Delete,
                Some(before),
                None,
            )?
        } else {
            let after = self
                .registry
                .snapshot(conn, &entry.entity_type, &entry.entity_id)
                .await
                .map_err(|e| e.context(&context))?;
            let operation = if current.is_some() {
                ChangeOperation::Update
            } else {
                ChangeOperation::Create
            };
            NewChange::new(
                actor.id.clone(),
                entry.entity_type.clone(),
                entry.entity_id.clone(),
                operation,
                current,
                Some(after),
            )?
        };
        let recorded = self.recorder.record_in(conn, &change).await?;
        Ok((entry, recorded))
    }

    /// Deletes entries that expired at or before now. Reclamation only: an
    /// expired entry is already inert whether or not it has been swept.
    pub async fn sweep(&self) -> Result<u64, ChangeError> {
        let deleted = undo_log_repo::delete_expired(self.recorder.pool(), Utc::now())
            .await
            .map_err(|e| ChangeError::persistence("sweep quick undo log", e))?;
        if deleted > 0 {
            tracing::info!(deleted, "Swept expired quick undo entries");
        }
        Ok(deleted)
    }

    /// Runs [`QuickUndoService::sweep`] every `period` until the runtime stops.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep().await {
                    tracing::error!(error = %err, "Quick undo sweep failed");
                }
            }
        })
    }
}
