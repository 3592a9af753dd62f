use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{models::audit_log::AuditLog, repositories::audit_log as audit_log_repo};

/// Sink for human-readable notes about reversals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn append(
        &self,
        actor: &str,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        summary: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub event_type: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub summary: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct AuditLogService {
    pool: PgPool,
}

impl AuditLogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record_event(&self, entry: AuditLogEntry) -> Result<(), sqlx::Error> {
        let log = AuditLog {
            id: Uuid::new_v4().to_string(),
            occurred_at: entry.occurred_at,
            actor_id: entry.actor_id,
            event_type: entry.event_type,
            target_type: entry.target_type,
            target_id: entry.target_id,
            summary: entry.summary,
            metadata: entry.metadata.map(Json),
        };

        audit_log_repo::insert_audit_log(&self.pool, &log).await
    }
}

#[async_trait]
impl AuditTrail for AuditLogService {
    async fn append(
        &self,
        actor: &str,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        summary: &str,
    ) -> anyhow::Result<()> {
        self.record_event(AuditLogEntry {
            occurred_at: Utc::now(),
            actor_id: Some(actor.to_string()),
            event_type: action.to_string(),
            target_type: Some(entity_type.to_string()),
            target_id: Some(entity_id.to_string()),
            summary: summary.to_string(),
            metadata: None,
        })
        .await?;
        Ok(())
    }
}

/// Appends a note, logging instead of failing: the reversal it describes has
/// already been committed.
pub async fn append_note(
    audit: &dyn AuditTrail,
    actor: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    summary: &str,
) {
    if let Err(err) = audit
        .append(actor, action, entity_type, entity_id, summary)
        .await
    {
        tracing::error!(
            actor,
            action,
            entity_type,
            entity_id,
            error = %err,
            "failed to write audit note"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_note_passes_fields_through() {
        let mut mock = MockAuditTrail::new();
        mock.expect_append()
            .withf(|actor, action, entity_type, entity_id, summary| {
                actor.to_string() == "alice"
                    && action.to_string() == "change_undone"
                    && entity_type.to_string() == "vendors"
                    && entity_id.to_string() == "v1"
                    && summary.contains("create")
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        append_note(&mock, "alice", "change_undone", "vendors", "v1", "reverted create").await;
    }

    #[tokio::test]
    async fn append_note_tolerates_sink_failure() {
        let mut mock = MockAuditTrail::new();
        mock.expect_append()
            .times(1)
            .returning(|_, _, _, _, _| Err(anyhow::anyhow!("disk full")));

        append_note(&mock, "alice", "change_undone", "vendors", "v1", "reverted").await;
    }
}
