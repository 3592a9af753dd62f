use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;

use crate::error::ChangeError;
use crate::models::{
    actor::Actor,
    change_entry::{ChangeEntry, ChangeOperation, NewChange},
    snapshot::{record_from_serializable, CanonicalRecord},
    ChangeListQuery,
};
use crate::repositories::change_log::{self as change_log_repo, ChangeLogFilters};
use crate::services::change_feed::{self, ChangeEvent, ChangeFeed};
use crate::types::ChangeId;

/// Appends change entries and announces them on the change feed.
#[derive(Clone)]
pub struct ChangeRecorder {
    pool: PgPool,
    feed: Arc<dyn ChangeFeed>,
    admin_reads_all: bool,
}

impl ChangeRecorder {
    pub fn new(pool: PgPool, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            pool,
            feed,
            admin_reads_all: false,
        }
    }

    /// Lets admins list and read every actor's entries.
    pub fn with_admin_override(mut self, enabled: bool) -> Self {
        self.admin_reads_all = enabled;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Records one mutation. The entry is durable when this returns; the feed
    /// is notified afterwards and its failures never surface here.
    pub async fn record(
        &self,
        actor: &str,
        entity_type: &str,
        entity_id: &str,
        operation: ChangeOperation,
        before: Option<CanonicalRecord>,
        after: Option<CanonicalRecord>,
    ) -> Result<ChangeId, ChangeError> {
        let change = NewChange::new(actor, entity_type, entity_id, operation, before, after)?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ChangeError::persistence("acquire connection", e))?;
        let entry = self.record_in(&mut conn, &change).await?;
        self.notify(&entry);
        Ok(entry.id)
    }

    /// [`ChangeRecorder::record`] for callers holding structured values.
    pub async fn record_serialized<B, A>(
        &self,
        actor: &str,
        entity_type: &str,
        entity_id: &str,
        operation: ChangeOperation,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Result<ChangeId, ChangeError>
    where
        B: Serialize + Sync,
        A: Serialize + Sync,
    {
        let before = before.map(record_from_serializable).transpose()?;
        let after = after.map(record_from_serializable).transpose()?;
        self.record(actor, entity_type, entity_id, operation, before, after)
            .await
    }

    pub async fn record_created<T: Serialize + Sync>(
        &self,
        actor: &str,
        entity_type: &str,
        entity_id: &str,
        created: &T,
    ) -> Result<ChangeId, ChangeError> {
        self.record_serialized::<T, T>(
            actor,
            entity_type,
            entity_id,
            ChangeOperation::Create,
            None,
            Some(created),
        )
        .await
    }

    pub async fn record_updated<T: Serialize + Sync>(
        &self,
        actor: &str,
        entity_type: &str,
        entity_id: &str,
        before: &T,
        after: &T,
    ) -> Result<ChangeId, ChangeError> {
        self.record_serialized(
            actor,
            entity_type,
            entity_id,
            ChangeOperation::Update,
            Some(before),
            Some(after),
        )
        .await
    }

    pub async fn record_deleted<T: Serialize + Sync>(
        &self,
        actor: &str,
        entity_type: &str,
        entity_id: &str,
        deleted: &T,
    ) -> Result<ChangeId, ChangeError> {
        self.record_serialized::<T, T>(
            actor,
            entity_type,
            entity_id,
            ChangeOperation::Delete,
            Some(deleted),
            None,
        )
        .await
    }

    /// Appends inside the caller's transaction. The caller notifies once the
    /// transaction has committed.
    pub async fn record_in(
        &self,
        conn: &mut PgConnection,
        change: &NewChange,
    ) -> Result<ChangeEntry, ChangeError> {
        let entry = change_log_repo::insert_change(conn, change)
            .await
            .map_err(|e| {
                ChangeError::persistence(
                    format!(
                        "record {} {}/{}",
                        change.operation, change.entity_type, change.entity_id
                    ),
                    e,
                )
            })?;
        tracing::debug!(
            change_id = %entry.id,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            operation = %entry.operation,
            actor = %entry.actor,
            "Recorded change"
        );
        Ok(entry)
    }

    pub fn notify(&self, entry: &ChangeEntry) {
        change_feed::notify(&self.feed, ChangeEvent::from(entry));
    }

    /// Newest entries visible to `actor`.
    pub async fn list_recent(
        &self,
        actor: &Actor,
        query: &ChangeListQuery,
    ) -> Result<Vec<ChangeEntry>, ChangeError> {
        let filters = ChangeLogFilters {
            actor: self.actor_scope(actor),
            entity_type: query.entity_type.clone(),
            entity_id: query.entity_id.clone(),
        };
        change_log_repo::list_recent_changes(&self.pool, &filters, query.limit())
            .await
            .map_err(|e| ChangeError::persistence("list recent changes", e))
    }

    /// One entry; entries outside the actor's scope are reported as missing.
    pub async fn find(&self, actor: &Actor, id: ChangeId) -> Result<ChangeEntry, ChangeError> {
        let entry = change_log_repo::fetch_change(&self.pool, id)
            .await
            .map_err(|e| ChangeError::persistence(format!("fetch change {}", id), e))?;
        match entry {
            Some(entry) if actor.may_act_for(&entry.actor, self.admin_reads_all) => Ok(entry),
            _ => Err(ChangeError::not_found(format!("change {} not found", id))),
        }
    }

    fn actor_scope(&self, actor: &Actor) -> Option<String> {
        if self.admin_reads_all && actor.is_admin() {
            None
        } else {
            Some(actor.id.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::change_feed::MockChangeFeed;
    use sqlx::postgres::PgPoolOptions;

    fn recorder(admin_override: bool) -> ChangeRecorder {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/changekeeper_unused")
            .expect("lazy pool");
        ChangeRecorder::new(pool, Arc::new(MockChangeFeed::new()))
            .with_admin_override(admin_override)
    }

    #[tokio::test]
    async fn members_are_always_scoped_to_themselves() {
        let recorder = recorder(true);
        assert_eq!(
            recorder.actor_scope(&Actor::member("alice")),
            Some("alice".to_string())
        );
    }

    #[tokio::test]
    async fn admins_see_everything_only_with_override() {
        assert_eq!(recorder(true).actor_scope(&Actor::admin("root")), None);
        assert_eq!(
            recorder(false).actor_scope(&Actor::admin("root")),
            Some("root".to_string())
        );
    }

    #[tokio::test]
    async fn record_rejects_malformed_changes_before_touching_storage() {
        let err = recorder(false)
            .record(
                "alice",
                "vendors",
                "v1",
                ChangeOperation::Create,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
