use sqlx::{PgConnection, PgPool};
use std::sync::Arc;

use crate::error::ChangeError;
use crate::models::snapshot::CanonicalRecord;
use crate::services::restore::RestoreRegistry;

/// Read-only capture of persisted entities as canonical records.
#[derive(Clone)]
pub struct SnapshotSerializer {
    pool: PgPool,
    registry: Arc<RestoreRegistry>,
}

impl SnapshotSerializer {
    pub fn new(pool: PgPool, registry: Arc<RestoreRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Current state of an entity, children included for composites.
    pub async fn snapshot(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<CanonicalRecord, ChangeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ChangeError::persistence("acquire connection", e))?;
        self.snapshot_in(&mut conn, entity_type, entity_id).await
    }

    /// Same as [`SnapshotSerializer::snapshot`] on the caller's connection,
    /// for handlers that capture `before` inside their own transaction.
    pub async fn snapshot_in(
        &self,
        conn: &mut PgConnection,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<CanonicalRecord, ChangeError> {
        self.registry.snapshot(conn, entity_type, entity_id).await
    }
}
