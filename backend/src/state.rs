use std::sync::Arc;

use crate::{
    config::Config,
    db::connection::DbPool,
    services::{
        AuditLogService, AuditTrail, ChangeFeed, ChangeRecorder, QuickUndoPolicy,
        QuickUndoService, RestoreRegistry, SnapshotSerializer, UndoService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    pub registry: Arc<RestoreRegistry>,
    pub snapshots: SnapshotSerializer,
    pub recorder: ChangeRecorder,
    pub undo: UndoService,
    pub quick_undo: Arc<QuickUndoService>,
}

impl AppState {
    /// Wires the services over one pool. The audit trail writes to the same
    /// database as the change log.
    pub fn new(
        pool: DbPool,
        config: Config,
        registry: RestoreRegistry,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        let audit: Arc<dyn AuditTrail> = Arc::new(AuditLogService::new(pool.clone()));
        Self::with_audit(pool, config, registry, feed, audit)
    }

    pub fn with_audit(
        pool: DbPool,
        config: Config,
        registry: RestoreRegistry,
        feed: Arc<dyn ChangeFeed>,
        audit: Arc<dyn AuditTrail>,
    ) -> Self {
        let registry = Arc::new(registry);
        let recorder =
            ChangeRecorder::new(pool.clone(), feed).with_admin_override(config.admin_undo_any);
        let undo = UndoService::new(Arc::clone(&registry), recorder.clone(), Arc::clone(&audit))
            .with_admin_override(config.admin_undo_any);
        let quick_undo = Arc::new(QuickUndoService::new(
            Arc::clone(&registry),
            recorder.clone(),
            audit,
            QuickUndoPolicy::from_config(&config),
        ));
        let snapshots = SnapshotSerializer::new(pool.clone(), Arc::clone(&registry));

        Self {
            pool,
            config,
            registry,
            snapshots,
            recorder,
            undo,
            quick_undo,
        }
    }
}
