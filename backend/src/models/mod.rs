//! Data models shared across database access and API handlers.

use serde::Deserialize;

/// Query parameters for the recent-changes listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeListQuery {
    /// Maximum number of entries to return (default: 50, max: 200).
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Restrict to one entity type.
    pub entity_type: Option<String>,
    /// Restrict to one entity; only meaningful together with `entity_type`.
    pub entity_id: Option<String>,
}

fn default_limit() -> i64 {
    50
}

impl ChangeListQuery {
    /// Returns a clamped limit value (1..=200).
    pub fn limit(&self) -> i64 {
        self.limit.clamp(1, 200)
    }
}

impl Default for ChangeListQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            entity_type: None,
            entity_id: None,
        }
    }
}

pub mod actor;
pub mod audit_log;
pub mod change_entry;
pub mod snapshot;
pub mod undo_log;
