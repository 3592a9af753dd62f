pub mod audit_log;
pub mod change_feed;
pub mod change_recorder;
pub mod entities;
pub mod quick_undo;
pub mod restore;
pub mod snapshot;
pub mod undo;

pub use audit_log::{AuditLogService, AuditTrail};
pub use change_feed::{BroadcastChangeFeed, ChangeEvent, ChangeFeed};
pub use change_recorder::ChangeRecorder;
pub use quick_undo::{QuickUndoPolicy, QuickUndoService};
pub use restore::{EntityRestorer, RestoreRegistry};
pub use snapshot::SnapshotSerializer;
pub use undo::{UndoOutcome, UndoService};
