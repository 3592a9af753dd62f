pub mod id;

pub use id::{ChangeId, UndoLogId};
