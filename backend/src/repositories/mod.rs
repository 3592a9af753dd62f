pub mod audit_log;
pub mod change_log;
pub mod common;
pub mod entity_rows;
pub mod schema;
pub mod transaction;
pub mod undo_log;

pub use common::*;
pub use schema::{SchemaCatalog, TableColumns};
pub use transaction::*;
