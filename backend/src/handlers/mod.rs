pub mod changes;
pub mod health;
pub mod quick_undo;

pub use changes::*;
pub use health::*;
pub use quick_undo::*;
