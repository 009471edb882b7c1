//! Execution of validated SQL

pub mod result;
pub mod sqlite_engine;

pub use result::QueryOutput;
pub use sqlite_engine::{SqlExecutor, SqliteExecutor};
