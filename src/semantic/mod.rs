pub mod date_alias;
pub mod loader;
pub mod schema;

pub use date_alias::*;
pub use loader::*;
pub use schema::*;
