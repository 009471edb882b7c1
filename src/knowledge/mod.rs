pub mod index;
pub mod store;
pub mod tokenizer;

pub use index::*;
pub use store::*;
