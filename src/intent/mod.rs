//! Intent extraction: question text to structured intent

pub mod extractor;
pub mod scorer;
pub mod types;

pub use extractor::*;
pub use scorer::*;
pub use types::*;
