pub mod clipper;

pub use clipper::*;
