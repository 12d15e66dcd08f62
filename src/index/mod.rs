//! Document catalog
//!
//! - Bounded, id-keyed catalog of live documents
//! - Flat-file persistence, rewritten on every mutation

mod catalog;
pub mod persistence;

pub use catalog::{DocumentIndex, IndexError};
