//! Ballast Protocol - Shared data types for context-budget management
//!
//! This crate defines the records exchanged between the Ballast components:
//! - Operation records ingested into working memory
//! - The durable checkpoint schema
//! - Token estimation used for every size decision

mod checkpoint;
mod estimate;
mod operation;

pub use checkpoint::*;
pub use estimate::*;
pub use operation::*;
