//! Context window management.
//!
//! Token estimation and history compaction. The agent loop asks the
//! [`ContextManager`] before every completion request whether the system
//! prompt plus history still fits the run's budget.

pub mod compressor;
pub mod token;

pub use compressor::{CompressionResult, ContextManager, SUMMARY_METADATA_KEY};
