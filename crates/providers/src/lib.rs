//! Model selection for SteerClaw.
//!
//! The runtime never picks a backend by name alone: [`ModelRouter`] filters
//! a table of known models by context window and capabilities, then ranks
//! the survivors by the caller's priority (local, cost, or quality).

pub mod models;
pub mod router;

pub use models::{ModelPricing, ModelProfile, default_models};
pub use router::{ModelRouter, ModelSelection, ModelTask, RoutingPriority};
