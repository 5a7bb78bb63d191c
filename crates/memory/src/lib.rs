//! Memory and session store implementations for SteerClaw.
//!
//! Both backends keep everything in process. Durable stores plug in by
//! implementing [`steerclaw_core::MemoryBackend`] or
//! [`steerclaw_core::SessionStore`] outside this crate.

pub mod in_memory;
pub mod sessions;

pub use in_memory::InMemoryBackend;
pub use sessions::InMemorySessionStore;
