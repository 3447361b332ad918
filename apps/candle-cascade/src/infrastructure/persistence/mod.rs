//! Storage adapters implementing the application ports.
//!
//! The in-memory implementations are the reference adapters wired into
//! the binary; a durable engine plugs in behind the same ports.

mod in_memory;

pub use in_memory::{InMemoryBarStore, InMemoryTickStore, InMemoryWatermarkStore};
