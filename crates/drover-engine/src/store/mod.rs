//! Pluggable adapter implementations.
//!
//! Production deployments supply their own adapters behind the contracts
//! in [`crate::projection`], [`crate::intake`], [`crate::idempotency`],
//! [`crate::external`], and [`crate::publish`]. The in-memory set here is
//! the substrate for tests and local runs.

pub mod memory;

pub use memory::{
    MemoryEventPublisher, MemoryIdempotencyStore, MemoryIntakeRepository,
    MemoryProjectionRepository, ScriptedExternalService,
};
