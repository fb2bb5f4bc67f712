//! # drover-core
//!
//! Core abstractions for the Drover workflow engine.
//!
//! This crate provides the foundational types and traits used across all
//! Drover components:
//!
//! - **Identifiers**: The canonical `RequestId` stream identifier
//! - **Stored Events**: The append-only event model and its store contract
//! - **Deterministic Event Ids**: Content-addressed identifiers so that
//!   logically-identical retries collide on the same physical id
//! - **Message Context**: Correlation/causation propagation
//! - **Clock**: Injectable time source for deterministic tests
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `drover-core` is the only crate allowed to define shared primitives. The
//! workflow domain (events, aggregate, handlers) lives in `drover-engine`
//! and interacts with storage exclusively through the contracts defined
//! here.
//!
//! ## Example
//!
//! ```rust
//! use drover_core::prelude::*;
//!
//! let request_id = RequestId::new("pA", "rK").expect("valid keys");
//! assert_eq!(request_id.to_string(), "pA|rK");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod context;
pub mod error;
pub mod event;
pub mod event_id;
pub mod event_store;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use drover_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::context::MessageContext;
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventToAppend, StoredEvent};
    pub use crate::event_id::deterministic_event_id;
    pub use crate::event_store::{EventStore, MemoryEventStore};
    pub use crate::id::RequestId;
}

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::MessageContext;
pub use error::{Error, Result};
pub use event::{EventToAppend, StoredEvent};
pub use event_id::deterministic_event_id;
pub use event_store::{EventStore, MemoryEventStore};
pub use id::RequestId;
