//! Statrig run event bus.
//!
//! Live progress during a run is delivered exclusively through this crate:
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`RunEvent`] — the transient progress event envelope.
//!
//! Events are fire-and-forget and never persisted; the durable record of a
//! run is written once, by the worker's terminal commit.

pub mod bus;

pub use bus::{EventBus, RunEvent, RunEventType};
