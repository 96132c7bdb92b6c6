//! tabpilot kernel.
//!
//! Foundational services shared by the parser and the workflow engine:
//!
//! - **[`router`]** -- Two-level phrase matcher: exact phrases via
//!   [`aho_corasick`] and regex routes with named captures.  Every match
//!   reports the span it covered so callers can score partial matches.
//! - **[`ipc`]** -- Typed progress bus backed by
//!   [`tokio::sync::broadcast`] with explicit, cancellable subscriptions.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync`.

pub mod error;
pub mod ipc;
pub mod router;

pub use error::{KernelError, Result};
pub use ipc::{ProgressBus, ProgressEvent, Subscription};
pub use router::{IntentRouter, MatchLevel, RouteMatch};
