//! `callmesh-core` — domain foundation for call dispatch.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, the call record and its status machine, wire payloads,
//! retry policy, and deterministic outcome scripting.

pub mod call;
pub mod error;
pub mod id;
pub mod message;
pub mod outcome;
pub mod retry;

pub use call::{Call, CallStatus};
pub use error::{DomainError, DomainResult};
pub use id::{CallId, Destination};
pub use message::{CallbackPayload, JobRequest, StatusEvent};
pub use outcome::{CallOutcome, OutcomeScript};
pub use retry::{BackoffStrategy, RetryPolicy};
