//! Core domain types and errors for `audit-relay`.
//!
//! ## Key Components
//!
//! - **`event`**: the immutable [`AuditEvent`] describing one captured
//!   request/response interaction, and its builder.
//! - **`errors`**: error enums for every stage of the delivery pipeline plus
//!   the top-level [`AuditError`] surfaced to callers.
//! - **`constants`**: shared constants such as the redaction marker and the
//!   capture header names.

pub mod constants;
pub mod errors;
pub mod event;

pub use self::{
    constants::*,
    errors::{AuditError, ConfigError, DispatchError, OutboxError, Result, TransportError},
    event::{AuditEvent, AuditEventBuilder, Headers},
};
