//! Configuration model and loading for audit-relay
//!
//! [`AuditConfig`] carries every recognised option with its default.
//! [`AuditConfigLoader`] layers defaults, an optional JSON file and `AUDIT_*`
//! environment overrides, then validates the result.

pub mod config;
pub mod loader;

pub use config::*;
pub use loader::AuditConfigLoader;
