//! Shared utilities for audit-relay
//!
//! File system helpers used by the outbox (atomic rewrites, the advisory
//! directory lock) and a tracing initialiser for hosts and tests.

pub mod atomic_file;
pub mod directory_lock;
pub mod logging;

pub use atomic_file::*;
pub use directory_lock::DirectoryLock;
pub use logging::init_tracing;
