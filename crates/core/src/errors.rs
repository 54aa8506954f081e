use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result type alias for audit-relay operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Top-level error type surfaced to the capture boundary and to hosts
/// wiring the pipeline together
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The dispatch channel could not accept or persist an event
    #[error("audit pipeline failed: {0}")]
    Pipeline(#[from] DispatchError),

    /// Configuration could not be loaded or failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The outbox directory could not be opened
    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// The transport could not be constructed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Metric registration failed
    #[error("metrics registration failed: {message}")]
    Metrics { message: String },

    /// A redaction rule could not be compiled
    #[error("invalid redaction rule for field '{field}': {message}")]
    Redaction { field: String, message: String },
}

/// Failure to deliver an event through a publisher
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport could not be reached
    #[error("transport '{destination}' unavailable: {message}")]
    Unavailable {
        destination: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The transport answered but refused the message
    #[error("transport '{destination}' rejected event with status {status}: {body}")]
    Rejected {
        destination: String,
        status: u16,
        body: String,
    },

    /// The delivery attempt did not complete in time
    #[error("publishing to '{destination}' timed out after {duration:?}")]
    Timeout {
        destination: String,
        duration: Duration,
    },

    /// The event could not be encoded for the wire
    #[error("failed to encode audit event: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    /// Create an unavailable error without an underlying cause
    pub fn unavailable(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            destination: destination.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Whether a later attempt could plausibly succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Serialization { .. } => false,
        }
    }
}

/// Reasons the dispatch channel refuses an event
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Queue was full and the event could not be written to the outbox
    #[error("dispatch queue full (capacity {capacity}) and event could not be persisted")]
    Saturated { capacity: usize },

    /// Shutdown has begun and no outbox is available
    #[error("dispatch channel is shut down")]
    Closed,
}

/// Failures while reading or writing the outbox journal
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// File system operation on the journal directory failed
    #[error("outbox {operation} failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Event could not be serialized into a journal line
    #[error("failed to serialize audit event for the outbox: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    /// Another owner holds the directory lock
    #[error("outbox directory '{dir}' is already owned by another process")]
    Locked { dir: PathBuf },

    /// A blocking file task was cancelled or panicked
    #[error("outbox background task failed: {message}")]
    Task { message: String },
}

impl OutboxError {
    /// Wrap an I/O error with the path and the operation that failed
    pub fn io(path: impl AsRef<Path>, operation: &'static str, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            operation,
            source,
        }
    }
}

impl From<serde_json::Error> for OutboxError {
    fn from(source: serde_json::Error) -> Self {
        Self::Serialization { source }
    }
}

/// Configuration loading and validation failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value '{value}' for environment variable '{variable}'")]
    InvalidEnv { variable: String, value: String },

    #[error("invalid configuration: {field} {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}
