/// Constants shared across the audit-relay crates

// Event schema
pub const EVENT_VERSION: &str = "1.0";

// Placeholder substituted for sensitive values
pub const REDACTION_MARKER: &str = "██REDACTED██";

// Capture headers the boundary reads identity from
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";
pub const USER_ID_HEADER: &str = "CPP_USERID";
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

// Fallbacks for missing request facts
pub const UNKNOWN_CLIENT_IP: &str = "unknown";

// Environment variable prefix for configuration overrides
pub const CONFIG_ENV_PREFIX: &str = "AUDIT_";
