//! Audit pipeline configuration with defaults and validation
use audit_relay_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default bounded queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;
/// Default number of dispatch workers
pub const DEFAULT_WORKER_THREADS: usize = 2;
/// Default cap on captured body size
pub const DEFAULT_MAX_BODY_BYTES: usize = 4096;
/// Default journal size before rotation (10MB)
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// Default number of journal files kept
pub const DEFAULT_MAX_FILES: usize = 200;
/// Default delay between outbox replays
pub const DEFAULT_REPLAY_INTERVAL_SEC: u64 = 15;
/// Default time workers get to drain the queue on shutdown
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;
/// Highest message priority accepted by the transport
pub const MAX_PRIORITY: u8 = 9;

/// Whether a pipeline failure at submit time reaches the capture boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    /// Log and swallow the failure
    #[default]
    FailOpen,
    /// Return the failure to the caller
    FailClosed,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FAIL_OPEN" => Ok(Self::FailOpen),
            "FAIL_CLOSED" => Ok(Self::FailClosed),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

/// Which reference transport delivers events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// POST each event to an HTTP endpoint
    #[default]
    Http,
    /// Write each event to the log
    Log,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "log" => Ok(Self::Log),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

/// Broker delivery mode attached to every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    #[default]
    Persistent,
    NonPersistent,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistent => "PERSISTENT",
            Self::NonPersistent => "NON_PERSISTENT",
        }
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PERSISTENT" => Ok(Self::Persistent),
            "NON_PERSISTENT" => Ok(Self::NonPersistent),
            other => Err(format!("unknown delivery mode '{other}'")),
        }
    }
}

/// Sensitive names the redactor masks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactConfig {
    /// Header names, matched case-insensitively
    pub headers: Vec<String>,
    /// JSON field names, matched exactly
    pub json_fields: Vec<String>,
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self {
            headers: ["authorization", "cookie", "set-cookie", "x-api-key"]
                .into_iter()
                .map(String::from)
                .collect(),
            json_fields: ["password", "token", "secret", "cardNumber", "cvv"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// On-disk outbox settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub max_file_size_bytes: u64,
    /// Journal files kept before the oldest are evicted
    pub max_files: usize,
    pub replay_interval_sec: u64,
}

impl OutboxConfig {
    pub fn replay_interval(&self) -> Duration {
        Duration::from_secs(self.replay_interval_sec)
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("./audit-outbox"),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_files: DEFAULT_MAX_FILES,
            replay_interval_sec: DEFAULT_REPLAY_INTERVAL_SEC,
        }
    }
}

/// Reference transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Base URL of the broker's HTTP ingress
    pub endpoint: String,
    /// Queue or topic the events are routed to
    pub destination: String,
    /// Message priority, 0 (lowest) to 9
    pub priority: u8,
    /// Message expiry; 0 means the message never expires
    pub time_to_live_ms: u64,
    pub delivery_mode: DeliveryMode,
    pub request_timeout_ms: u64,
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Http,
            endpoint: "http://localhost:8161/api/audit".to_string(),
            destination: "jms.queue.audit".to_string(),
            priority: 4,
            time_to_live_ms: 0,
            delivery_mode: DeliveryMode::Persistent,
            request_timeout_ms: 5000,
        }
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Built-in defaults only
    #[default]
    Default,
    /// Configuration file
    ConfigFile(PathBuf),
    /// Environment variables
    EnvironmentVariable(String),
}

/// Complete audit pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Whether auditing runs at all
    pub enabled: bool,
    /// Service name stamped on captured events
    pub service: String,
    /// Deployment environment stamped on captured events
    pub env: String,
    pub include_request_body: bool,
    pub include_response_body: bool,
    pub max_body_bytes: usize,
    pub queue_capacity: usize,
    pub worker_threads: usize,
    pub failure_policy: FailurePolicy,
    pub shutdown_grace_ms: u64,
    pub redact: RedactConfig,
    pub outbox: OutboxConfig,
    pub transport: TransportConfig,
    /// Where the effective values came from (last layer applied)
    #[serde(skip)]
    pub source: ConfigSource,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service: "app".to_string(),
            env: "local".to_string(),
            include_request_body: false,
            include_response_body: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_threads: DEFAULT_WORKER_THREADS,
            failure_policy: FailurePolicy::FailOpen,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            redact: RedactConfig::default(),
            outbox: OutboxConfig::default(),
            transport: TransportConfig::default(),
            source: ConfigSource::Default,
        }
    }
}

impl AuditConfig {
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder::new()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "queue_capacity",
                "must be greater than zero",
            ));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid(
                "worker_threads",
                "must be greater than zero",
            ));
        }
        if self.outbox.enabled {
            if self.outbox.max_file_size_bytes == 0 {
                return Err(ConfigError::invalid(
                    "outbox.max_file_size_bytes",
                    "must be greater than zero",
                ));
            }
            if self.outbox.max_files == 0 {
                return Err(ConfigError::invalid(
                    "outbox.max_files",
                    "must be greater than zero",
                ));
            }
            if self.outbox.replay_interval_sec == 0 {
                return Err(ConfigError::invalid(
                    "outbox.replay_interval_sec",
                    "must be greater than zero",
                ));
            }
            if self.outbox.dir.as_os_str().is_empty() {
                return Err(ConfigError::invalid("outbox.dir", "must not be empty"));
            }
        }
        if self.transport.priority > MAX_PRIORITY {
            return Err(ConfigError::invalid(
                "transport.priority",
                format!("must be between 0 and {MAX_PRIORITY}"),
            ));
        }
        if self.transport.kind == TransportKind::Http && self.transport.endpoint.trim().is_empty()
        {
            return Err(ConfigError::invalid(
                "transport.endpoint",
                "is required for the http transport",
            ));
        }
        Ok(())
    }
}

/// Builder for creating audit configurations
pub struct AuditConfigBuilder {
    config: AuditConfig,
}

impl AuditConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: AuditConfig::default(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn with_service(mut self, service: impl Into<String>, env: impl Into<String>) -> Self {
        self.config.service = service.into();
        self.config.env = env.into();
        self
    }

    pub fn with_bodies(mut self, request: bool, response: bool) -> Self {
        self.config.include_request_body = request;
        self.config.include_response_body = response;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.config.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.config.worker_threads = workers;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn with_shutdown_grace_ms(mut self, grace_ms: u64) -> Self {
        self.config.shutdown_grace_ms = grace_ms;
        self
    }

    pub fn with_redact(mut self, redact: RedactConfig) -> Self {
        self.config.redact = redact;
        self
    }

    pub fn with_outbox_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.outbox.enabled = true;
        self.config.outbox.dir = dir.into();
        self
    }

    pub fn with_outbox_disabled(mut self) -> Self {
        self.config.outbox.enabled = false;
        self
    }

    pub fn with_outbox(mut self, outbox: OutboxConfig) -> Self {
        self.config.outbox = outbox;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn build(self) -> AuditConfig {
        self.config
    }
}

impl Default for AuditConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AuditConfig::default();

        assert_eq!(config.queue_capacity, 5000);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.max_body_bytes, 4096);
        assert_eq!(config.failure_policy, FailurePolicy::FailOpen);
        assert!(config.outbox.enabled);
        assert_eq!(config.outbox.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.outbox.max_files, 200);
        assert_eq!(config.outbox.replay_interval(), Duration::from_secs(15));
        assert!(config.redact.headers.contains(&"authorization".to_string()));
        assert!(config.redact.json_fields.contains(&"cardNumber".to_string()));
        assert_eq!(config.transport.priority, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity_and_workers() {
        let config = AuditConfig::builder().with_queue_capacity(0).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "queue_capacity",
                ..
            })
        ));

        let config = AuditConfig::builder().with_worker_threads(0).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "worker_threads",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_skips_outbox_checks_when_disabled() {
        let mut config = AuditConfig::builder().with_outbox_disabled().build();
        config.outbox.max_files = 0;
        assert!(config.validate().is_ok());

        config.outbox.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_priority_above_nine() {
        let transport = TransportConfig {
            priority: 10,
            ..TransportConfig::default()
        };
        let config = AuditConfig::builder().with_transport(transport).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AuditConfig = serde_json::from_str(
            r#"{
                "queue_capacity": 10,
                "failure_policy": "FAIL_CLOSED",
                "outbox": { "dir": "/var/spool/audit" },
                "transport": { "kind": "log", "delivery_mode": "NON_PERSISTENT" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
        assert_eq!(config.failure_policy, FailurePolicy::FailClosed);
        assert_eq!(config.outbox.dir, PathBuf::from("/var/spool/audit"));
        assert_eq!(config.outbox.max_files, DEFAULT_MAX_FILES);
        assert_eq!(config.transport.kind, TransportKind::Log);
        assert_eq!(config.transport.delivery_mode, DeliveryMode::NonPersistent);
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!("fail-closed".parse(), Ok(FailurePolicy::FailClosed));
        assert_eq!("FAIL_OPEN".parse(), Ok(FailurePolicy::FailOpen));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_delivery_mode_from_str() {
        assert_eq!("persistent".parse(), Ok(DeliveryMode::Persistent));
        assert_eq!("NON_PERSISTENT".parse(), Ok(DeliveryMode::NonPersistent));
        assert!("eventually".parse::<DeliveryMode>().is_err());
    }
}
