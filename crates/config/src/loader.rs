//! Configuration loader with precedence handling
//!
//! Layers, lowest to highest: built-in defaults, an optional JSON file, then
//! `AUDIT_*` environment variables. The merged result is validated before it
//! is returned.

use crate::config::{AuditConfig, ConfigSource};
use audit_relay_core::{ConfigError, CONFIG_ENV_PREFIX};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration loader that handles precedence
pub struct AuditConfigLoader;

impl AuditConfigLoader {
    /// Load configuration from `path` (if it exists) and the process environment
    pub fn load(path: Option<&Path>) -> Result<AuditConfig, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` in place of the process environment
    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<AuditConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            Some(path) => {
                tracing::debug!(
                    "Audit config file {} not found, using defaults",
                    path.display()
                );
                AuditConfig::default()
            }
            None => AuditConfig::default(),
        };

        Self::apply_env(&mut config, lookup)?;
        config.validate()?;

        tracing::debug!(
            source = ?config.source,
            queue_capacity = config.queue_capacity,
            worker_threads = config.worker_threads,
            outbox_enabled = config.outbox.enabled,
            "Audit configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from a JSON file; missing keys keep their defaults
    pub fn load_from_file(path: &Path) -> Result<AuditConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: AuditConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.source = ConfigSource::ConfigFile(path.to_path_buf());
        Ok(config)
    }

    /// Override values from `AUDIT_*` variables
    ///
    /// Lists (`AUDIT_REDACT_HEADERS`, `AUDIT_REDACT_JSON_FIELDS`) are comma
    /// separated and replace the configured list entirely.
    pub fn apply_env<F>(config: &mut AuditConfig, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvLayer {
            lookup,
            applied: false,
        };

        env.set("ENABLED", &mut config.enabled)?;
        env.set_string("SERVICE", &mut config.service);
        env.set_string("ENV", &mut config.env);
        env.set("INCLUDE_REQUEST_BODY", &mut config.include_request_body)?;
        env.set("INCLUDE_RESPONSE_BODY", &mut config.include_response_body)?;
        env.set("MAX_BODY_BYTES", &mut config.max_body_bytes)?;
        env.set("QUEUE_CAPACITY", &mut config.queue_capacity)?;
        env.set("WORKER_THREADS", &mut config.worker_threads)?;
        env.set("FAILURE_POLICY", &mut config.failure_policy)?;
        env.set("SHUTDOWN_GRACE_MS", &mut config.shutdown_grace_ms)?;

        env.set_list("REDACT_HEADERS", &mut config.redact.headers);
        env.set_list("REDACT_JSON_FIELDS", &mut config.redact.json_fields);

        env.set("OUTBOX_ENABLED", &mut config.outbox.enabled)?;
        if let Some(dir) = env.get("OUTBOX_DIR") {
            config.outbox.dir = PathBuf::from(dir);
        }
        env.set(
            "OUTBOX_MAX_FILE_SIZE_BYTES",
            &mut config.outbox.max_file_size_bytes,
        )?;
        env.set("OUTBOX_MAX_FILES", &mut config.outbox.max_files)?;
        env.set(
            "OUTBOX_REPLAY_INTERVAL_SEC",
            &mut config.outbox.replay_interval_sec,
        )?;

        env.set("TRANSPORT_KIND", &mut config.transport.kind)?;
        env.set_string("TRANSPORT_ENDPOINT", &mut config.transport.endpoint);
        env.set_string("TRANSPORT_DESTINATION", &mut config.transport.destination);
        env.set("TRANSPORT_PRIORITY", &mut config.transport.priority)?;
        env.set(
            "TRANSPORT_DELIVERY_MODE",
            &mut config.transport.delivery_mode,
        )?;
        env.set(
            "TRANSPORT_TIME_TO_LIVE_MS",
            &mut config.transport.time_to_live_ms,
        )?;
        env.set(
            "TRANSPORT_REQUEST_TIMEOUT_MS",
            &mut config.transport.request_timeout_ms,
        )?;

        if env.applied {
            config.source = ConfigSource::EnvironmentVariable(format!("{CONFIG_ENV_PREFIX}*"));
        }
        Ok(())
    }
}

/// Reads prefixed variables and remembers whether any were present
struct EnvLayer<F> {
    lookup: F,
    applied: bool,
}

impl<F> EnvLayer<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn variable(key: &str) -> String {
        format!("{CONFIG_ENV_PREFIX}{key}")
    }

    fn get(&mut self, key: &str) -> Option<String> {
        let value = (self.lookup)(&Self::variable(key))?;
        self.applied = true;
        Some(value)
    }

    fn set<T: FromStr>(&mut self, key: &str, target: &mut T) -> Result<(), ConfigError> {
        if let Some(raw) = self.get(key) {
            *target = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                variable: Self::variable(key),
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    fn set_string(&mut self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    fn set_list(&mut self, key: &str, target: &mut Vec<String>) {
        if let Some(value) = self.get(key) {
            *target = value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect();
        }
    }
}
