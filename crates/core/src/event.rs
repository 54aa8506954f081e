//! Audit event value object
//!
//! An [`AuditEvent`] describes one captured request/response interaction. It is
//! immutable once built: every field is private and only readable through
//! accessors. Producing a variant (for example a redacted copy) goes through
//! [`AuditEvent::to_builder`], which yields a new event and leaves the
//! original untouched.

use crate::constants::{
    CORRELATION_ID_HEADER, EVENT_VERSION, FORWARDED_FOR_HEADER, UNKNOWN_CLIENT_IP, USER_ID_HEADER,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Captured request headers in arrival order, keys in their original case
pub type Headers = IndexMap<String, String>;

/// Structured record of one inbound request and its response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    event_version: String,
    event_id: String,
    service: String,
    env: String,
    timestamp: DateTime<Utc>,
    correlation_id: String,
    #[serde(default)]
    user_id: Option<String>,
    method: String,
    path: String,
    #[serde(default)]
    query: String,
    status: u16,
    latency_ms: u64,
    #[serde(default)]
    client_ip: String,
    #[serde(default)]
    user_agent: String,
    #[serde(default)]
    request_bytes: u64,
    #[serde(default)]
    response_bytes: u64,
    #[serde(default)]
    headers: Headers,
    #[serde(default)]
    request_body: Option<String>,
    #[serde(default)]
    response_body: Option<String>,
}

impl AuditEvent {
    /// Start building a new event
    pub fn builder() -> AuditEventBuilder {
        AuditEventBuilder::default()
    }

    /// Copy this event into a builder, keeping its identity and timestamp
    pub fn to_builder(&self) -> AuditEventBuilder {
        AuditEventBuilder {
            event_version: Some(self.event_version.clone()),
            event_id: Some(self.event_id.clone()),
            service: self.service.clone(),
            env: self.env.clone(),
            timestamp: Some(self.timestamp),
            correlation_id: Some(self.correlation_id.clone()),
            user_id: self.user_id.clone(),
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            status: self.status,
            latency_ms: self.latency_ms,
            client_ip: Some(self.client_ip.clone()),
            user_agent: self.user_agent.clone(),
            request_bytes: self.request_bytes,
            response_bytes: self.response_bytes,
            headers: self.headers.clone(),
            request_body: self.request_body.clone(),
            response_body: self.response_body.clone(),
        }
    }

    pub fn event_version(&self) -> &str {
        &self.event_version
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn request_bytes(&self) -> u64 {
        self.request_bytes
    }

    pub fn response_bytes(&self) -> u64 {
        self.response_bytes
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Look up a header value ignoring the case of its name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn request_body(&self) -> Option<&str> {
        self.request_body.as_deref()
    }

    pub fn response_body(&self) -> Option<&str> {
        self.response_body.as_deref()
    }
}

/// Builder for [`AuditEvent`]
///
/// Identity fields left unset are generated at [`build`](Self::build) time: a
/// fresh UUID for the event id, the current time for the timestamp and, when
/// the caller supplied none, a fresh UUID as correlation id.
#[derive(Debug, Clone, Default)]
pub struct AuditEventBuilder {
    event_version: Option<String>,
    event_id: Option<String>,
    service: String,
    env: String,
    timestamp: Option<DateTime<Utc>>,
    correlation_id: Option<String>,
    user_id: Option<String>,
    method: String,
    path: String,
    query: String,
    status: u16,
    latency_ms: u64,
    client_ip: Option<String>,
    user_agent: String,
    request_bytes: u64,
    response_bytes: u64,
    headers: Headers,
    request_body: Option<String>,
    response_body: Option<String>,
}

impl AuditEventBuilder {
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Set method and path of the captured request
    pub fn with_request(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.method = method.into();
        self.path = path.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Set response status and the time the request took
    pub fn with_response(mut self, status: u16, latency_ms: u64) -> Self {
        self.status = status;
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_sizes(mut self, request_bytes: u64, response_bytes: u64) -> Self {
        self.request_bytes = request_bytes;
        self.response_bytes = response_bytes;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_request_body(mut self, body: Option<String>) -> Self {
        self.request_body = body;
        self
    }

    pub fn with_response_body(mut self, body: Option<String>) -> Self {
        self.response_body = body;
        self
    }

    /// Derive correlation id, user id, client address and user agent from
    /// the captured headers.
    ///
    /// A blank correlation header is ignored. The client address is the first
    /// hop of `X-Forwarded-For` when present, otherwise `remote_addr`.
    pub fn with_identity_from_headers(mut self, remote_addr: Option<&str>) -> Self {
        let lookup = |name: &str| {
            self.headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.trim().to_string())
        };

        let correlation_id = lookup(CORRELATION_ID_HEADER).filter(|value| !value.is_empty());
        let user_id = lookup(USER_ID_HEADER);
        let forwarded = lookup(FORWARDED_FOR_HEADER)
            .and_then(|value| value.split(',').next().map(|hop| hop.trim().to_string()))
            .filter(|hop| !hop.is_empty());
        let user_agent = lookup("User-Agent");

        if correlation_id.is_some() {
            self.correlation_id = correlation_id;
        }
        if user_id.is_some() {
            self.user_id = user_id;
        }
        self.client_ip = forwarded
            .or_else(|| remote_addr.map(str::to_string))
            .or(self.client_ip);
        if let Some(user_agent) = user_agent {
            self.user_agent = user_agent;
        }
        self
    }

    /// Build the immutable event
    pub fn build(self) -> AuditEvent {
        AuditEvent {
            event_version: self
                .event_version
                .unwrap_or_else(|| EVENT_VERSION.to_string()),
            event_id: self
                .event_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            service: self.service,
            env: self.env,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: self.user_id,
            method: self.method,
            path: self.path,
            query: self.query,
            status: self.status,
            latency_ms: self.latency_ms,
            client_ip: self
                .client_ip
                .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string()),
            user_agent: self.user_agent,
            request_bytes: self.request_bytes,
            response_bytes: self.response_bytes,
            headers: self.headers,
            request_body: self.request_body,
            response_body: self.response_body,
        }
    }
}
