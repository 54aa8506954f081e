//! Redaction of sensitive headers and JSON body fields
//!
//! A [`Redactor`] compiles its field patterns once and is then shared by
//! every capture task. Redaction is textual: bodies are not parsed, so
//! malformed or truncated JSON is still masked on a best-effort basis.

use audit_relay_config::AuditConfig;
use audit_relay_core::{AuditError, AuditEvent, Headers, REDACTION_MARKER};
use regex::Regex;
use std::collections::HashSet;
use std::ops::Deref;

/// What the redactor masks and how much body it keeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionPolicy {
    sensitive_header_names: HashSet<String>,
    sensitive_json_field_names: Vec<String>,
    max_body_bytes: usize,
    keep_request_body: bool,
    keep_response_body: bool,
}

impl RedactionPolicy {
    /// Policy that keeps both bodies
    pub fn new<H, F>(headers: H, json_fields: F, max_body_bytes: usize) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let mut json_fields: Vec<String> = json_fields.into_iter().map(Into::into).collect();
        json_fields.sort();
        json_fields.dedup();

        Self {
            sensitive_header_names: headers
                .into_iter()
                .map(|name| name.as_ref().trim().to_ascii_lowercase())
                .collect(),
            sensitive_json_field_names: json_fields,
            max_body_bytes,
            keep_request_body: true,
            keep_response_body: true,
        }
    }

    /// Policy derived from the pipeline configuration
    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(
            &config.redact.headers,
            config.redact.json_fields.iter().cloned(),
            config.max_body_bytes,
        )
        .with_bodies(config.include_request_body, config.include_response_body)
    }

    /// Choose which bodies survive redaction at all
    pub fn with_bodies(mut self, request: bool, response: bool) -> Self {
        self.keep_request_body = request;
        self.keep_response_body = response;
        self
    }

    pub fn is_sensitive_header(&self, name: &str) -> bool {
        self.sensitive_header_names
            .contains(&name.to_ascii_lowercase())
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

/// An event that has passed through a [`Redactor`]
///
/// Only the redactor constructs this type, so anything holding one is known
/// to carry masked headers and bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactedEvent(AuditEvent);

impl RedactedEvent {
    pub fn as_event(&self) -> &AuditEvent {
        &self.0
    }

    pub fn into_inner(self) -> AuditEvent {
        self.0
    }
}

impl Deref for RedactedEvent {
    type Target = AuditEvent;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<RedactedEvent> for AuditEvent {
    fn from(event: RedactedEvent) -> Self {
        event.0
    }
}

/// Patterns for one sensitive JSON field
#[derive(Debug)]
struct FieldRule {
    /// `"field": "value"`, value may be cut short by truncation
    string_value: Regex,
    /// `"field": 1234` and boolean literals
    scalar_value: Regex,
}

impl FieldRule {
    fn compile(field: &str) -> Result<Self, AuditError> {
        let key = regex::escape(field);
        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| AuditError::Redaction {
                field: field.to_string(),
                message: e.to_string(),
            })
        };

        Ok(Self {
            string_value: compile(format!(r#"("{key}"\s*:\s*")(?:[^"\\]|\\.)*\\?("|$)"#))?,
            scalar_value: compile(format!(
                r#"("{key}"\s*:\s*)(?:-?[0-9][0-9.eE+\-]*|true|false)"#
            ))?,
        })
    }
}

/// Applies a [`RedactionPolicy`] to captured events
#[derive(Debug)]
pub struct Redactor {
    policy: RedactionPolicy,
    rules: Vec<FieldRule>,
    string_replacement: String,
    scalar_replacement: String,
}

impl Redactor {
    pub fn new(policy: RedactionPolicy) -> Result<Self, AuditError> {
        let rules = policy
            .sensitive_json_field_names
            .iter()
            .map(|field| FieldRule::compile(field))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            policy,
            rules,
            string_replacement: format!("${{1}}{REDACTION_MARKER}${{2}}"),
            scalar_replacement: format!("${{1}}\"{REDACTION_MARKER}\""),
        })
    }

    pub fn policy(&self) -> &RedactionPolicy {
        &self.policy
    }

    /// Produce the redacted copy of `event`; the input is left untouched
    pub fn redact(&self, event: &AuditEvent) -> RedactedEvent {
        let headers: Headers = event
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = if self.policy.is_sensitive_header(name) {
                    REDACTION_MARKER.to_string()
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect();

        let request_body = event
            .request_body()
            .filter(|_| self.policy.keep_request_body)
            .map(|body| self.redact_body(body));
        let response_body = event
            .response_body()
            .filter(|_| self.policy.keep_response_body)
            .map(|body| self.redact_body(body));

        RedactedEvent(
            event
                .to_builder()
                .with_headers(headers)
                .with_request_body(request_body)
                .with_response_body(response_body)
                .build(),
        )
    }

    /// Truncate to the byte budget, then mask every sensitive field value
    pub fn redact_body(&self, body: &str) -> String {
        let mut body = truncate_at_char_boundary(body, self.policy.max_body_bytes).to_string();
        for rule in &self.rules {
            body = rule
                .string_value
                .replace_all(&body, self.string_replacement.as_str())
                .into_owned();
            body = rule
                .scalar_value
                .replace_all(&body, self.scalar_replacement.as_str())
                .into_owned();
        }
        body
    }
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redactor(max_body_bytes: usize) -> Redactor {
        Redactor::new(RedactionPolicy::new(
            ["Authorization", "cookie"],
            ["password", "token", "cvv"],
            max_body_bytes,
        ))
        .unwrap()
    }

    fn event_with_body(body: &str) -> AuditEvent {
        AuditEvent::builder()
            .with_request("POST", "/login")
            .with_request_body(Some(body.to_string()))
            .build()
    }

    #[test]
    fn test_sensitive_headers_are_masked_case_insensitively() {
        let event = AuditEvent::builder()
            .with_header("AUTHORIZATION", "secret123")
            .with_header("Accept", "application/json")
            .with_header("Cookie", "session=abc")
            .build();

        let redacted = redactor(1000).redact(&event);

        assert_eq!(redacted.header("authorization"), Some(REDACTION_MARKER));
        assert_eq!(redacted.header("cookie"), Some(REDACTION_MARKER));
        assert_eq!(redacted.header("accept"), Some("application/json"));
        let names: Vec<_> = redacted.headers().keys().cloned().collect();
        assert_eq!(names, vec!["AUTHORIZATION", "Accept", "Cookie"]);

        // original is untouched
        assert_eq!(event.header("authorization"), Some("secret123"));
    }

    #[test]
    fn test_json_field_value_is_masked() {
        let event = event_with_body(r#"{"password":"abc123","name":"bob"}"#);
        let redacted = redactor(1000).redact(&event);

        let body = redacted.request_body().unwrap();
        assert_eq!(body, r#"{"password":"██REDACTED██","name":"bob"}"#);
    }

    #[test]
    fn test_escaped_quotes_and_spacing_are_honoured() {
        let body = redactor(1000).redact_body(r#"{ "token" : "a\"b\\c", "user": "x" }"#);
        assert_eq!(body, r#"{ "token" : "██REDACTED██", "user": "x" }"#);
    }

    #[test]
    fn test_every_occurrence_and_scalar_values_are_masked() {
        let body = redactor(1000)
            .redact_body(r#"[{"password":"one"},{"password":"two","cvv":123}]"#);
        assert!(!body.contains("one"));
        assert!(!body.contains("two"));
        assert!(!body.contains("123"));
        assert_eq!(body.matches(REDACTION_MARKER).count(), 3);
    }

    #[test]
    fn test_field_names_match_exactly() {
        let body = redactor(1000).redact_body(r#"{"Password":"keep","passwordHint":"keep"}"#);
        assert_eq!(body, r#"{"Password":"keep","passwordHint":"keep"}"#);
    }

    #[test]
    fn test_truncation_happens_before_redaction() {
        let body = r#"{"name":"bob","password":"hunter2-and-more"}"#;
        let cut = body.find("hunter2").unwrap() + 3;

        let redacted = redactor(cut).redact_body(body);
        assert!(!redacted.contains("hun"));
        assert!(redacted.ends_with(REDACTION_MARKER));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let redacted = redactor(5).redact_body("héllo wörld");
        assert!(redacted.len() <= 5);
        assert_eq!(redacted, "héll");
    }

    #[test]
    fn test_disabled_bodies_are_dropped() {
        let policy = RedactionPolicy::new(["authorization"], ["password"], 100)
            .with_bodies(false, true);
        let redactor = Redactor::new(policy).unwrap();
        let event = AuditEvent::builder()
            .with_request_body(Some("secret payload".to_string()))
            .with_response_body(Some("ok".to_string()))
            .build();

        let redacted = redactor.redact(&event);
        assert_eq!(redacted.request_body(), None);
        assert_eq!(redacted.response_body(), Some("ok"));
    }

    #[test]
    fn test_identity_survives_redaction() {
        let event = event_with_body("{}");
        let redacted = redactor(10).redact(&event);
        assert_eq!(redacted.event_id(), event.event_id());
        assert_eq!(redacted.timestamp(), event.timestamp());
        assert_eq!(redacted.into_inner().correlation_id(), event.correlation_id());
    }

    #[test]
    fn test_policy_from_config_uses_configured_lists() {
        let config = AuditConfig::builder().with_bodies(true, false).build();
        let policy = RedactionPolicy::from_config(&config);

        assert!(policy.is_sensitive_header("X-Api-Key"));
        assert!(!policy.is_sensitive_header("accept"));
        assert_eq!(policy.max_body_bytes(), config.max_body_bytes);
        assert!(policy.keep_request_body);
        assert!(!policy.keep_response_body);
    }
}
