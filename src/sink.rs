//! Notification and audit sinks.
//!
//! Decisions that operators should see leave the engine through two
//! boundaries: a notification sink for alerting and an audit sink for the
//! permanent record. The bundled implementations write structured log
//! events; deployments wire their own transports behind the traits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Urgent,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Urgent => write!(f, "urgent"),
        }
    }
}

/// A security alert destined for operators.
#[derive(Debug, Clone)]
pub struct SecurityAlert {
    /// Short machine-readable kind, e.g. "vpn_detected".
    pub kind: String,
    pub severity: Severity,
    /// The IP or principal the alert concerns.
    pub subject: String,
    /// Unix seconds when the alert was raised.
    pub timestamp: u64,
    pub metadata: HashMap<String, String>,
}

impl SecurityAlert {
    /// Build an alert stamped with the current time.
    pub fn new(kind: &str, severity: Severity, subject: &str) -> Self {
        Self {
            kind: kind.to_string(),
            severity,
            subject: subject.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// An audit record of a decision taken.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// The operation audited, e.g. "check_request".
    pub action: String,
    pub subject: String,
    /// The outcome, e.g. "allow", "flag", "block".
    pub outcome: String,
    /// Unix seconds when the decision was taken.
    pub timestamp: u64,
}

impl AuditEvent {
    /// Build an event stamped with the current time.
    pub fn new(action: &str, subject: &str, outcome: &str) -> Self {
        Self {
            action: action.to_string(),
            subject: subject.to_string(),
            outcome: outcome.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Delivery boundary for operator alerts.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: &SecurityAlert);
}

/// Delivery boundary for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent);
}

/// Notification sink that emits structured log events.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, alert: &SecurityAlert) {
        match alert.severity {
            Severity::Info => info!(
                kind = %alert.kind,
                subject = %alert.subject,
                "Security alert"
            ),
            Severity::Warning | Severity::Urgent => warn!(
                kind = %alert.kind,
                severity = %alert.severity,
                subject = %alert.subject,
                "Security alert"
            ),
        }
    }
}

/// Audit sink that emits structured log events.
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: &AuditEvent) {
        info!(
            action = %event.action,
            subject = %event.subject,
            outcome = %event.outcome,
            "Audit"
        );
    }
}
