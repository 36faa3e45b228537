//! Secret access auditing.
//!
//! One record per backend retrieval, written before the resolved
//! value is handed to the caller. Records identify the reference,
//! backend, and requesting connection — never the value.

use chrono::{DateTime, Utc};

/// A single secret access event.
#[derive(Debug, Clone)]
pub struct SecretAccessRecord {
    /// Reference string in `backend:path#key` form.
    pub reference: String,
    /// Backend type that served (or failed) the retrieval.
    pub backend: &'static str,
    /// Connection/tenant the retrieval was made for.
    pub connection_id: String,
    /// Whether the backend returned a value.
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// Sink for secret access records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: SecretAccessRecord);
}

/// Default sink: structured log lines via `tracing`.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: SecretAccessRecord) {
        tracing::info!(
            reference = %record.reference,
            backend = record.backend,
            connection_id = %record.connection_id,
            success = record.success,
            "Secret access"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_debug_has_no_value_field() {
        let record = SecretAccessRecord {
            reference: "env:TOKEN".to_string(),
            backend: "env",
            connection_id: "conn-1".to_string(),
            success: true,
            at: Utc::now(),
        };
        let printed = format!("{record:?}");
        assert!(printed.contains("env:TOKEN"));
        assert!(!printed.to_lowercase().contains("value"));
    }
}
