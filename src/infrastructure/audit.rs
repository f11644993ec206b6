use crate::domain::audit::{AuditEvent, AuditRecord};
use crate::domain::ports::AuditSink;
use std::sync::{Arc, Mutex, PoisonError};

/// Emits every record as a structured `tracing` event on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        match serde_json::to_string(&record.event) {
            Ok(details) => tracing::info!(
                target: "audit",
                at = %record.at,
                actor = ?record.actor,
                %details,
                "transition"
            ),
            Err(e) => tracing::warn!(target: "audit", error = %e, "unserializable audit record"),
        }
    }
}

/// Keeps records in memory so callers can inspect the trail.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
