// crates/flotilla-core/src/runtime/audit.rs
// ============================================================================
// Module: Flotilla Audit Logging
// Description: Structured audit events for control service and agent activity.
// Purpose: Emit JSON-lines logs without hard dependencies on a log pipeline.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Audit events are small, flat JSON records. Sinks decide where they go:
//! stderr, an append-only file, an in-memory buffer for tests, or nowhere.
//! Timestamps come from the caller's injected clock so that test logs are
//! deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::core::ConfigVersion;
use crate::core::NodeId;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Kind of audited activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// A configuration delta was accepted and published.
    ProposalAccepted,
    /// A configuration delta was rejected.
    ProposalRejected,
    /// A node was registered.
    NodeRegistered,
    /// A node was deregistered.
    NodeDeregistered,
    /// A node state report was merged.
    ReportAccepted,
    /// A node state report was discarded as stale.
    ReportStale,
    /// An agent finished a reconciliation cycle.
    AgentCycleCompleted,
    /// An agent cycle aborted before reporting.
    AgentCycleFailed,
    /// An agent could not deliver its report.
    AgentReportFailed,
    /// An agent report was stale; the agent resumed after the recorded generation.
    AgentReportResynced,
}

/// Audit event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event: AuditEventKind,
    /// Event timestamp (milliseconds on the injected clock).
    pub timestamp_ms: u64,
    /// Node concerned, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Configuration version concerned, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<ConfigVersion>,
    /// Report generation, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Number of planned actions, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<usize>,
    /// Number of failed actions, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<usize>,
    /// Normalized error kind label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Free-form message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEvent {
    /// Creates an event with no optional fields set.
    #[must_use]
    pub const fn new(event: AuditEventKind, timestamp: Timestamp) -> Self {
        Self {
            event,
            timestamp_ms: timestamp.as_millis(),
            node_id: None,
            version: None,
            generation: None,
            actions: None,
            failures: None,
            error_kind: None,
            message: None,
        }
    }

    /// Sets the node.
    #[must_use]
    pub fn with_node(mut self, node_id: &NodeId) -> Self {
        self.node_id = Some(node_id.clone());
        self
    }

    /// Sets the configuration version.
    #[must_use]
    pub const fn with_version(mut self, version: ConfigVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the report generation.
    #[must_use]
    pub const fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Sets planned and failed action counts.
    #[must_use]
    pub const fn with_actions(mut self, actions: usize, failures: usize) -> Self {
        self.actions = Some(actions);
        self.failures = Some(failures);
        self
    }

    /// Sets the error kind and message.
    #[must_use]
    pub fn with_error(mut self, error_kind: &'static str, message: impl Into<String>) -> Self {
        self.error_kind = Some(error_kind);
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for Flotilla events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Audit sink that keeps events in memory for assertions.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns recorded events of one kind.
    #[must_use]
    pub fn events_of(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.event == kind).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
