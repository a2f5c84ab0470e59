//! Audit trail for operations tagged `@Auditable`
//!
//! Events are kept in a bounded in-memory buffer and, when a log path is
//! configured, appended as JSON lines to disk. The audit aspect is the main
//! producer; anything else may log events directly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{error, info};

/// Maximum number of events to keep in memory
const DEFAULT_MEMORY_BUFFER_SIZE: usize = 10_000;

/// Configuration for the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum number of events to keep in memory
    pub memory_buffer_size: usize,

    /// JSON-lines file to append events to; memory only when unset
    pub log_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            memory_buffer_size: DEFAULT_MEMORY_BUFFER_SIZE,
            log_path: None,
        }
    }
}

/// One successful audited call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    /// Business action, e.g. `CREATE_ORDER`
    pub action: String,
    /// `Owner.operation` that was called
    pub target: String,
    pub principal: Option<String>,
    pub args: Vec<JsonValue>,
    pub result: JsonValue,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            event_id: format!("evt-{}", uuid::Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            action: action.into(),
            target: target.into(),
            principal: None,
            args: Vec::new(),
            result: JsonValue::Null,
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_args(mut self, args: &[JsonValue]) -> Self {
        self.args = args.to_vec();
        self
    }

    pub fn with_result(mut self, result: JsonValue) -> Self {
        self.result = result;
        self
    }
}

/// Bounded audit buffer with optional JSON-lines persistence
pub struct AuditTrail {
    config: AuditConfig,
    buffer: RwLock<VecDeque<AuditEvent>>,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl AuditTrail {
    /// Create a trail; opens (and creates) the log file when one is configured
    pub fn new(config: AuditConfig) -> Result<Self> {
        let writer = match &config.log_path {
            Some(path) => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    fs::create_dir_all(dir).with_context(|| {
                        format!("failed to create audit log directory {}", dir.display())
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open audit log {}", path.display()))?;
                info!(path = %path.display(), "audit trail persisting to disk");
                Some(BufWriter::new(file))
            }
            None => None,
        };

        Ok(Self {
            config,
            buffer: RwLock::new(VecDeque::new()),
            writer: Mutex::new(writer),
        })
    }

    /// Memory-only trail
    pub fn in_memory() -> Self {
        Self {
            config: AuditConfig::default(),
            buffer: RwLock::new(VecDeque::new()),
            writer: Mutex::new(None),
        }
    }

    /// Record an event
    pub fn log(&self, event: AuditEvent) {
        info!(
            event_id = %event.event_id,
            action = %event.action,
            target = %event.target,
            principal = ?event.principal,
            "audit event"
        );

        if let Err(e) = self.persist(&event) {
            error!(error = %e, "failed to persist audit event");
        }

        let mut buffer = self.buffer.write();
        buffer.push_back(event);
        while buffer.len() > self.config.memory_buffer_size {
            buffer.pop_front();
        }
    }

    fn persist(&self, event: &AuditEvent) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Some(writer) = writer.as_mut() {
            let json = serde_json::to_string(event)?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Query events from the in-memory buffer, oldest first
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        self.buffer
            .read()
            .iter()
            .filter(|event| filter.matches(event))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        self.buffer.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    /// Flush the JSON-lines writer, if any
    pub fn flush(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.flush().context("failed to flush audit log")?;
        }
        Ok(())
    }

    /// Events kept in memory before the oldest are dropped
    pub fn capacity(&self) -> usize {
        self.config.memory_buffer_size
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }
}

/// Filter for querying audit events
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub principal: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        if self.action.as_ref().is_some_and(|a| a != &event.action) {
            return false;
        }
        if self
            .principal
            .as_ref()
            .is_some_and(|p| event.principal.as_ref() != Some(p))
        {
            return false;
        }
        if self.after.is_some_and(|after| event.timestamp <= after) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn buffer_is_bounded() {
        let trail = AuditTrail::new(AuditConfig {
            memory_buffer_size: 2,
            log_path: None,
        })
        .unwrap();

        for action in ["A", "B", "C"] {
            trail.log(AuditEvent::new(action, "OrderService.createOrder"));
        }

        assert_eq!(trail.len(), 2);
        let recent: Vec<_> = trail.recent(10).into_iter().map(|e| e.action).collect();
        assert_eq!(recent, vec!["C", "B"]);
    }

    #[test]
    fn query_filters() {
        let trail = AuditTrail::in_memory();
        trail.log(AuditEvent::new("CREATE_ORDER", "OrderService.createOrder").with_principal("alice"));
        trail.log(AuditEvent::new("CREATE_ORDER", "OrderService.createOrder").with_principal("bob"));
        trail.log(AuditEvent::new("DELETE_USER", "UserService.delete").with_principal("alice"));

        let alice = trail.query(&AuditFilter::new().with_principal("alice"));
        assert_eq!(alice.len(), 2);

        let deletes = trail.query(&AuditFilter::new().with_action("DELETE_USER"));
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].target, "UserService.delete");

        let first = trail.query(&AuditFilter::new().with_action("CREATE_ORDER").with_limit(1));
        assert_eq!(first[0].principal.as_deref(), Some("alice"));
    }

    #[test]
    fn persists_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let trail = AuditTrail::new(AuditConfig {
            memory_buffer_size: 10,
            log_path: Some(path.clone()),
        })
        .unwrap();

        trail.log(
            AuditEvent::new("CREATE_ORDER", "OrderService.createOrder")
                .with_args(&[json!("Laptop"), json!(2)])
                .with_result(json!("ORD-1")),
        );
        trail.log(AuditEvent::new("CANCEL_ORDER", "OrderService.cancelOrder"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.action, "CREATE_ORDER");
        assert_eq!(first.args, vec![json!("Laptop"), json!(2)]);
        assert_eq!(first.result, json!("ORD-1"));
    }
}
