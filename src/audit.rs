//! Security audit logging
//!
//! Every violation found during validation produces one structured record,
//! whether or not it blocked execution. Records go to the `codeguard::audit`
//! tracing target and to any attached sinks. File sinks write from a
//! background thread. Failures here are swallowed; auditing never affects
//! the execution path.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

use crate::core::{CodeExecutionRequest, ExecutionLimits, SecurityViolation, Severity};

/// Lines of context on each side of the flagged line
const EXCERPT_RADIUS: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub user_id: Option<String>,
    pub language: String,
    pub violation: SecurityViolation,
    /// Flagged line ±2 lines, each prefixed with its line number
    pub excerpt: String,
    /// Effective limits of the request
    pub limits: ExecutionLimits,
    pub code_sha256: String,
    /// Whether this request was rejected
    pub blocked: bool,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit sink I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("audit sink lock poisoned")]
    Poisoned,
}

/// Additional destination for audit records
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl JsonLinesSink<NonBlocking> {
    /// Append to `path` through a background writer thread
    ///
    /// Records still queued are written when the guard is dropped.
    pub fn open(path: impl AsRef<Path>) -> io::Result<(Self, WorkerGuard)> {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        let (writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("codeguard-audit")
            .finish(file);
        Ok((Self::new(writer), guard))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, AuditError> {
        self.writer.into_inner().map_err(|_| AuditError::Poisoned)
    }
}

impl<W: Write + Send> AuditSink for JsonLinesSink<W> {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut writer = self.writer.lock().map_err(|_| AuditError::Poisoned)?;
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct AuditLogger {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Emit one record per violation
    pub fn log_violations(
        &self,
        request: &CodeExecutionRequest,
        limits: &ExecutionLimits,
        violations: &[SecurityViolation],
        blocked: bool,
    ) {
        if violations.is_empty() {
            return;
        }

        let code_sha256 = sha256_hex(request.code());
        for violation in violations {
            let record = AuditRecord {
                timestamp: Utc::now(),
                request_id: request.id().to_string(),
                user_id: request.user_id().map(str::to_string),
                language: request.language().to_string(),
                violation: violation.clone(),
                excerpt: excerpt(request.code(), violation.line_number),
                limits: limits.clone(),
                code_sha256: code_sha256.clone(),
                blocked,
            };
            self.emit(&record);
        }
    }

    fn emit(&self, record: &AuditRecord) {
        macro_rules! audit_event {
            ($level:ident) => {
                tracing::$level!(
                    target: "codeguard::audit",
                    request_id = %record.request_id,
                    user_id = record.user_id.as_deref().unwrap_or("-"),
                    language = %record.language,
                    rule = %record.violation.pattern,
                    severity = %record.violation.severity,
                    line = record.violation.line_number.unwrap_or(0),
                    blocked = record.blocked,
                    timeout = record.limits.timeout,
                    memory_limit = record.limits.memory_limit,
                    cpu_limit = record.limits.cpu_limit,
                    network_access = record.limits.network_access,
                    code_sha256 = %record.code_sha256,
                    excerpt = %record.excerpt,
                    "Security violation: {}",
                    record.violation.description
                )
            };
        }

        match record.violation.severity {
            Severity::Critical => audit_event!(error),
            Severity::High => audit_event!(warn),
            Severity::Medium | Severity::Low => audit_event!(info),
        }

        for sink in &self.sinks {
            if let Err(e) = sink.record(record) {
                tracing::debug!("Audit sink failed for request {}: {}", record.request_id, e);
            }
        }
    }
}

/// Numbered lines around `line_number` (1-indexed)
pub fn excerpt(code: &str, line_number: Option<usize>) -> String {
    let Some(line_number) = line_number.filter(|n| *n > 0) else {
        return String::new();
    };

    let first = line_number.saturating_sub(EXCERPT_RADIUS).max(1);
    let last = line_number + EXCERPT_RADIUS;
    code.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(n, _)| (first..=last).contains(n))
        .map(|(n, line)| {
            let marker = if n == line_number { ">" } else { " " };
            format!("{}{:>4} | {}", marker, n, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn sha256_hex(code: &str) -> String {
    Sha256::digest(code.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl AuditSink for MemorySink {
        fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Io(io::Error::other("disk full")))
        }
    }

    fn violation(line: Option<usize>, severity: Severity) -> SecurityViolation {
        SecurityViolation {
            pattern: "python.eval".into(),
            line_number: line,
            description: "eval() executes arbitrary expressions".into(),
            severity,
        }
    }

    #[test]
    fn test_excerpt_window() {
        let code = "a\nb\nc\nd\ne\nf\ng";
        assert_eq!(
            excerpt(code, Some(4)),
            "    2 | b\n    3 | c\n>   4 | d\n    5 | e\n    6 | f"
        );
        assert_eq!(excerpt(code, Some(1)), ">   1 | a\n    2 | b\n    3 | c");
        assert_eq!(excerpt(code, Some(7)), "    5 | e\n    6 | f\n>   7 | g");
        assert_eq!(excerpt(code, None), "");
    }

    #[test]
    fn test_one_record_per_violation() {
        let sink = Arc::new(MemorySink::default());
        let logger = AuditLogger::new().with_sink(sink.clone());
        let request = CodeExecutionRequest::new("x = 1\ny = eval('2')\n", "python")
            .with_id("req-9")
            .with_user_id("user-1");
        let limits = ExecutionLimits::default();

        logger.log_violations(
            &request,
            &limits,
            &[
                violation(Some(2), Severity::Critical),
                violation(Some(1), Severity::Low),
            ],
            true,
        );

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].request_id, "req-9");
        assert_eq!(records[0].user_id.as_deref(), Some("user-1"));
        assert_eq!(records[0].language, "python");
        assert!(records[0].blocked);
        assert_eq!(records[0].excerpt, "    1 | x = 1\n>   2 | y = eval('2')");
        assert_eq!(records[0].limits, limits);
        assert_eq!(records[0].code_sha256.len(), 64);
        assert_eq!(records[0].code_sha256, records[1].code_sha256);
    }

    #[test]
    fn test_sink_failures_are_swallowed() {
        let sink = Arc::new(MemorySink::default());
        let logger = AuditLogger::new()
            .with_sink(Arc::new(FailingSink))
            .with_sink(sink.clone());
        let request = CodeExecutionRequest::new("eval('1')", "python");

        logger.log_violations(
            &request,
            &ExecutionLimits::default(),
            &[violation(Some(1), Severity::Critical)],
            true,
        );
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = Arc::new(JsonLinesSink::new(Vec::new()));
        let logger = AuditLogger::new().with_sink(sink.clone());
        let request = CodeExecutionRequest::new("while True:\n    pass", "python");

        logger.log_violations(
            &request,
            &ExecutionLimits::default(),
            &[violation(Some(1), Severity::Medium)],
            false,
        );
        drop(logger);

        let sink = Arc::try_unwrap(sink).ok().unwrap();
        let bytes = sink.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 1);

        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["violation"]["severity"], "medium");
        assert_eq!(value["blocked"], false);
        assert_eq!(value["limits"]["timeout"], 10.0);
    }

    #[test]
    fn test_file_sink_writes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (sink, guard) = JsonLinesSink::open(&path).unwrap();
        let logger = AuditLogger::new().with_sink(Arc::new(sink));
        let request = CodeExecutionRequest::new("eval('1')\nexec('2')", "python");

        logger.log_violations(
            &request,
            &ExecutionLimits::default(),
            &[
                violation(Some(1), Severity::Critical),
                violation(Some(2), Severity::Critical),
            ],
            true,
        );
        drop(logger);
        drop(guard);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["violation"]["line_number"], 1);
        assert_eq!(first["blocked"], true);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
