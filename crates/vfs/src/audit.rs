//! Audit trail for mutating filesystem operations.
//!
//! Every successful mutation performed through a
//! [`ScopedFs`](crate::ScopedFs) produces exactly one [`AuditRecord`],
//! handed to the [`AuditSink`] the filesystem was built with.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

use crate::error::{Result, VfsError};

/// Kind of mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOp {
    /// Directory creation.
    Mkdir,
    /// File opened for writing or creation.
    Write,
    /// File or directory removal.
    Remove,
    /// Rename or move.
    Rename,
    /// Server-side copy.
    Copy,
}

impl AuditOp {
    /// Short lowercase name, as written to the log.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOp::Mkdir => "mkdir",
            AuditOp::Write => "write",
            AuditOp::Remove => "remove",
            AuditOp::Rename => "rename",
            AuditOp::Copy => "copy",
        }
    }
}

impl fmt::Display for AuditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// What was done.
    pub op: AuditOp,
    /// Protocol path the operation targeted.
    pub path: String,
    /// Destination for rename and copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Acting username.
    pub user: String,
    /// When the operation completed.
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Create a record stamped with the current time.
    pub fn new(op: AuditOp, path: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
            destination: None,
            user: user.into(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a destination path.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(dest) => write!(f, "{} {}->{}", self.op, self.path, dest)?,
            None => write!(f, "{} {}", self.op, self.path)?,
        }
        write!(
            f,
            ",{} {}",
            self.user,
            self.timestamp.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Append-only destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Record one completed operation.
    fn record(&self, record: &AuditRecord);
}

/// Emits audit records as `tracing` events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            target: "audit",
            op = record.op.as_str(),
            path = %record.path,
            destination = record.destination.as_deref().unwrap_or(""),
            user = %record.user,
            timestamp = %record.timestamp.to_rfc3339(),
            "{}",
            record
        );
    }
}

/// Appends audit records as JSON lines to a file.
///
/// Lines are handed to a single background writer thread, so records from
/// concurrent requests never interleave.
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<NonBlocking>,
    _guard: WorkerGuard,
}

impl FileAuditSink {
    /// Open (or create) the audit log for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| VfsError::AuditLog {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| VfsError::AuditLog {
                path: path.clone(),
                source,
            })?;

        // records are never dropped under backpressure
        let (writer, guard) = NonBlockingBuilder::default().lossy(false).finish(file);
        Ok(Self {
            path,
            writer: Mutex::new(writer),
            _guard: guard,
        })
    }

    /// The file this sink appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, record: &AuditRecord) {
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize audit record: {}", e);
                return;
            }
        };
        line.push(b'\n');

        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writer.write_all(&line) {
            tracing::error!("Failed to append audit record to {:?}: {}", self.path, e);
        }
    }
}

/// Keeps audit records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records captured so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of records captured so far.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}
