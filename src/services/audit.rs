use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::AppError;

const DEFAULT_AUDIT_PATH: &str = "logs/crosslist_audit.csv";

/// One row per mutating attempt, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub operator: String,
    pub operation: String,
    pub section_id: i64,
    pub course_id: Option<i64>,
    pub result: String,
}

impl AuditRecord {
    pub fn new(
        operator: &str,
        operation: &str,
        section_id: i64,
        course_id: Option<i64>,
        success: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            operator: operator.to_string(),
            operation: operation.to_string(),
            section_id,
            course_id,
            result: if success { "success" } else { "failed" }.to_string(),
        }
    }
}

/// Append-only CSV audit log. Writes are serialized through a mutex; a
/// failed append is reported to the caller but must never mask the outcome
/// of the operation being audited.
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_env() -> Self {
        let path = std::env::var("AUDIT_LOG_PATH").unwrap_or_else(|_| DEFAULT_AUDIT_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole log under the same lock appends take, so a download
    /// never observes a partially written row.
    pub fn read_all(&self) -> Result<Option<Vec<u8>>, AppError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&self.path)?))
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), AppError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let write_header = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }
}
