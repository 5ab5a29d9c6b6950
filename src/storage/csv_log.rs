//! Append-only CSV event log
//!
//! Row format, one record per line:
//!
//! ```text
//! "timestamp","client","city","region","country","method","path","user agent","true"
//! ```
//!
//! Every field is double-quoted with embedded quotes doubled. Line breaks and
//! backslashes inside a value are written as `\n`, `\r` and `\\` so that a
//! record never spans two physical lines.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::analytics::VisitorEvent;
use crate::storage::{EventStore, StorageError, StorageResult};

/// Event log backed by a single append-mode file.
///
/// Rows are encoded before the lock is taken; the critical section is one
/// write and flush. `tokio::sync::Mutex` is fair, so rows land in the order
/// callers reached the lock.
pub struct CsvEventLog {
    path: PathBuf,
    file: Mutex<LogFile>,
    rows_written: AtomicU64,
}

struct LogFile {
    file: File,
    /// A failed write may have left a partial row behind
    dirty: bool,
}

impl CsvEventLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!("Visitor log opened at {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(LogFile { file, dirty: false }),
            rows_written: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended by this handle since it was opened
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventStore for CsvEventLog {
    async fn append(&self, event: &VisitorEvent) -> StorageResult<()> {
        let row = encode_row(event);

        let mut guard = self.file.lock().await;
        let log = &mut *guard;

        if log.dirty {
            // Terminate whatever the failed write left so this row starts clean
            log.file.write_all(b"\n").await?;
            log.dirty = false;
            debug!("Terminated partial row after earlier write failure");
        }

        let written = async {
            log.file.write_all(row.as_bytes()).await?;
            log.file.flush().await
        }
        .await;

        if let Err(err) = written {
            log.dirty = true;
            return Err(err.into());
        }
        drop(guard);

        self.rows_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Encode an event as one newline-terminated row.
pub fn encode_row(event: &VisitorEvent) -> String {
    let mut row = String::with_capacity(160);

    for (i, field) in event.fields().iter().enumerate() {
        if i > 0 {
            row.push(',');
        }
        row.push('"');
        for ch in field.chars() {
            match ch {
                '"' => row.push_str("\"\""),
                '\\' => row.push_str("\\\\"),
                '\n' => row.push_str("\\n"),
                '\r' => row.push_str("\\r"),
                c => row.push(c),
            }
        }
        row.push('"');
    }

    row.push('\n');
    row
}

/// Split one row back into its unescaped field values.
pub fn decode_row(line: &str) -> StorageResult<Vec<String>> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let mut fields = Vec::with_capacity(VisitorEvent::FIELD_COUNT);
    let mut chars = line.chars().peekable();

    loop {
        if chars.next() != Some('"') {
            return Err(StorageError::Malformed(format!(
                "field {} does not start with a quote",
                fields.len() + 1
            )));
        }

        let mut field = String::new();
        loop {
            match chars.next() {
                Some('"') if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                Some('"') => break,
                Some('\\') => match chars.next() {
                    Some('n') => field.push('\n'),
                    Some('r') => field.push('\r'),
                    Some('\\') => field.push('\\'),
                    other => {
                        return Err(StorageError::Malformed(format!(
                            "invalid escape sequence \\{}",
                            other.map(String::from).unwrap_or_default()
                        )))
                    }
                },
                Some(c) => field.push(c),
                None => {
                    return Err(StorageError::Malformed(format!(
                        "field {} is not terminated",
                        fields.len() + 1
                    )))
                }
            }
        }
        fields.push(field);

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(c) => {
                return Err(StorageError::Malformed(format!(
                    "unexpected '{c}' after field {}",
                    fields.len()
                )))
            }
        }
    }

    Ok(fields)
}

/// Decode one row into a `VisitorEvent`.
pub fn decode_event(line: &str) -> StorageResult<VisitorEvent> {
    let fields = decode_row(line)?;
    let count = fields.len();
    VisitorEvent::from_fields(fields).ok_or_else(|| {
        StorageError::Malformed(format!(
            "expected {} fields with a true/false bot trap flag, got {count} fields",
            VisitorEvent::FIELD_COUNT
        ))
    })
}
