//! Append-only access ledgers.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use turnstile_core::error::{TurnstileError, TurnstileResult};
use turnstile_core::{Decision, DecisionFilter};

/// Append-only record of access decisions.
///
/// Entries are immutable once appended; corrections are new entries.
/// Concurrent appends are safe.
#[async_trait]
pub trait AccessLedger: Send + Sync {
    /// Appends one decision.
    async fn append(&self, decision: &Decision) -> TurnstileResult<()>;

    /// Returns decisions matching the filter, oldest first.
    async fn list(&self, filter: &DecisionFilter) -> TurnstileResult<Vec<Decision>>;
}

// ---------------------------------------------------------------------------
// In-memory ledger
// ---------------------------------------------------------------------------

/// Ledger held in process memory. The default for tests and demos.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<Decision>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessLedger for MemoryLedger {
    async fn append(&self, decision: &Decision) -> TurnstileResult<()> {
        self.entries.lock().await.push(decision.clone());
        Ok(())
    }

    async fn list(&self, filter: &DecisionFilter) -> TurnstileResult<Vec<Decision>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// NDJSON file ledger
// ---------------------------------------------------------------------------

/// Ledger backed by a newline-delimited JSON file.
///
/// One decision per line, serialized straight to a buffered appender and
/// flushed per append so rows survive the process. `list` re-reads the file.
pub struct NdjsonLedger {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl NdjsonLedger {
    /// Opens `path` for appending, creating the file if missing.
    pub fn open(path: impl Into<PathBuf>) -> TurnstileResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TurnstileError::Ledger(format!("open {}: {e}", path.display())))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::with_capacity(64 * 1024, file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AccessLedger for NdjsonLedger {
    async fn append(&self, decision: &Decision) -> TurnstileResult<()> {
        let mut writer = self.writer.lock().await;
        serde_json::to_writer(&mut *writer, decision)
            .map_err(|e| TurnstileError::Ledger(format!("serialize row: {e}")))?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|e| TurnstileError::Ledger(format!("write {}: {e}", self.path.display())))?;
        Ok(())
    }

    async fn list(&self, filter: &DecisionFilter) -> TurnstileResult<Vec<Decision>> {
        let file = File::open(&self.path)
            .map_err(|e| TurnstileError::Ledger(format!("read {}: {e}", self.path.display())))?;
        let reader = BufReader::new(file);

        let mut rows = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line
                .map_err(|e| TurnstileError::Ledger(format!("read {}: {e}", self.path.display())))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Decision>(&line) {
                Ok(decision) => {
                    if filter.matches(&decision) {
                        rows.push(decision);
                    }
                }
                Err(e) => {
                    tracing::warn!(line = line_no + 1, error = %e, "skipping malformed ledger row");
                }
            }
        }
        Ok(rows)
    }
}
