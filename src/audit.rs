//! Append-only audit log of gateway requests
//!
//! The orchestrator emits one [`AuditRecord`] per backend-served request
//! (successful or not). Records go through an [`AuditWriter`]: a bounded
//! queue drained by a single task that appends to the configured
//! [`AuditSink`]. A slow or failing sink never delays a response; when the
//! queue is full the record is dropped, logged and counted.
//!
//! On shutdown, [`AuditWriter::close`] stops intake and waits until every
//! queued record has reached the sink.
//!
//! The SQLite sink stores records in a single flat table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS request_logs (
//!     id                INTEGER PRIMARY KEY AUTOINCREMENT,
//!     timestamp         TEXT NOT NULL,
//!     model_requested   TEXT NOT NULL,
//!     model_used        TEXT,
//!     provider          TEXT NOT NULL,
//!     latency_ms        REAL NOT NULL,
//!     prompt_tokens     INTEGER NOT NULL,
//!     completion_tokens INTEGER NOT NULL,
//!     total_tokens      INTEGER NOT NULL,
//!     status_code       INTEGER NOT NULL,
//!     fallback_used     BOOLEAN NOT NULL,
//!     cache_hit         BOOLEAN NOT NULL,
//!     error_message     TEXT
//! );
//! ```

use crate::config::{AuditConfig, AuditSinkKind};
use crate::metrics::Metrics;
use crate::providers::ProviderId;
use crate::schema::Usage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Label stored for requests no provider served
pub const NO_PROVIDER: &str = "none";

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS request_logs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp         TEXT NOT NULL,
    model_requested   TEXT NOT NULL,
    model_used        TEXT,
    provider          TEXT NOT NULL,
    latency_ms        REAL NOT NULL,
    prompt_tokens     INTEGER NOT NULL,
    completion_tokens INTEGER NOT NULL,
    total_tokens      INTEGER NOT NULL,
    status_code       INTEGER NOT NULL,
    fallback_used     BOOLEAN NOT NULL,
    cache_hit         BOOLEAN NOT NULL,
    error_message     TEXT
);";

/// Audit sink failure
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// One request as seen by the audit log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// Model after routing
    pub model_requested: String,
    /// Model named by the backend reply; `None` when every provider failed
    pub model_used: Option<String>,
    /// Provider that served the response; `None` when every provider failed
    pub provider: Option<ProviderId>,
    pub latency_ms: f64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u64,
    pub status_code: u16,
    pub fallback_used: bool,
    pub cache_hit: bool,
    pub error_message: Option<String>,
}

impl AuditRecord {
    /// Record for a response produced by `provider` (or replayed from cache)
    pub fn success(
        model_requested: &str,
        model_used: &str,
        provider: Option<ProviderId>,
        usage: Usage,
        latency_ms: f64,
        fallback_used: bool,
        cache_hit: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            model_requested: model_requested.to_string(),
            model_used: Some(model_used.to_string()),
            provider,
            latency_ms,
            prompt_tokens: usage.prompt_tokens(),
            completion_tokens: usage.completion_tokens(),
            total_tokens: usage.total_tokens(),
            status_code: 200,
            fallback_used,
            cache_hit,
            error_message: None,
        }
    }

    /// Record for a request no provider could serve
    pub fn failure(
        model_requested: &str,
        latency_ms: f64,
        status_code: u16,
        fallback_used: bool,
        error_message: String,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            model_requested: model_requested.to_string(),
            model_used: None,
            provider: None,
            latency_ms,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            status_code,
            fallback_used,
            cache_hit: false,
            error_message: Some(error_message),
        }
    }

    /// Provider name as written by every sink, `"none"` for failures
    pub fn provider_label(&self) -> &'static str {
        self.provider.map(|p| p.as_str()).unwrap_or(NO_PROVIDER)
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Build the sink selected by `config.sink`
pub fn sink_from_config(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, AuditError> {
    match config.sink {
        AuditSinkKind::Tracing => Ok(Arc::new(TracingAuditSink)),
        AuditSinkKind::Sqlite => Ok(Arc::new(SqliteAuditSink::open(&config.sqlite_path)?)),
    }
}

/// Bounded queue in front of an [`AuditSink`], drained by one writer task
///
/// Cloning shares the queue and the writer.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<AuditRecord>,
    metrics: Arc<Metrics>,
    worker: Arc<tokio::sync::Mutex<Option<Worker>>>,
}

struct Worker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl AuditWriter {
    /// Start the writer task for `sink` with room for `capacity` records
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize, metrics: Arc<Metrics>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(drain(sink, rx, stop_rx, metrics.clone()));

        Self {
            tx,
            metrics,
            worker: Arc::new(tokio::sync::Mutex::new(Some(Worker { stop, handle }))),
        }
    }

    /// Queue `record` without waiting; a full or closed queue drops it
    pub fn submit(&self, record: AuditRecord) {
        let reason = match self.tx.try_send(record) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(_)) => "audit queue full",
            Err(mpsc::error::TrySendError::Closed(_)) => "audit writer stopped",
        };
        self.metrics.record_audit_failure();
        tracing::warn!(
            reason,
            capacity = self.tx.max_capacity(),
            "Dropping audit record"
        );
    }

    /// Stop accepting records and wait until the queued ones are written
    ///
    /// Later calls return immediately.
    pub async fn close(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        // the writer may already have exited; the join below still applies
        let _ = worker.stop.send(());
        if let Err(e) = worker.handle.await {
            tracing::error!(error = %e, "Audit writer task failed");
        }
    }
}

async fn drain(
    sink: Arc<dyn AuditSink>,
    mut rx: mpsc::Receiver<AuditRecord>,
    mut stop: oneshot::Receiver<()>,
    metrics: Arc<Metrics>,
) {
    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => write(sink.as_ref(), record, &metrics).await,
                None => return,
            },
            _ = &mut stop => break,
        }
    }

    rx.close();
    let mut flushed = 0usize;
    while let Some(record) = rx.recv().await {
        write(sink.as_ref(), record, &metrics).await;
        flushed += 1;
    }
    tracing::info!(flushed, "Audit writer stopped");
}

async fn write(sink: &dyn AuditSink, record: AuditRecord, metrics: &Metrics) {
    if let Err(e) = sink.append(record).await {
        metrics.record_audit_failure();
        tracing::warn!(error = %e, "Failed to write audit record");
    }
}

/// Emits each record as a structured `info` event on the `audit` target
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            timestamp = %record.timestamp.to_rfc3339(),
            model_requested = %record.model_requested,
            model_used = record.model_used.as_deref().unwrap_or("none"),
            provider = record.provider_label(),
            latency_ms = record.latency_ms,
            prompt_tokens = record.prompt_tokens,
            completion_tokens = record.completion_tokens,
            total_tokens = record.total_tokens,
            status_code = record.status_code,
            fallback_used = record.fallback_used,
            cache_hit = record.cache_hit,
            error_message = record.error_message.as_deref().unwrap_or(""),
            "request completed"
        );
        Ok(())
    }
}

/// Keeps records in memory, oldest first
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: tokio::sync::Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Writes records to the `request_logs` table of a SQLite database
///
/// Inserts run on tokio's blocking pool.
pub struct SqliteAuditSink {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAuditSink")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteAuditSink {
    /// Open (or create) the database at `path` and ensure the table exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(CREATE_TABLE_SQL)?;

        tracing::info!(path = %db_path.display(), "Audit database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    /// Number of stored records
    pub fn count(&self) -> Result<u64, AuditError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AuditError::Storage("audit connection lock poisoned".to_string()))?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM request_logs", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn insert_record(conn: &Connection, record: &AuditRecord) -> Result<(), AuditError> {
    let total_tokens = i64::try_from(record.total_tokens).map_err(|_| {
        AuditError::Storage(format!(
            "total_tokens {} does not fit an INTEGER column",
            record.total_tokens
        ))
    })?;
    conn.execute(
        "INSERT INTO request_logs (
            timestamp, model_requested, model_used, provider, latency_ms,
            prompt_tokens, completion_tokens, total_tokens, status_code,
            fallback_used, cache_hit, error_message
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.timestamp.to_rfc3339(),
            record.model_requested,
            record.model_used,
            record.provider_label(),
            record.latency_ms,
            i64::from(record.prompt_tokens),
            i64::from(record.completion_tokens),
            total_tokens,
            i64::from(record.status_code),
            record.fallback_used,
            record.cache_hit,
            record.error_message,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| AuditError::Storage("audit connection lock poisoned".to_string()))?;
            insert_record(&conn, &record)
        })
        .await
        .map_err(|e| AuditError::Storage(format!("audit insert task failed: {}", e)))?
    }
}
