//! Embedded libsql repository backend
//!
//! One local database file, one writer connection. Every mutation goes
//! through the writer behind an async mutex; reads open their own
//! connections and overlap with the writer through WAL mode. A locked
//! database surfaces as a `Timeout` once `busy_timeout_ms` has elapsed.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds,
//! `Z` suffix) so text comparison in SQL orders them correctly.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use super::error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
use super::traits::{AckEventRepository, AlertRepository, RepositoryResult, SilenceRepository};
use crate::config::TursoConfig;
use crate::domain::{AckEvent, Alert, AlertState, SilenceMark};
use crate::error::{Error, Result};
use crate::ids::{AckEventId, AlertId, SilenceId};
use crate::matching;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    name TEXT NOT NULL,
    instance TEXT NOT NULL,
    target TEXT NOT NULL,
    summary TEXT NOT NULL,
    description TEXT NOT NULL,
    labels TEXT NOT NULL,
    annotations TEXT NOT NULL,
    severity TEXT NOT NULL,
    state TEXT NOT NULL,
    fired_at TEXT NOT NULL,
    acked_at TEXT,
    acked_by TEXT,
    resolved_at TEXT,
    last_notified_at TEXT,
    external_references TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_fingerprint_state ON alerts (fingerprint, state);
CREATE INDEX IF NOT EXISTS idx_alerts_state_created ON alerts (state, created_at);

CREATE TABLE IF NOT EXISTS ack_events (
    id TEXT PRIMARY KEY,
    alert_id TEXT NOT NULL REFERENCES alerts (id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    user_id TEXT NOT NULL,
    user_email TEXT NOT NULL,
    user_name TEXT NOT NULL,
    note TEXT,
    duration_ms INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ack_events_alert ON ack_events (alert_id, created_at);

CREATE TABLE IF NOT EXISTS silences (
    id TEXT PRIMARY KEY,
    alert_id TEXT,
    instance TEXT,
    fingerprint TEXT,
    labels TEXT NOT NULL,
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_by_email TEXT NOT NULL,
    reason TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    version INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_silences_end_at ON silences (end_at);
"#;

const ALERT_COLUMNS: &str = "id, fingerprint, name, instance, target, summary, description, \
     labels, annotations, severity, state, fired_at, acked_at, acked_by, resolved_at, \
     last_notified_at, external_references, version, created_at, updated_at";

const ACK_COLUMNS: &str =
    "id, alert_id, source, user_id, user_email, user_name, note, duration_ms, created_at";

const SILENCE_COLUMNS: &str = "id, alert_id, instance, fingerprint, labels, start_at, end_at, \
     created_by, created_by_email, reason, source, created_at, version";

/// Repositories backed by a local libsql file
pub struct TursoStore {
    db: libsql::Database,
    writer: Mutex<libsql::Connection>,
    busy_timeout: Duration,
}

impl TursoStore {
    /// Open (creating if needed) the database file and apply the schema
    ///
    /// Opening is retried with exponential backoff up to `max_retries` times.
    pub async fn open(config: &TursoConfig) -> Result<Self> {
        let db = open_with_retries(config).await?;
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

        let writer = db
            .connect()
            .map_err(|e| Error::Internal(format!("Failed to connect to libsql database: {}", e)))?;
        configure(&writer, busy_timeout, true)
            .await
            .map_err(Error::Repository)?;
        pragma(&writer, "PRAGMA journal_mode = WAL")
            .await
            .map_err(Error::Repository)?;
        writer
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| Error::Repository(classify(RepositoryOperation::Initialize, &e)))?;

        tracing::info!(path = %config.path.display(), "libsql store ready");
        Ok(Self {
            db,
            writer: Mutex::new(writer),
            busy_timeout,
        })
    }

    async fn reader(&self) -> RepositoryResult<libsql::Connection> {
        let conn = self.db.connect().map_err(|e| {
            RepositoryError::connection_failed(format!("Failed to open reader: {}", e))
        })?;
        configure(&conn, self.busy_timeout, false).await?;
        Ok(conn)
    }

    async fn query_alerts(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> RepositoryResult<Vec<Alert>> {
        let conn = self.reader().await?;
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| classify(RepositoryOperation::Find, &e))?;
        let mut alerts = Vec::new();
        while let Some(row) = next_row(&mut rows, RepositoryOperation::Find).await? {
            alerts.push(row_to_alert(&row)?);
        }
        Ok(alerts)
    }

    async fn query_ack_events(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> RepositoryResult<Vec<AckEvent>> {
        let conn = self.reader().await?;
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| classify(RepositoryOperation::Find, &e))?;
        let mut events = Vec::new();
        while let Some(row) = next_row(&mut rows, RepositoryOperation::Find).await? {
            events.push(row_to_ack_event(&row)?);
        }
        Ok(events)
    }

    async fn query_silences(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> RepositoryResult<Vec<SilenceMark>> {
        let conn = self.reader().await?;
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| classify(RepositoryOperation::Find, &e))?;
        let mut silences = Vec::new();
        while let Some(row) = next_row(&mut rows, RepositoryOperation::Find).await? {
            silences.push(row_to_silence(&row)?);
        }
        Ok(silences)
    }

    /// After a zero-row versioned write, tell a stale version from a missing row
    async fn conflict_or_missing(
        conn: &libsql::Connection,
        table: &str,
        entity_type: &str,
        id: &str,
        version: u64,
    ) -> RepositoryError {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
        let exists = match conn.query(&sql, libsql::params![id.to_string()]).await {
            Ok(mut rows) => matches!(rows.next().await, Ok(Some(_))),
            Err(e) => return classify(RepositoryOperation::Update, &e),
        };
        if exists {
            RepositoryError::concurrent_update(entity_type, id, version)
        } else {
            RepositoryError::not_found(entity_type, id).with_operation(RepositoryOperation::Update)
        }
    }
}

impl std::fmt::Debug for TursoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TursoStore")
            .field("busy_timeout", &self.busy_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AlertRepository for TursoStore {
    async fn save(&self, alert: &Alert) -> RepositoryResult<()> {
        let labels = serde_json::to_string(&alert.labels)?;
        let annotations = serde_json::to_string(&alert.annotations)?;
        let references = serde_json::to_string(&alert.external_references)?;
        let sql = format!(
            "INSERT INTO alerts ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            ALERT_COLUMNS
        );

        let writer = self.writer.lock().await;
        writer
            .execute(
                &sql,
                libsql::params![
                    alert.id.to_string(),
                    alert.fingerprint.clone(),
                    alert.name.clone(),
                    alert.instance.clone(),
                    alert.target.clone(),
                    alert.summary.clone(),
                    alert.description.clone(),
                    labels,
                    annotations,
                    alert.severity.as_str().to_string(),
                    alert.state.as_str().to_string(),
                    ts(&alert.fired_at),
                    alert.acked_at.as_ref().map(ts),
                    alert.acked_by.clone(),
                    alert.resolved_at.as_ref().map(ts),
                    alert.last_notified_at.as_ref().map(ts),
                    references,
                    alert.version as i64,
                    ts(&alert.created_at),
                    ts(&alert.updated_at),
                ],
            )
            .await
            .map_err(|e| {
                classify(RepositoryOperation::Save, &e).with_entity("Alert", alert.id.as_str())
            })?;
        Ok(())
    }

    async fn find_by_id(&self, id: &AlertId) -> RepositoryResult<Option<Alert>> {
        let sql = format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS);
        Ok(self
            .query_alerts(&sql, libsql::params![id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn find_open_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> RepositoryResult<Option<Alert>> {
        let sql = format!(
            "SELECT {} FROM alerts WHERE fingerprint = ?1 AND state IN ('active', 'acked') \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            ALERT_COLUMNS
        );
        Ok(self
            .query_alerts(&sql, libsql::params![fingerprint.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_external_reference(
        &self,
        destination: &str,
        reference: &str,
    ) -> RepositoryResult<Option<Alert>> {
        let sql = format!(
            "SELECT {} FROM alerts WHERE json_extract(external_references, ?1) = ?2 \
             ORDER BY created_at DESC LIMIT 1",
            ALERT_COLUMNS
        );
        let path = format!("$.\"{}\"", destination.replace('"', ""));
        Ok(self
            .query_alerts(&sql, libsql::params![path, reference.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_state(
        &self,
        state: AlertState,
        limit: usize,
    ) -> RepositoryResult<Vec<Alert>> {
        let sql = format!(
            "SELECT {} FROM alerts WHERE state = ?1 ORDER BY created_at ASC, id ASC LIMIT ?2",
            ALERT_COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_alerts(&sql, libsql::params![state.as_str().to_string(), limit])
            .await
    }

    async fn update(&self, alert: &Alert) -> RepositoryResult<Alert> {
        let labels = serde_json::to_string(&alert.labels)?;
        let annotations = serde_json::to_string(&alert.annotations)?;
        let references = serde_json::to_string(&alert.external_references)?;

        let writer = self.writer.lock().await;
        let affected = writer
            .execute(
                "UPDATE alerts SET fingerprint = ?2, name = ?3, instance = ?4, target = ?5, \
                 summary = ?6, description = ?7, labels = ?8, annotations = ?9, severity = ?10, \
                 state = ?11, fired_at = ?12, acked_at = ?13, acked_by = ?14, resolved_at = ?15, \
                 last_notified_at = ?16, external_references = ?17, updated_at = ?18, \
                 version = version + 1 \
                 WHERE id = ?1 AND version = ?19",
                libsql::params![
                    alert.id.to_string(),
                    alert.fingerprint.clone(),
                    alert.name.clone(),
                    alert.instance.clone(),
                    alert.target.clone(),
                    alert.summary.clone(),
                    alert.description.clone(),
                    labels,
                    annotations,
                    alert.severity.as_str().to_string(),
                    alert.state.as_str().to_string(),
                    ts(&alert.fired_at),
                    alert.acked_at.as_ref().map(ts),
                    alert.acked_by.clone(),
                    alert.resolved_at.as_ref().map(ts),
                    alert.last_notified_at.as_ref().map(ts),
                    references,
                    ts(&alert.updated_at),
                    alert.version as i64,
                ],
            )
            .await
            .map_err(|e| {
                classify(RepositoryOperation::Update, &e).with_entity("Alert", alert.id.as_str())
            })?;

        if affected == 0 {
            return Err(Self::conflict_or_missing(
                &writer,
                "alerts",
                "Alert",
                alert.id.as_str(),
                alert.version,
            )
            .await);
        }

        let mut stored = alert.clone();
        stored.version = alert.version + 1;
        Ok(stored)
    }

    async fn delete(&self, id: &AlertId) -> RepositoryResult<bool> {
        let writer = self.writer.lock().await;
        let affected = writer
            .execute("DELETE FROM alerts WHERE id = ?1", libsql::params![id.to_string()])
            .await
            .map_err(|e| classify(RepositoryOperation::Delete, &e).with_entity("Alert", id.as_str()))?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl AckEventRepository for TursoStore {
    async fn save(&self, event: &AckEvent) -> RepositoryResult<()> {
        let sql = format!(
            "INSERT INTO ack_events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            ACK_COLUMNS
        );
        let duration_ms = event
            .duration
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));

        let writer = self.writer.lock().await;
        writer
            .execute(
                &sql,
                libsql::params![
                    event.id.to_string(),
                    event.alert_id.to_string(),
                    event.source.as_str().to_string(),
                    event.user_id.clone(),
                    event.user_email.clone(),
                    event.user_name.clone(),
                    event.note.clone(),
                    duration_ms,
                    ts(&event.created_at),
                ],
            )
            .await
            .map_err(|e| {
                let err = classify(RepositoryOperation::Save, &e);
                if err.kind == RepositoryErrorKind::ConstraintViolation {
                    RepositoryError::not_found("Alert", event.alert_id.as_str())
                        .with_operation(RepositoryOperation::Save)
                } else {
                    err.with_entity("AckEvent", event.id.as_str())
                }
            })?;
        Ok(())
    }

    async fn find_by_id(&self, id: &AckEventId) -> RepositoryResult<Option<AckEvent>> {
        let sql = format!("SELECT {} FROM ack_events WHERE id = ?1", ACK_COLUMNS);
        Ok(self
            .query_ack_events(&sql, libsql::params![id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_alert(&self, alert_id: &AlertId) -> RepositoryResult<Vec<AckEvent>> {
        let sql = format!(
            "SELECT {} FROM ack_events WHERE alert_id = ?1 ORDER BY created_at ASC, rowid ASC",
            ACK_COLUMNS
        );
        self.query_ack_events(&sql, libsql::params![alert_id.to_string()])
            .await
    }

    async fn latest_for_alert(&self, alert_id: &AlertId) -> RepositoryResult<Option<AckEvent>> {
        let sql = format!(
            "SELECT {} FROM ack_events WHERE alert_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            ACK_COLUMNS
        );
        Ok(self
            .query_ack_events(&sql, libsql::params![alert_id.to_string()])
            .await?
            .into_iter()
            .next())
    }
}

#[async_trait]
impl SilenceRepository for TursoStore {
    async fn save(&self, silence: &SilenceMark) -> RepositoryResult<()> {
        let labels = serde_json::to_string(&silence.labels)?;
        let sql = format!(
            "INSERT INTO silences ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            SILENCE_COLUMNS
        );

        let writer = self.writer.lock().await;
        writer
            .execute(
                &sql,
                libsql::params![
                    silence.id.to_string(),
                    silence.alert_id.as_ref().map(AlertId::to_string),
                    silence.instance.clone(),
                    silence.fingerprint.clone(),
                    labels,
                    ts(&silence.start_at),
                    ts(&silence.end_at),
                    silence.created_by.clone(),
                    silence.created_by_email.clone(),
                    silence.reason.clone(),
                    silence.source.as_str().to_string(),
                    ts(&silence.created_at),
                    silence.version as i64,
                ],
            )
            .await
            .map_err(|e| {
                classify(RepositoryOperation::Save, &e)
                    .with_entity("SilenceMark", silence.id.as_str())
            })?;
        Ok(())
    }

    async fn find_by_id(&self, id: &SilenceId) -> RepositoryResult<Option<SilenceMark>> {
        let sql = format!("SELECT {} FROM silences WHERE id = ?1", SILENCE_COLUMNS);
        Ok(self
            .query_silences(&sql, libsql::params![id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn find_active(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<SilenceMark>> {
        let sql = format!(
            "SELECT {} FROM silences WHERE start_at <= ?1 AND end_at > ?1 ORDER BY id",
            SILENCE_COLUMNS
        );
        self.query_silences(&sql, libsql::params![ts(&now)]).await
    }

    async fn find_matching_alert(
        &self,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<SilenceMark>> {
        // Narrow by indexed selectors in SQL; the final decision is matching's
        let sql = format!(
            "SELECT {} FROM silences WHERE start_at <= ?1 AND end_at > ?1 AND ( \
                alert_id = ?2 OR fingerprint = ?3 OR instance = ?4 \
                OR (COALESCE(alert_id, '') = '' AND COALESCE(fingerprint, '') = '' \
                    AND COALESCE(instance, '') = '' AND labels <> '{{}}') \
             ) ORDER BY id",
            SILENCE_COLUMNS
        );
        let candidates = self
            .query_silences(
                &sql,
                libsql::params![
                    ts(&now),
                    alert.id.to_string(),
                    alert.fingerprint.clone(),
                    alert.instance.clone(),
                ],
            )
            .await?;
        Ok(matching::find_matching(&candidates, alert, now))
    }

    async fn update(&self, silence: &SilenceMark) -> RepositoryResult<SilenceMark> {
        let labels = serde_json::to_string(&silence.labels)?;

        let writer = self.writer.lock().await;
        let affected = writer
            .execute(
                "UPDATE silences SET alert_id = ?2, instance = ?3, fingerprint = ?4, labels = ?5, \
                 start_at = ?6, end_at = ?7, created_by = ?8, created_by_email = ?9, reason = ?10, \
                 source = ?11, version = version + 1 \
                 WHERE id = ?1 AND version = ?12",
                libsql::params![
                    silence.id.to_string(),
                    silence.alert_id.as_ref().map(AlertId::to_string),
                    silence.instance.clone(),
                    silence.fingerprint.clone(),
                    labels,
                    ts(&silence.start_at),
                    ts(&silence.end_at),
                    silence.created_by.clone(),
                    silence.created_by_email.clone(),
                    silence.reason.clone(),
                    silence.source.as_str().to_string(),
                    silence.version as i64,
                ],
            )
            .await
            .map_err(|e| {
                classify(RepositoryOperation::Update, &e)
                    .with_entity("SilenceMark", silence.id.as_str())
            })?;

        if affected == 0 {
            return Err(Self::conflict_or_missing(
                &writer,
                "silences",
                "SilenceMark",
                silence.id.as_str(),
                silence.version,
            )
            .await);
        }

        let mut stored = silence.clone();
        stored.version = silence.version + 1;
        Ok(stored)
    }

    async fn delete(&self, id: &SilenceId) -> RepositoryResult<bool> {
        let writer = self.writer.lock().await;
        let affected = writer
            .execute("DELETE FROM silences WHERE id = ?1", libsql::params![id.to_string()])
            .await
            .map_err(|e| {
                classify(RepositoryOperation::Delete, &e).with_entity("SilenceMark", id.as_str())
            })?;
        Ok(affected > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let writer = self.writer.lock().await;
        writer
            .execute("DELETE FROM silences WHERE end_at <= ?1", libsql::params![ts(&now)])
            .await
            .map_err(|e| classify(RepositoryOperation::DeleteExpired, &e))
    }
}

/// Open the database file, retrying with exponential backoff
async fn open_with_retries(config: &TursoConfig) -> Result<libsql::Database> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match libsql::Builder::new_local(&config.path).build().await {
            Ok(db) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "libsql database opened after retries");
                }
                return Ok(db);
            }
            Err(e) => {
                attempt += 1;
                if attempt > config.max_retries {
                    tracing::error!(
                        path = %config.path.display(),
                        attempts = attempt,
                        error = %e,
                        "Failed to open libsql database"
                    );
                    return Err(Error::Repository(
                        RepositoryError::connection_failed(format!(
                            "Failed to open '{}': {}",
                            config.path.display(),
                            e
                        ))
                        .with_operation(RepositoryOperation::Initialize),
                    ));
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "libsql open failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Per-connection pragmas
async fn configure(
    conn: &libsql::Connection,
    busy_timeout: Duration,
    enforce_foreign_keys: bool,
) -> RepositoryResult<()> {
    pragma(
        conn,
        &format!("PRAGMA busy_timeout = {}", busy_timeout.as_millis()),
    )
    .await?;
    if enforce_foreign_keys {
        pragma(conn, "PRAGMA foreign_keys = ON").await?;
    }
    Ok(())
}

/// Run a pragma, draining whatever row it answers with
async fn pragma(conn: &libsql::Connection, sql: &str) -> RepositoryResult<()> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| classify(RepositoryOperation::Initialize, &e))?;
    while next_row(&mut rows, RepositoryOperation::Initialize)
        .await?
        .is_some()
    {}
    Ok(())
}

async fn next_row(
    rows: &mut libsql::Rows,
    operation: RepositoryOperation,
) -> RepositoryResult<Option<libsql::Row>> {
    rows.next().await.map_err(|e| classify(operation, &e))
}

/// Map a libsql error onto the repository taxonomy
///
/// libsql exposes SQLite result codes only through the message text.
fn classify(operation: RepositoryOperation, err: &libsql::Error) -> RepositoryError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    let kind = if lower.contains("database is locked") || lower.contains("busy") {
        RepositoryErrorKind::Timeout
    } else if lower.contains("unique constraint") {
        RepositoryErrorKind::AlreadyExists
    } else if lower.contains("foreign key constraint") || lower.contains("constraint failed") {
        RepositoryErrorKind::ConstraintViolation
    } else if lower.contains("unable to open") || lower.contains("connect") {
        RepositoryErrorKind::ConnectionFailed
    } else {
        RepositoryErrorKind::DatabaseError
    };
    RepositoryError::new(operation, kind, message)
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_err(column: &str, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::serialization_error(
        RepositoryOperation::Find,
        format!("Failed to decode column '{}': {}", column, err),
    )
}

fn text(row: &libsql::Row, idx: i32, column: &str) -> RepositoryResult<String> {
    row.get::<String>(idx).map_err(|e| decode_err(column, e))
}

fn opt_text(row: &libsql::Row, idx: i32, column: &str) -> RepositoryResult<Option<String>> {
    match row.get_value(idx).map_err(|e| decode_err(column, e))? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(s) => Ok(Some(s)),
        other => Err(decode_err(column, format!("unexpected value {:?}", other))),
    }
}

fn integer(row: &libsql::Row, idx: i32, column: &str) -> RepositoryResult<i64> {
    row.get::<i64>(idx).map_err(|e| decode_err(column, e))
}

fn opt_integer(row: &libsql::Row, idx: i32, column: &str) -> RepositoryResult<Option<i64>> {
    match row.get_value(idx).map_err(|e| decode_err(column, e))? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Integer(n) => Ok(Some(n)),
        other => Err(decode_err(column, format!("unexpected value {:?}", other))),
    }
}

fn parse_ts(value: &str, column: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_err(column, e))
}

fn timestamp(row: &libsql::Row, idx: i32, column: &str) -> RepositoryResult<DateTime<Utc>> {
    parse_ts(&text(row, idx, column)?, column)
}

fn opt_timestamp(
    row: &libsql::Row,
    idx: i32,
    column: &str,
) -> RepositoryResult<Option<DateTime<Utc>>> {
    opt_text(row, idx, column)?
        .map(|s| parse_ts(&s, column))
        .transpose()
}

fn json_map(row: &libsql::Row, idx: i32, column: &str) -> RepositoryResult<HashMap<String, String>> {
    serde_json::from_str(&text(row, idx, column)?).map_err(|e| decode_err(column, e))
}

fn parsed<T>(row: &libsql::Row, idx: i32, column: &str) -> RepositoryResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text(row, idx, column)?
        .parse()
        .map_err(|e| decode_err(column, e))
}

fn version(row: &libsql::Row, idx: i32) -> RepositoryResult<u64> {
    u64::try_from(integer(row, idx, "version")?).map_err(|e| decode_err("version", e))
}

fn row_to_alert(row: &libsql::Row) -> RepositoryResult<Alert> {
    Ok(Alert {
        id: parsed(row, 0, "id")?,
        fingerprint: text(row, 1, "fingerprint")?,
        name: text(row, 2, "name")?,
        instance: text(row, 3, "instance")?,
        target: text(row, 4, "target")?,
        summary: text(row, 5, "summary")?,
        description: text(row, 6, "description")?,
        labels: json_map(row, 7, "labels")?,
        annotations: json_map(row, 8, "annotations")?,
        severity: parsed(row, 9, "severity")?,
        state: parsed(row, 10, "state")?,
        fired_at: timestamp(row, 11, "fired_at")?,
        acked_at: opt_timestamp(row, 12, "acked_at")?,
        acked_by: opt_text(row, 13, "acked_by")?,
        resolved_at: opt_timestamp(row, 14, "resolved_at")?,
        last_notified_at: opt_timestamp(row, 15, "last_notified_at")?,
        external_references: json_map(row, 16, "external_references")?,
        version: version(row, 17)?,
        created_at: timestamp(row, 18, "created_at")?,
        updated_at: timestamp(row, 19, "updated_at")?,
    })
}

fn row_to_ack_event(row: &libsql::Row) -> RepositoryResult<AckEvent> {
    let duration = opt_integer(row, 7, "duration_ms")?
        .map(|ms| u64::try_from(ms).map(Duration::from_millis))
        .transpose()
        .map_err(|e| decode_err("duration_ms", e))?;
    Ok(AckEvent {
        id: parsed(row, 0, "id")?,
        alert_id: parsed(row, 1, "alert_id")?,
        source: parsed(row, 2, "source")?,
        user_id: text(row, 3, "user_id")?,
        user_email: text(row, 4, "user_email")?,
        user_name: text(row, 5, "user_name")?,
        note: opt_text(row, 6, "note")?,
        duration,
        created_at: timestamp(row, 8, "created_at")?,
    })
}

fn row_to_silence(row: &libsql::Row) -> RepositoryResult<SilenceMark> {
    let alert_id = opt_text(row, 1, "alert_id")?
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<AlertId>())
        .transpose()
        .map_err(|e| decode_err("alert_id", e))?;
    Ok(SilenceMark {
        id: parsed(row, 0, "id")?,
        alert_id,
        instance: opt_text(row, 2, "instance")?,
        fingerprint: opt_text(row, 3, "fingerprint")?,
        labels: json_map(row, 4, "labels")?,
        start_at: timestamp(row, 5, "start_at")?,
        end_at: timestamp(row, 6, "end_at")?,
        created_by: text(row, 7, "created_by")?,
        created_by_email: text(row, 8, "created_by_email")?,
        reason: text(row, 9, "reason")?,
        source: parsed(row, 10, "source")?,
        created_at: timestamp(row, 11, "created_at")?,
        version: version(row, 12)?,
    })
}
