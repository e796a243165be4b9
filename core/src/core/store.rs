//! Findings persistence with fingerprint deduplication.
//!
//! A store without a backend degrades to "no persistence": nothing is
//! known, and storing a finding is a hard error so that a suspicious
//! response is never silently dropped.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{params, Connection, TransactionBehavior};

use super::finding::{Finding, Fingerprint};
use crate::errors::{FuzzError, Result};

/// Storage engine behind a `FindingStore`.
pub trait FindingBackend: Send {
    fn contains(&self, fingerprint: &Fingerprint) -> Result<bool>;
    /// Stores the finding as given and returns its issue number.
    fn insert(&mut self, finding: &Finding) -> Result<i64>;
    /// Check-then-insert as one step; `None` when the fingerprint was known.
    fn insert_if_absent(&mut self, finding: &Finding) -> Result<Option<i64>>;
    fn count_new(&self) -> Result<usize>;
    fn mark_all_processed(&mut self) -> Result<usize>;
    fn new_findings(&self) -> Result<Vec<Finding>>;
}

pub struct FindingStore {
    backend: Option<Box<dyn FindingBackend>>,
}

impl FindingStore {
    /// Opens the SQLite database at `database`, or a store without
    /// persistence when none is configured.
    pub fn init(database: Option<&str>) -> Result<Self> {
        match database {
            Some(path) => {
                info!("Using findings database {}", path);
                Ok(Self::with_backend(Box::new(SqliteBackend::open(path)?)))
            }
            None => {
                info!("No findings database configured, findings cannot be stored");
                Ok(Self::disabled())
            }
        }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::default()))
    }

    pub fn with_backend(backend: Box<dyn FindingBackend>) -> Self {
        Self { backend: Some(backend) }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// True when a stored finding has the same fingerprint.
    pub fn is_known(&self, finding: &Finding) -> Result<bool> {
        match &self.backend {
            Some(backend) => backend.contains(&finding.fingerprint()),
            None => Ok(false),
        }
    }

    /// Stores the finding as new, without checking for duplicates.
    pub fn add(&mut self, mut finding: Finding) -> Result<i64> {
        let backend = self.backend_mut(&finding)?;
        finding.is_new = true;
        backend.insert(&finding)
    }

    /// Stores the finding unless its fingerprint is already known.
    /// Returns whether it was stored.
    pub fn add_if_new(&mut self, mut finding: Finding) -> Result<bool> {
        let backend = self.backend_mut(&finding)?;
        finding.is_new = true;
        match backend.insert_if_absent(&finding)? {
            Some(issue_no) => {
                debug!("Stored finding #{} for {}", issue_no, finding.scenario_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of findings not yet marked as processed.
    pub fn count_new(&self) -> Result<usize> {
        match &self.backend {
            Some(backend) => backend.count_new(),
            None => Ok(0),
        }
    }

    pub fn mark_all_processed(&mut self) -> Result<usize> {
        match &mut self.backend {
            Some(backend) => backend.mark_all_processed(),
            None => Ok(0),
        }
    }

    pub fn new_findings(&self) -> Result<Vec<Finding>> {
        match &self.backend {
            Some(backend) => backend.new_findings(),
            None => Ok(Vec::new()),
        }
    }

    fn backend_mut(&mut self, finding: &Finding) -> Result<&mut Box<dyn FindingBackend>> {
        self.backend.as_mut().ok_or_else(|| FuzzError::StorageUnavailable {
            scenario_id: finding.scenario_id.clone(),
            url: finding.url.clone(),
        })
    }
}

/// Process-local store, indexed by fingerprint.
#[derive(Default)]
pub struct MemoryBackend {
    findings: Vec<Finding>,
    index: HashSet<Fingerprint>,
}

impl FindingBackend for MemoryBackend {
    fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.index.contains(fingerprint))
    }

    fn insert(&mut self, finding: &Finding) -> Result<i64> {
        let issue_no = self.findings.len() as i64 + 1;
        let mut stored = finding.clone();
        stored.issue_no = Some(issue_no);
        self.index.insert(stored.fingerprint());
        self.findings.push(stored);
        Ok(issue_no)
    }

    fn insert_if_absent(&mut self, finding: &Finding) -> Result<Option<i64>> {
        if self.contains(&finding.fingerprint())? {
            return Ok(None);
        }
        self.insert(finding).map(Some)
    }

    fn count_new(&self) -> Result<usize> {
        Ok(self.findings.iter().filter(|f| f.is_new).count())
    }

    fn mark_all_processed(&mut self) -> Result<usize> {
        let mut changed = 0;
        for finding in self.findings.iter_mut().filter(|f| f.is_new) {
            finding.is_new = false;
            changed += 1;
        }
        Ok(changed)
    }

    fn new_findings(&self) -> Result<Vec<Finding>> {
        Ok(self.findings.iter().filter(|f| f.is_new).cloned().collect())
    }
}

pub static CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS fuzzer_findings (
      issue_no            INTEGER PRIMARY KEY,
      new_issue           INTEGER NOT NULL DEFAULT 0,
      timestamp           TEXT NOT NULL,
      test_runner_host    TEXT NOT NULL,
      scenario_id         TEXT NOT NULL,
      url                 TEXT NOT NULL,
      injected_field      TEXT NOT NULL DEFAULT '',
      request_method      TEXT NOT NULL DEFAULT '',
      request_headers     TEXT NOT NULL DEFAULT '',
      request_body        TEXT NOT NULL DEFAULT '',
      response_status     TEXT NOT NULL DEFAULT '',
      response_headers    TEXT NOT NULL DEFAULT '',
      response_body       TEXT NOT NULL DEFAULT '',
      response_history    TEXT NOT NULL DEFAULT '',
      protocol_error      TEXT NOT NULL DEFAULT '',
      timed_out           INTEGER NOT NULL DEFAULT 0,
      body_error_detected INTEGER NOT NULL DEFAULT 0,
      body_error_matched  TEXT NOT NULL DEFAULT ''
    )";

pub static CREATE_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS fuzzer_findings_fingerprint
    ON fuzzer_findings (scenario_id, request_method, response_status, protocol_error, body_error_matched, timed_out)";

static COLUMNS: &[&str] = &[
    "issue_no",
    "new_issue",
    "timestamp",
    "test_runner_host",
    "scenario_id",
    "url",
    "injected_field",
    "request_method",
    "request_headers",
    "request_body",
    "response_status",
    "response_headers",
    "response_body",
    "response_history",
    "protocol_error",
    "timed_out",
    "body_error_detected",
    "body_error_matched",
];

/// Durable store; safe to share between concurrent runs.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Opens (or creates) the database; `:memory:` gives a private one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute(CREATE_TABLE_SQL, [])?;
        conn.execute(CREATE_INDEX_SQL, [])?;
        Ok(Self { conn })
    }

    fn exists(conn: &Connection, fp: &Fingerprint) -> Result<bool> {
        let found = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM fuzzer_findings
               WHERE scenario_id = ?1 AND request_method = ?2 AND response_status = ?3
                 AND protocol_error = ?4 AND body_error_matched = ?5 AND timed_out = ?6)",
            params![
                fp.scenario_id,
                fp.request_method,
                fp.response_status,
                fp.protocol_error,
                fp.body_error_matched,
                fp.timed_out
            ],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(found)
    }

    fn insert_row(conn: &Connection, f: &Finding) -> Result<i64> {
        conn.execute(
            &format!(
                "INSERT INTO fuzzer_findings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                COLUMNS[1..].join(", ")
            ),
            params![
                f.is_new,
                f.timestamp.to_rfc3339(),
                f.runner_host,
                f.scenario_id,
                f.url,
                f.injected_field,
                f.request_method,
                f.request_headers,
                f.request_body,
                f.response_status,
                f.response_headers,
                f.response_body,
                f.response_history,
                f.protocol_error,
                f.timed_out,
                f.body_error_detected,
                f.body_error_matched
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn from_row(row: &rusqlite::Row) -> Result<Finding, rusqlite::Error> {
        let timestamp: String = row.get(2)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?
            .with_timezone(&Utc);

        Ok(Finding {
            issue_no: Some(row.get(0)?),
            is_new: row.get(1)?,
            timestamp,
            runner_host: row.get(3)?,
            scenario_id: row.get(4)?,
            url: row.get(5)?,
            injected_field: row.get(6)?,
            request_method: row.get(7)?,
            request_headers: row.get(8)?,
            request_body: row.get(9)?,
            response_status: row.get(10)?,
            response_headers: row.get(11)?,
            response_body: row.get(12)?,
            response_history: row.get(13)?,
            protocol_error: row.get(14)?,
            timed_out: row.get(15)?,
            body_error_detected: row.get(16)?,
            body_error_matched: row.get(17)?,
        })
    }
}

impl FindingBackend for SqliteBackend {
    fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Self::exists(&self.conn, fingerprint)
    }

    fn insert(&mut self, finding: &Finding) -> Result<i64> {
        Self::insert_row(&self.conn, finding)
    }

    fn insert_if_absent(&mut self, finding: &Finding) -> Result<Option<i64>> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if Self::exists(&tx, &finding.fingerprint())? {
            return Ok(None);
        }
        let issue_no = Self::insert_row(&tx, finding)?;
        tx.commit()?;
        Ok(Some(issue_no))
    }

    fn count_new(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fuzzer_findings WHERE new_issue = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn mark_all_processed(&mut self) -> Result<usize> {
        let changed = self
            .conn
            .execute("UPDATE fuzzer_findings SET new_issue = 0 WHERE new_issue = 1", [])?;
        Ok(changed)
    }

    fn new_findings(&self) -> Result<Vec<Finding>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM fuzzer_findings WHERE new_issue = 1 ORDER BY issue_no",
            COLUMNS.join(", ")
        ))?;
        let findings = stmt
            .query_map([], Self::from_row)?
            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
        Ok(findings)
    }
}
