use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// One logged request/response exchange. Response fields stay null while the
/// exchange is in flight and are set together when it completes; readers must
/// tolerate records that never complete (client disconnect mid-stream).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub response_status: Option<u16>,
    pub response_headers: Option<BTreeMap<String, String>>,
    pub response_body: Option<String>,
    pub duration_ms: Option<f64>,
    pub error: Option<String>,
}

/// Fields captured before dispatch. Headers are the caller's originals, not
/// the sanitized forwarding copy.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletedExchange {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub duration_ms: f64,
    pub error: Option<String>,
}

/// Visibility restriction applied to `list`/`search`/`count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Unrestricted,
    /// Only records whose derived bearer token equals this value. Records
    /// with no extractable bearer token never match.
    Credential(String),
}

impl Scope {
    fn filter(&self) -> Option<&str> {
        match self {
            Scope::Unrestricted => None,
            Scope::Credential(token) => Some(token),
        }
    }
}

fn extract_bearer(headers: &BTreeMap<String, String>) -> Option<String> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .and_then(|(_, value)| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

/// Cloning shares the same connection; the mutex is the store's single
/// serialization point for persisted state.
#[derive(Clone)]
pub struct RequestStore {
    conn: Arc<Mutex<Connection>>,
}

impl RequestStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                headers TEXT NOT NULL,
                body TEXT,
                authorization_bearer TEXT,
                response_status INTEGER,
                response_headers TEXT,
                response_body TEXT,
                duration_ms REAL,
                error TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_requests_bearer ON requests(authorization_bearer)",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persists a new record with null response fields and returns its id.
    /// The record is visible to readers before this returns, so in-flight
    /// requests show up in listings.
    pub fn insert(&self, new: NewRequest) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let bearer = extract_bearer(&new.headers);
        let headers_json = serde_json::to_string(&new.headers)?;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO requests (id, timestamp, method, url, headers, body, authorization_bearer)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, timestamp, new.method, new.url, headers_json, new.body, bearer],
        )?;

        Ok(id)
    }

    /// Sets every response field in one statement. Unknown ids are a silent
    /// no-op: completion must never fail an exchange that already happened.
    pub fn complete(&self, id: &str, outcome: CompletedExchange) -> AppResult<()> {
        let headers_json = serde_json::to_string(&outcome.headers)?;

        let conn = self.lock();
        conn.execute(
            "UPDATE requests SET
                response_status = ?1,
                response_headers = ?2,
                response_body = ?3,
                duration_ms = ?4,
                error = ?5
             WHERE id = ?6",
            params![
                outcome.status,
                headers_json,
                outcome.body,
                outcome.duration_ms,
                outcome.error,
                id
            ],
        )?;

        Ok(())
    }

    pub fn get(&self, id: &str) -> AppResult<Option<RequestRecord>> {
        let conn = self.lock();
        let record = conn
            .prepare("SELECT * FROM requests WHERE id = ?1")?
            .query_row(params![id], row_to_record)
            .optional()?;
        Ok(record)
    }

    pub fn list(&self, limit: usize, offset: usize, scope: &Scope) -> AppResult<Vec<RequestRecord>> {
        let conn = self.lock();
        let mut records = Vec::new();
        match scope.filter() {
            Some(token) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM requests
                     WHERE authorization_bearer = ?1
                     ORDER BY timestamp DESC
                     LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(params![token, limit as i64, offset as i64], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM requests
                     ORDER BY timestamp DESC
                     LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    /// Substring match over url, method, request body and response body
    /// (SQLite `LIKE`, so ASCII case-insensitive).
    pub fn search(&self, query: &str, limit: usize, scope: &Scope) -> AppResult<Vec<RequestRecord>> {
        let pattern = format!("%{}%", query);
        let conn = self.lock();
        let mut records = Vec::new();
        match scope.filter() {
            Some(token) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM requests
                     WHERE (url LIKE ?1 OR method LIKE ?1 OR body LIKE ?1 OR response_body LIKE ?1)
                     AND authorization_bearer = ?2
                     ORDER BY timestamp DESC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![pattern, token, limit as i64], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM requests
                     WHERE url LIKE ?1 OR method LIKE ?1 OR body LIKE ?1 OR response_body LIKE ?1
                     ORDER BY timestamp DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![pattern, limit as i64], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    pub fn count(&self, scope: &Scope) -> AppResult<i64> {
        let conn = self.lock();
        let count = match scope.filter() {
            Some(token) => conn.query_row(
                "SELECT COUNT(*) FROM requests WHERE authorization_bearer = ?1",
                params![token],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM requests", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    // Async facades: the store is blocking (rusqlite), handlers hop through
    // spawn_blocking so persistence never stalls the relay tasks.

    pub async fn insert_async(&self, new: NewRequest) -> AppResult<String> {
        let store = self.clone();
        spawn_store_task(move || store.insert(new)).await
    }

    pub async fn complete_async(&self, id: &str, outcome: CompletedExchange) -> AppResult<()> {
        let store = self.clone();
        let id = id.to_string();
        spawn_store_task(move || store.complete(&id, outcome)).await
    }

    pub async fn get_async(&self, id: &str) -> AppResult<Option<RequestRecord>> {
        let store = self.clone();
        let id = id.to_string();
        spawn_store_task(move || store.get(&id)).await
    }

    pub async fn list_async(
        &self,
        limit: usize,
        offset: usize,
        scope: Scope,
    ) -> AppResult<Vec<RequestRecord>> {
        let store = self.clone();
        spawn_store_task(move || store.list(limit, offset, &scope)).await
    }

    pub async fn search_async(
        &self,
        query: String,
        limit: usize,
        scope: Scope,
    ) -> AppResult<Vec<RequestRecord>> {
        let store = self.clone();
        spawn_store_task(move || store.search(&query, limit, &scope)).await
    }

    pub async fn count_async(&self, scope: Scope) -> AppResult<i64> {
        let store = self.clone();
        spawn_store_task(move || store.count(&scope)).await
    }
}

async fn spawn_store_task<T, F>(task: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Unknown(format!("Store task join failed: {}", e)))?
}

fn row_to_record(row: &Row) -> rusqlite::Result<RequestRecord> {
    let timestamp_raw: String = row.get("timestamp")?;
    let timestamp = timestamp_raw.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let headers_raw: String = row.get("headers")?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&headers_raw).unwrap_or_default();
    let response_headers_raw: Option<String> = row.get("response_headers")?;
    let response_headers =
        response_headers_raw.and_then(|raw| serde_json::from_str(&raw).ok());

    Ok(RequestRecord {
        id: row.get("id")?,
        timestamp,
        method: row.get("method")?,
        url: row.get("url")?,
        headers,
        body: row.get("body")?,
        response_status: row.get("response_status")?,
        response_headers,
        response_body: row.get("response_body")?,
        duration_ms: row.get("duration_ms")?,
        error: row.get("error")?,
    })
}
