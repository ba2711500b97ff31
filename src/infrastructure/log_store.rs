use crate::domain::models::{DailyLogEntry, LogStatus};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

pub const DEFAULT_LOG_TABLE: &str = "daily_log";

/// Write side of the external daily log. `upsert_log` is keyed by
/// `(plan_id, date)`, so resending the same entry never creates a second row.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn upsert_log(&self, entry: &DailyLogEntry) -> Result<(), InfraError>;

    async fn logged_plan_ids(
        &self,
        owner_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<String>, InfraError>;
}

/// Failures worth another attempt: transport errors, throttling, and 5xx.
pub fn is_transient(error: &InfraError) -> bool {
    match error {
        InfraError::Http(message) => {
            let message = message.to_ascii_lowercase();
            message.starts_with("network error")
                || message.contains("timed out")
                || message.starts_with("http 429")
                || message.starts_with("http 5")
        }
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct SqliteLogStore {
    db_path: PathBuf,
}

impl SqliteLogStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    pub fn count_entries(&self, plan_id: &str) -> Result<i64, InfraError> {
        let connection = self.connect()?;
        Ok(connection.query_row(
            "SELECT COUNT(*) FROM daily_log WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )?)
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn upsert_log(&self, entry: &DailyLogEntry) -> Result<(), InfraError> {
        entry.validate().map_err(InfraError::InvalidInput)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO daily_log (owner_id, plan_id, date, status, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(plan_id, date) DO UPDATE SET
               owner_id = excluded.owner_id,
               status = excluded.status,
               checked_at = excluded.checked_at",
            params![
                entry.owner_id,
                entry.plan_id,
                entry.date.to_string(),
                entry.status.as_str(),
                entry.checked_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn logged_plan_ids(
        &self,
        owner_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<String>, InfraError> {
        let connection = self.connect()?;
        let mut statement =
            connection.prepare("SELECT plan_id FROM daily_log WHERE owner_id = ?1 AND date = ?2")?;
        let ids = statement
            .query_map(params![owner_id.trim(), date.to_string()], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(ids)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    entries: Mutex<HashMap<(String, NaiveDate), DailyLogEntry>>,
}

impl InMemoryLogStore {
    pub fn entries(&self) -> Vec<DailyLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn upsert_log(&self, entry: &DailyLogEntry) -> Result<(), InfraError> {
        entry.validate().map_err(InfraError::InvalidInput)?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("log store lock poisoned: {error}")))?;
        entries.insert((entry.plan_id.clone(), entry.date), entry.clone());
        Ok(())
    }

    async fn logged_plan_ids(
        &self,
        owner_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<String>, InfraError> {
        let entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("log store lock poisoned: {error}")))?;
        Ok(entries
            .values()
            .filter(|entry| entry.owner_id == owner_id.trim() && entry.date == date)
            .map(|entry| entry.plan_id.clone())
            .collect())
    }
}

/// PostgREST-style remote table. Upserts rely on the server-side unique
/// constraint on `(plan_id, date)`.
#[derive(Debug, Clone)]
pub struct RestLogStore {
    client: Client,
    table_url: Url,
    api_key: String,
}

#[derive(Debug, serde::Serialize)]
struct RestLogRow<'a> {
    user_id: &'a str,
    plan_id: &'a str,
    date: String,
    status: &'a str,
    checked_at: String,
}

#[derive(Debug, serde::Deserialize)]
struct RestPlanIdRow {
    plan_id: String,
}

impl RestLogStore {
    pub fn new(endpoint: &str, table: &str, api_key: impl Into<String>) -> Result<Self, InfraError> {
        let table = table.trim();
        if table.is_empty() {
            return Err(InfraError::InvalidConfig("logStore.table must not be empty".to_string()));
        }
        let mut table_url = Url::parse(endpoint.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid logStore.endpoint: {error}")))?;
        {
            let mut segments = table_url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("logStore.endpoint cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("rest");
            segments.push("v1");
            segments.push(table);
        }

        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(InfraError::Credential("log store api key is empty".to_string()));
        }

        Ok(Self {
            client: Client::new(),
            table_url,
            api_key,
        })
    }

    pub fn table_url(&self) -> &Url {
        &self.table_url
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        if body.trim().is_empty() {
            InfraError::Http(format!("http {}", status.as_u16()))
        } else {
            InfraError::Http(format!("http {}; body={body}", status.as_u16()))
        }
    }
}

#[async_trait]
impl LogStore for RestLogStore {
    async fn upsert_log(&self, entry: &DailyLogEntry) -> Result<(), InfraError> {
        entry.validate().map_err(InfraError::InvalidInput)?;
        let mut url = self.table_url.clone();
        url.query_pairs_mut().append_pair("on_conflict", "plan_id,date");

        let row = RestLogRow {
            user_id: &entry.owner_id,
            plan_id: &entry.plan_id,
            date: entry.date.to_string(),
            status: entry.status.as_str(),
            checked_at: entry.checked_at.to_rfc3339(),
        };

        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "resolution=merge-duplicates")
            .json(&[row])
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error: {error}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::http_error(status, &body))
    }

    async fn logged_plan_ids(
        &self,
        owner_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<String>, InfraError> {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("select", "plan_id")
            .append_pair("user_id", &format!("eq.{}", owner_id.trim()))
            .append_pair("date", &format!("eq.{date}"))
            .append_pair("status", &format!("in.({},{})", LogStatus::Done.as_str(), LogStatus::Missed.as_str()));

        let response = self
            .client
            .get(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("network error: {error}")))?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        let rows = serde_json::from_str::<Vec<RestPlanIdRow>>(&body)?;
        Ok(rows.into_iter().map(|row| row.plan_id).collect())
    }
}
