use crate::domain::models::{SessionConfig, SessionMode, SessionState};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

const RECORD_VERSION: u8 = 1;

/// Durable storage of one [`SessionState`] per plan. `load` reports a missing
/// or unreadable record as `None`.
pub trait SessionStateStore: Send + Sync {
    fn load(&self, plan_id: &str) -> Result<Option<SessionState>, InfraError>;
    fn save(&self, plan_id: &str, state: &SessionState) -> Result<(), InfraError>;
    fn clear(&self, plan_id: &str) -> Result<(), InfraError>;
}

/// On-disk shape, kept flat and versioned so the in-memory type can evolve
/// independently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct PersistedSessionRecord {
    version: u8,
    mode: String,
    remaining_seconds: u32,
    current_piece_index: u32,
    is_running: bool,
    piece_count: u32,
    focus_seconds: u32,
    break_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl PersistedSessionRecord {
    fn from_state(state: &SessionState) -> Self {
        Self {
            version: RECORD_VERSION,
            mode: state.mode.as_str().to_string(),
            remaining_seconds: state.remaining_seconds,
            current_piece_index: state.current_piece_index,
            is_running: state.is_running,
            piece_count: state.config.piece_count,
            focus_seconds: state.config.focus_seconds,
            break_seconds: state.config.break_seconds,
            completed_at: state.completed_at,
        }
    }

    fn into_state(self) -> Result<SessionState, String> {
        if self.version != RECORD_VERSION {
            return Err(format!("unsupported session record version {}", self.version));
        }
        let mode = SessionMode::parse(&self.mode)
            .ok_or_else(|| format!("unknown session mode '{}'", self.mode))?;
        let state = SessionState {
            mode,
            remaining_seconds: self.remaining_seconds,
            current_piece_index: self.current_piece_index,
            is_running: self.is_running,
            config: SessionConfig {
                piece_count: self.piece_count,
                focus_seconds: self.focus_seconds,
                break_seconds: self.break_seconds,
            },
            completed_at: self.completed_at,
        };
        state.validate()?;
        Ok(state)
    }
}

pub fn encode_session_state(state: &SessionState) -> Result<String, InfraError> {
    Ok(serde_json::to_string(&PersistedSessionRecord::from_state(state))?)
}

/// Returns `None` for anything that does not decode to a valid state.
pub fn decode_session_state(plan_id: &str, payload: &str) -> Option<SessionState> {
    let decoded = serde_json::from_str::<PersistedSessionRecord>(payload)
        .map_err(|error| error.to_string())
        .and_then(PersistedSessionRecord::into_state);
    match decoded {
        Ok(state) => Some(state),
        Err(error) => {
            warn!(plan_id, %error, "discarding unreadable session record");
            None
        }
    }
}

fn normalized_plan_id(plan_id: &str) -> Result<&str, InfraError> {
    let plan_id = plan_id.trim();
    if plan_id.is_empty() {
        return Err(InfraError::InvalidInput("plan_id must not be empty".to_string()));
    }
    Ok(plan_id)
}

/// Holds one connection, opened on first use, since the running timer writes
/// the record every second.
#[derive(Debug)]
pub struct SqliteSessionStateStore {
    db_path: PathBuf,
    connection: Mutex<Option<Connection>>,
}

impl SqliteSessionStateStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            connection: Mutex::new(None),
        }
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let mut connection = self
            .connection
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("session store lock poisoned: {error}")))?;
        if connection.is_none() {
            *connection = Some(Connection::open(&self.db_path)?);
        }
        match connection.as_ref() {
            Some(connection) => operation(connection),
            None => Err(InfraError::InvalidState(
                "session store connection unavailable".to_string(),
            )),
        }
    }
}

impl SessionStateStore for SqliteSessionStateStore {
    fn load(&self, plan_id: &str) -> Result<Option<SessionState>, InfraError> {
        let plan_id = normalized_plan_id(plan_id)?;
        let payload: Option<String> = self.with_connection(|connection| {
            Ok(connection
                .query_row(
                    "SELECT payload FROM session_state WHERE plan_id = ?1",
                    params![plan_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        Ok(payload.and_then(|payload| decode_session_state(plan_id, &payload)))
    }

    fn save(&self, plan_id: &str, state: &SessionState) -> Result<(), InfraError> {
        let plan_id = normalized_plan_id(plan_id)?;
        let payload = encode_session_state(state)?;
        self.with_connection(|connection| {
            connection.execute(
                "INSERT INTO session_state (plan_id, payload, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(plan_id) DO UPDATE SET
                   payload = excluded.payload,
                   updated_at = excluded.updated_at",
                params![plan_id, payload, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    fn clear(&self, plan_id: &str) -> Result<(), InfraError> {
        let plan_id = normalized_plan_id(plan_id)?;
        self.with_connection(|connection| {
            connection.execute(
                "DELETE FROM session_state WHERE plan_id = ?1",
                params![plan_id],
            )?;
            Ok(())
        })
    }
}

/// Keeps encoded payloads rather than values so tests exercise the same
/// serialization path as the SQLite store.
#[derive(Debug, Default)]
pub struct InMemorySessionStateStore {
    records: Mutex<HashMap<String, String>>,
}

impl InMemorySessionStateStore {
    pub fn insert_raw(&self, plan_id: &str, payload: &str) -> Result<(), InfraError> {
        let mut records = self.lock()?;
        records.insert(plan_id.trim().to_string(), payload.to_string());
        Ok(())
    }

    pub fn contains(&self, plan_id: &str) -> bool {
        self.lock()
            .map(|records| records.contains_key(plan_id.trim()))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, InfraError> {
        self.records
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("session store lock poisoned: {error}")))
    }
}

impl SessionStateStore for InMemorySessionStateStore {
    fn load(&self, plan_id: &str) -> Result<Option<SessionState>, InfraError> {
        let plan_id = normalized_plan_id(plan_id)?;
        let records = self.lock()?;
        Ok(records
            .get(plan_id)
            .and_then(|payload| decode_session_state(plan_id, payload)))
    }

    fn save(&self, plan_id: &str, state: &SessionState) -> Result<(), InfraError> {
        let plan_id = normalized_plan_id(plan_id)?;
        let payload = encode_session_state(state)?;
        let mut records = self.lock()?;
        records.insert(plan_id.to_string(), payload);
        Ok(())
    }

    fn clear(&self, plan_id: &str) -> Result<(), InfraError> {
        let plan_id = normalized_plan_id(plan_id)?;
        let mut records = self.lock()?;
        records.remove(plan_id);
        Ok(())
    }
}
