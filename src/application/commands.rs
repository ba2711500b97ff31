use crate::application::bootstrap::bootstrap_workspace;
use crate::application::engine::{NowProvider, SessionEngine, SessionSnapshot};
use crate::application::handoff::{CompletionHandoff, RetryPolicy};
use crate::application::hooks::{SessionHooks, TerminalCueHooks};
use crate::application::session_runtime::{ActiveSession, SessionEvent};
use crate::domain::models::{
    parse_date, parse_hhmm, CompletionEvent, LogStatus, SessionMode, SessionPlan, SessionState,
};
use crate::domain::planner::PiecePlanner;
use crate::infrastructure::config::{AppConfig, LogStoreBackend};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::log_store::{LogStore, RestLogStore, SqliteLogStore};
use crate::infrastructure::plan_store::{PlanStore, SqlitePlanStore};
use crate::infrastructure::session_store::{SessionStateStore, SqliteSessionStateStore};
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

pub struct AppState {
    database_path: PathBuf,
    config: AppConfig,
    plan_store: Arc<dyn PlanStore>,
    session_store: Arc<SqliteSessionStateStore>,
    credential_store: Arc<dyn CredentialStore>,
    log_store_override: Option<Arc<dyn LogStore>>,
    hooks: Arc<dyn SessionHooks>,
    now_provider: NowProvider,
    runtime: Mutex<RuntimeState>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let database_path = bootstrap.database_path;

        Ok(Self {
            plan_store: Arc::new(SqlitePlanStore::new(&database_path)),
            session_store: Arc::new(SqliteSessionStateStore::new(&database_path)),
            database_path,
            config: bootstrap.config,
            credential_store: Arc::new(KeyringCredentialStore::default()),
            log_store_override: None,
            hooks: Arc::new(TerminalCueHooks),
            now_provider: Arc::new(Utc::now),
            runtime: Mutex::new(RuntimeState::default()),
        })
    }

    pub fn with_credential_store(mut self, credential_store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = credential_store;
        self
    }

    /// Bypasses the configured backend.
    pub fn with_log_store(mut self, log_store: Arc<dyn LogStore>) -> Self {
        self.log_store_override = Some(log_store);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }

    fn log_store(&self) -> Result<Arc<dyn LogStore>, InfraError> {
        if let Some(log_store) = &self.log_store_override {
            return Ok(Arc::clone(log_store));
        }
        let settings = &self.config.log_store;
        match settings.backend {
            LogStoreBackend::Local => Ok(Arc::new(SqliteLogStore::new(&self.database_path))),
            LogStoreBackend::Rest => {
                let endpoint = settings.endpoint.as_deref().unwrap_or_default();
                let api_key = self.credential_store.load_api_key()?.ok_or_else(|| {
                    InfraError::Credential(
                        "no log store api key saved; run set-log-key first".to_string(),
                    )
                })?;
                Ok(Arc::new(RestLogStore::new(endpoint, &settings.table, api_key)?))
            }
        }
    }

    fn local_now(&self) -> Result<(NaiveDate, NaiveTime), InfraError> {
        let tz = self.config.time_zone().map_err(InfraError::InvalidConfig)?;
        let now = (self.now_provider)().with_timezone(&tz);
        Ok((now.date_naive(), now.time()))
    }

    fn find_plan(&self, plan_id: &str) -> Result<SessionPlan, InfraError> {
        let plan_id = required_plan_id(plan_id)?;
        self.plan_store
            .get_plan(&self.config.owner_id, plan_id)?
            .ok_or_else(|| InfraError::InvalidInput(format!("plan not found: {plan_id}")))
    }
}

#[derive(Default)]
struct RuntimeState {
    active: Option<ActiveSession<SqliteSessionStateStore>>,
    events: Option<UnboundedReceiver<SessionEvent>>,
}

impl RuntimeState {
    fn active(&mut self) -> Result<&mut ActiveSession<SqliteSessionStateStore>, InfraError> {
        self.active
            .as_mut()
            .ok_or_else(|| InfraError::InvalidState("no session is open".to_string()))
    }

    fn active_for(
        &mut self,
        plan_id: Option<&str>,
    ) -> Result<Option<&mut ActiveSession<SqliteSessionStateStore>>, InfraError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };
        match plan_id {
            Some(plan_id) if active.plan_id()? != plan_id.trim() => Ok(None),
            _ => Ok(Some(active)),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlanListItem {
    pub id: String,
    pub date: NaiveDate,
    pub section: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: i64,
    pub is_past: bool,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AddPlanInput {
    pub id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub section: String,
    pub tasks_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HandoffResponse {
    pub plan_id: String,
    pub date: NaiveDate,
    pub status: LogStatus,
    pub checked_at: DateTime<Utc>,
}

/// Plans for `date` (today by default) that have no log entry yet, earliest
/// first.
pub async fn list_available_plans_impl(
    state: &AppState,
    date: Option<String>,
) -> Result<Vec<PlanListItem>, InfraError> {
    let (today, local_time) = state.local_now()?;
    let date = match date.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_date(value, "date").map_err(InfraError::InvalidInput)?,
        None => today,
    };

    let owner_id = state.config.owner_id.as_str();
    let logged = state.log_store()?.logged_plan_ids(owner_id, date).await?;
    let plans = state.plan_store.list_plans(owner_id, date)?;

    let items = plans
        .into_iter()
        .filter(|plan| !logged.contains(&plan.id))
        .map(|plan| {
            let is_past = date < today || (date == today && plan.is_past_at(local_time));
            PlanListItem {
                duration_minutes: plan.duration_minutes(),
                start_time: plan.start_time.format("%H:%M").to_string(),
                end_time: plan.end_time.format("%H:%M").to_string(),
                tasks: plan.tasks().into_iter().map(ToOwned::to_owned).collect(),
                is_past,
                id: plan.id,
                date: plan.date,
                section: plan.section,
            }
        })
        .collect::<Vec<_>>();

    info!(date = %date, count = items.len(), "listed available plans");
    Ok(items)
}

pub fn add_plan_impl(state: &AppState, input: AddPlanInput) -> Result<SessionPlan, InfraError> {
    let date = parse_date(&input.date, "date").map_err(InfraError::InvalidInput)?;
    let start_time = plan_time(&input.start_time, "start")?;
    let end_time = plan_time(&input.end_time, "end")?;

    let plan = SessionPlan {
        id: required_plan_id(&input.id)?.to_string(),
        owner_id: state.config.owner_id.clone(),
        date,
        start_time,
        end_time,
        section: input.section.trim().to_string(),
        tasks_text: input.tasks_text.unwrap_or_default(),
    };
    state.plan_store.upsert_plan(&plan)?;
    info!(plan_id = %plan.id, date = %plan.date, "saved plan");
    Ok(plan)
}

/// Plans are stored at minute precision, so seconds other than `:00` are
/// rejected rather than dropped.
fn plan_time(value: &str, field_name: &str) -> Result<NaiveTime, InfraError> {
    parse_hhmm(value)
        .filter(|time| time.second() == 0)
        .ok_or_else(|| InfraError::InvalidInput(format!("{field_name} must be HH:MM, got '{value}'")))
}

/// Selects a plan. Any other open session is saved and torn down first.
pub fn open_session_impl(state: &AppState, plan_id: String) -> Result<SessionSnapshot, InfraError> {
    let plan = state.find_plan(&plan_id)?;
    let mut runtime = lock_runtime(state)?;

    if let Some(active) = runtime.active_for(Some(&plan.id))? {
        return active.snapshot();
    }
    if let Some(previous) = runtime.active.take() {
        let left = previous.leave()?;
        info!(plan_id = %left.plan_id, "saved previous session before switching");
    }

    let planner = PiecePlanner::new(state.config.planner.clone());
    let engine = SessionEngine::open(plan, planner, Arc::clone(&state.session_store))?
        .with_hooks(Arc::clone(&state.hooks))
        .with_now_provider(Arc::clone(&state.now_provider));
    let (active, events) = ActiveSession::new(
        engine,
        Duration::from_millis(state.config.tick_interval_ms),
    );
    let snapshot = active.snapshot()?;
    runtime.active = Some(active);
    runtime.events = Some(events);
    Ok(snapshot)
}

/// Hands the event stream of the open session to the caller, once.
pub fn take_session_events_impl(
    state: &AppState,
) -> Result<Option<UnboundedReceiver<SessionEvent>>, InfraError> {
    Ok(lock_runtime(state)?.events.take())
}

pub fn configure_pieces_impl(
    state: &AppState,
    piece_count: u32,
) -> Result<SessionSnapshot, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.active()?.configure_pieces(piece_count)
}

pub fn set_piece_durations_impl(
    state: &AppState,
    focus_minutes: Option<u32>,
    break_minutes: Option<u32>,
) -> Result<SessionSnapshot, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.active()?.set_durations(focus_minutes, break_minutes)
}

pub fn start_session_impl(state: &AppState) -> Result<SessionSnapshot, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.active()?.start()
}

pub fn pause_session_impl(state: &AppState) -> Result<SessionSnapshot, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.active()?.pause()
}

pub fn resume_session_impl(state: &AppState) -> Result<SessionSnapshot, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.active()?.resume()
}

pub fn reset_piece_impl(state: &AppState) -> Result<SessionSnapshot, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.active()?.reset_piece()
}

/// Save & exit. Returns `None` when nothing was open.
pub fn leave_session_impl(state: &AppState) -> Result<Option<SessionSnapshot>, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.events = None;
    match runtime.active.take() {
        Some(active) => Ok(Some(active.leave()?)),
        None => Ok(None),
    }
}

/// Discard & exit. Returns whether there was anything to discard.
pub fn abandon_session_impl(state: &AppState, plan_id: String) -> Result<bool, InfraError> {
    let plan_id = required_plan_id(&plan_id)?;
    let mut runtime = lock_runtime(state)?;
    if runtime.active_for(Some(plan_id))?.is_some() {
        runtime.events = None;
        if let Some(active) = runtime.active.take() {
            active.abandon()?;
        }
        return Ok(true);
    }

    let existed = state.session_store.load(plan_id)?.is_some();
    state.session_store.clear(plan_id)?;
    info!(plan_id, existed, "cleared stored session");
    Ok(existed)
}

/// The open session when it matches, otherwise the stored record for the plan.
pub fn get_session_state_impl(
    state: &AppState,
    plan_id: Option<String>,
) -> Result<SessionSnapshot, InfraError> {
    {
        let mut runtime = lock_runtime(state)?;
        if let Some(active) = runtime.active_for(plan_id.as_deref())? {
            return active.snapshot();
        }
    }

    let plan_id = plan_id.ok_or_else(|| InfraError::InvalidState("no session is open".to_string()))?;
    let plan = state.find_plan(&plan_id)?;
    let stored = state
        .session_store
        .load(&plan.id)?
        .unwrap_or_else(SessionState::idle);
    Ok(SessionSnapshot::of(&plan, &stored))
}

/// Sends the completed session's `done` entry to the log store. Safe to call
/// again after a failure.
pub async fn complete_handoff_impl(
    state: &AppState,
    plan_id: Option<String>,
) -> Result<HandoffResponse, InfraError> {
    let active_event = {
        let mut runtime = lock_runtime(state)?;
        match runtime.active_for(plan_id.as_deref())? {
            Some(active) => active.completion_event()?,
            None => None,
        }
    };

    let (event, from_active) = match active_event {
        Some(event) => (event, true),
        None => {
            let plan_id =
                plan_id.ok_or_else(|| InfraError::InvalidState("no session is open".to_string()))?;
            (stored_completion_event(state, &plan_id)?, false)
        }
    };

    let handoff = CompletionHandoff::new(state.log_store()?, Arc::clone(&state.session_store))
        .with_retry_policy(RetryPolicy::from(&state.config.handoff));
    let entry = handoff.hand_off(&state.config.owner_id, &event).await?;

    if from_active {
        let mut runtime = lock_runtime(state)?;
        if runtime.active_for(Some(&event.plan_id))?.is_some() {
            runtime.events = None;
            if let Some(active) = runtime.active.take() {
                active.close();
            }
        }
    }

    Ok(HandoffResponse {
        plan_id: entry.plan_id,
        date: entry.date,
        status: entry.status,
        checked_at: entry.checked_at,
    })
}

pub fn set_log_key_impl(state: &AppState, api_key: String) -> Result<(), InfraError> {
    state.credential_store.save_api_key(&api_key)?;
    info!("saved log store api key");
    Ok(())
}

fn stored_completion_event(state: &AppState, plan_id: &str) -> Result<CompletionEvent, InfraError> {
    let plan = state.find_plan(plan_id)?;
    let stored = state.session_store.load(&plan.id)?;
    match stored {
        Some(SessionState {
            mode: SessionMode::Completed,
            completed_at: Some(completed_at),
            ..
        }) => Ok(CompletionEvent {
            plan_id: plan.id,
            date: plan.date,
            completed_at,
        }),
        Some(other) => Err(InfraError::InvalidState(format!(
            "session for {} is {}, not completed",
            plan.id,
            other.mode.as_str()
        ))),
        None => Err(InfraError::InvalidState(format!(
            "no completed session stored for {}",
            plan.id
        ))),
    }
}

fn required_plan_id(plan_id: &str) -> Result<&str, InfraError> {
    let plan_id = plan_id.trim();
    if plan_id.is_empty() {
        return Err(InfraError::InvalidInput("plan_id must not be empty".to_string()));
    }
    Ok(plan_id)
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidState(format!("runtime lock poisoned: {error}")))
}
