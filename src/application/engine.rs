use crate::application::hooks::{NoopHooks, SessionHooks};
use crate::domain::models::{
    format_clock, CompletionEvent, SessionMode, SessionPlan, SessionState,
};
use crate::domain::planner::PiecePlanner;
use crate::domain::progress::global_progress;
use crate::domain::session::{SessionMachine, TickOutcome, TransitionKind};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_store::SessionStateStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub plan_id: String,
    pub section: String,
    pub tasks: Vec<String>,
    pub mode: SessionMode,
    pub remaining_seconds: u32,
    pub remaining_display: String,
    pub current_piece_index: u32,
    pub piece_count: u32,
    pub focus_seconds: u32,
    pub break_seconds: u32,
    pub is_running: bool,
    pub progress_percent: u8,
    pub leave_guard_active: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn of(plan: &SessionPlan, state: &SessionState) -> Self {
        Self {
            plan_id: plan.id.clone(),
            section: plan.section.clone(),
            tasks: plan.tasks().into_iter().map(ToOwned::to_owned).collect(),
            mode: state.mode,
            remaining_seconds: state.remaining_seconds,
            remaining_display: format_clock(state.remaining_seconds),
            current_piece_index: state.current_piece_index,
            piece_count: state.config.piece_count,
            focus_seconds: state.config.focus_seconds,
            break_seconds: state.config.break_seconds,
            is_running: state.is_running,
            progress_percent: global_progress(state),
            leave_guard_active: state.is_running && state.remaining_seconds > 0,
            completed_at: state.completed_at,
        }
    }
}

/// One plan's session: the state machine plus the persistence and hook calls
/// that follow each mutation.
pub struct SessionEngine<S>
where
    S: SessionStateStore,
{
    plan: SessionPlan,
    planner: PiecePlanner,
    machine: SessionMachine,
    store: Arc<S>,
    hooks: Arc<dyn SessionHooks>,
    now_provider: NowProvider,
}

impl<S> SessionEngine<S>
where
    S: SessionStateStore,
{
    /// Resumes the persisted session for `plan`, or enters setup with the
    /// planner's default split when nothing usable is stored.
    pub fn open(plan: SessionPlan, planner: PiecePlanner, store: Arc<S>) -> Result<Self, InfraError> {
        let restored = match store.load(&plan.id) {
            Ok(Some(state)) => match SessionMachine::restore(state) {
                Ok(machine) => Some(machine),
                Err(error) => {
                    warn!(plan_id = %plan.id, %error, "persisted session rejected, starting setup");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(plan_id = %plan.id, %error, "session store unavailable, starting setup");
                None
            }
        };

        let mut engine = Self {
            machine: SessionMachine::idle(),
            plan,
            planner,
            store,
            hooks: Arc::new(NoopHooks),
            now_provider: Arc::new(Utc::now),
        };

        match restored {
            Some(machine) => {
                info!(
                    plan_id = %engine.plan.id,
                    mode = machine.mode().as_str(),
                    remaining_seconds = machine.state().remaining_seconds,
                    "resumed persisted session"
                );
                engine.machine = machine;
                // The record was written while running; store the paused copy.
                engine.persist();
            }
            None => {
                let config = engine.planner.plan_for(&engine.plan, None);
                engine.machine.select(config).map_err(InfraError::InvalidState)?;
                info!(
                    plan_id = %engine.plan.id,
                    piece_count = config.piece_count,
                    focus_seconds = config.focus_seconds,
                    break_seconds = config.break_seconds,
                    "entered setup"
                );
                engine.persist();
            }
        }
        Ok(engine)
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    pub fn state(&self) -> &SessionState {
        self.machine.state()
    }

    pub fn leave_guard_active(&self) -> bool {
        self.machine.leave_guard_active()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::of(&self.plan, self.machine.state())
    }

    /// Recomputes both durations from the plan window for a new piece count.
    pub fn configure_pieces(&mut self, piece_count: u32) -> Result<(), InfraError> {
        let config = self.planner.plan_for(&self.plan, Some(piece_count));
        self.machine.configure(config).map_err(InfraError::InvalidState)?;
        debug!(plan_id = %self.plan.id, piece_count = config.piece_count, "piece count changed");
        self.persist();
        Ok(())
    }

    pub fn set_durations(
        &mut self,
        focus_minutes: Option<u32>,
        break_minutes: Option<u32>,
    ) -> Result<(), InfraError> {
        let config = self
            .planner
            .with_durations(self.machine.state().config, focus_minutes, break_minutes);
        self.machine.configure(config).map_err(InfraError::InvalidState)?;
        debug!(
            plan_id = %self.plan.id,
            focus_seconds = config.focus_seconds,
            break_seconds = config.break_seconds,
            "piece durations overridden"
        );
        self.persist();
        Ok(())
    }

    pub fn start(&mut self, now: Instant) -> Result<(), InfraError> {
        self.machine.start(now).map_err(InfraError::InvalidState)?;
        info!(plan_id = %self.plan.id, "session started");
        self.persist();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), InfraError> {
        if self.machine.pause().map_err(InfraError::InvalidState)? {
            debug!(plan_id = %self.plan.id, "session paused");
            self.persist();
        }
        Ok(())
    }

    pub fn resume(&mut self, now: Instant) -> Result<(), InfraError> {
        if self.machine.resume(now).map_err(InfraError::InvalidState)? {
            debug!(plan_id = %self.plan.id, "session resumed");
            self.persist();
        }
        Ok(())
    }

    pub fn reset_piece(&mut self) -> Result<(), InfraError> {
        self.machine.reset_piece().map_err(InfraError::InvalidState)?;
        debug!(plan_id = %self.plan.id, "current piece reset");
        self.persist();
        Ok(())
    }

    /// Save & exit: pauses a running piece and keeps the persisted record.
    pub fn suspend(&mut self) {
        if self.machine.mode().is_piece() && self.machine.is_running() {
            if let Err(error) = self.machine.pause() {
                warn!(plan_id = %self.plan.id, %error, "failed to pause suspended session");
            }
        }
        info!(
            plan_id = %self.plan.id,
            mode = self.machine.mode().as_str(),
            remaining_seconds = self.machine.state().remaining_seconds,
            "session suspended"
        );
        self.persist();
    }

    /// Discard & exit: back to idle with the persisted record removed.
    pub fn abandon(&mut self) -> Result<(), InfraError> {
        self.machine.abandon();
        info!(plan_id = %self.plan.id, "session abandoned");
        self.store.clear(&self.plan.id)
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let outcome = self.machine.tick(now, (self.now_provider)());
        if !outcome.changed() {
            return outcome;
        }
        self.persist();
        if let Some(kind) = outcome.transition {
            self.record_transition(kind);
        }
        outcome
    }

    /// Present only while the session sits in `completed`.
    pub fn completion_event(&self) -> Option<CompletionEvent> {
        let state = self.machine.state();
        if state.mode != SessionMode::Completed {
            return None;
        }
        state.completed_at.map(|completed_at| CompletionEvent {
            plan_id: self.plan.id.clone(),
            date: self.plan.date,
            completed_at,
        })
    }

    fn record_transition(&self, kind: TransitionKind) {
        let state = self.machine.state();
        info!(
            plan_id = %self.plan.id,
            transition = kind.as_str(),
            piece = state.current_piece_index,
            piece_count = state.config.piece_count,
            "session transition"
        );
        self.hooks.on_transition(&self.plan.id, kind);
    }

    fn persist(&self) {
        let state = self.machine.state();
        if state.mode == SessionMode::Idle {
            return;
        }
        if let Err(error) = self.store.save(&self.plan.id, state) {
            warn!(plan_id = %self.plan.id, %error, "failed to persist session state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::hooks::testing::RecordingHooks;
    use crate::domain::models::parse_hhmm;
    use crate::domain::planner::PlannerSettings;
    use crate::infrastructure::session_store::{InMemorySessionStateStore, SqliteSessionStateStore};
    use chrono::NaiveDate;
    use std::time::Duration;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_plan() -> SessionPlan {
        SessionPlan {
            id: "plan-1".to_string(),
            owner_id: "local".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
            start_time: parse_hhmm("09:00").expect("valid time"),
            end_time: parse_hhmm("10:00").expect("valid time"),
            section: "math".to_string(),
            tasks_text: "Chapter 3\nReview".to_string(),
        }
    }

    fn open_engine(
        store: &Arc<InMemorySessionStateStore>,
        hooks: &Arc<RecordingHooks>,
    ) -> SessionEngine<InMemorySessionStateStore> {
        SessionEngine::open(sample_plan(), PiecePlanner::default(), Arc::clone(store))
            .expect("open engine")
            .with_hooks(Arc::clone(hooks) as Arc<dyn SessionHooks>)
            .with_now_provider(Arc::new(|| fixed_time("2026-02-16T10:00:00Z")))
    }

    #[test]
    fn open_without_record_enters_setup_with_default_split() {
        let store = Arc::new(InMemorySessionStateStore::default());
        let hooks = Arc::new(RecordingHooks::default());
        let engine = open_engine(&store, &hooks);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.mode, SessionMode::Setup);
        assert_eq!(snapshot.piece_count, 2);
        assert_eq!(snapshot.focus_seconds, 1500);
        assert_eq!(snapshot.break_seconds, 300);
        assert_eq!(snapshot.progress_percent, 0);
        assert_eq!(snapshot.tasks, vec!["Chapter 3", "Review"]);
        assert!(store.contains("plan-1"));
    }

    #[test]
    fn full_session_fires_each_hook_once_and_emits_completion() {
        let store = Arc::new(InMemorySessionStateStore::default());
        let hooks = Arc::new(RecordingHooks::default());
        let mut engine = open_engine(&store, &hooks);
        let base = Instant::now();
        engine.start(base).expect("start");

        let mut cursor = base;
        let mut completions = 0;
        for _ in 0..4_000 {
            cursor += Duration::from_secs(1);
            engine.tick(cursor);
            if engine.completion_event().is_some() {
                completions += 1;
                break;
            }
        }

        assert_eq!(completions, 1);
        let kinds = hooks.fired().into_iter().map(|(_, kind)| kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                TransitionKind::FocusToBreak,
                TransitionKind::BreakToFocus,
                TransitionKind::Completed
            ]
        );
        let event = engine.completion_event().expect("completion event");
        assert_eq!(event.plan_id, "plan-1");
        assert_eq!(event.completed_at, fixed_time("2026-02-16T10:00:00Z"));
        assert_eq!(engine.snapshot().progress_percent, 100);

        // Further ticks never fire again.
        engine.tick(cursor + Duration::from_secs(600));
        assert_eq!(hooks.fired().len(), 3);
    }

    #[test]
    fn reopening_resumes_paused_from_last_written_state() {
        let store = Arc::new(InMemorySessionStateStore::default());
        let hooks = Arc::new(RecordingHooks::default());
        let base = Instant::now();
        {
            let mut engine = open_engine(&store, &hooks);
            engine.start(base).expect("start");
            engine.tick(base + Duration::from_secs(700));
            assert_eq!(engine.state().remaining_seconds, 800);
        }

        let engine = open_engine(&store, &hooks);
        let state = engine.state();
        assert_eq!(state.mode, SessionMode::Focus);
        assert_eq!(state.remaining_seconds, 800);
        assert_eq!(state.current_piece_index, 1);
        assert!(!state.is_running);
        assert!(!engine.leave_guard_active());
    }

    #[test]
    fn corrupt_record_reenters_setup() {
        let store = Arc::new(InMemorySessionStateStore::default());
        store.insert_raw("plan-1", "{\"version\":1,").expect("insert");
        let hooks = Arc::new(RecordingHooks::default());
        let engine = open_engine(&store, &hooks);
        assert_eq!(engine.state().mode, SessionMode::Setup);
    }

    #[test]
    fn unreadable_store_reenters_setup() {
        let dir = tempfile::tempdir().expect("temp dir");
        // No schema: every query fails with "no such table".
        let store = Arc::new(SqliteSessionStateStore::new(dir.path().join("blank.sqlite")));
        assert!(store.load("plan-1").is_err());

        let mut engine = SessionEngine::open(sample_plan(), PiecePlanner::default(), store)
            .expect("open despite store failure");
        assert_eq!(engine.state().mode, SessionMode::Setup);
        assert_eq!(engine.state().config.focus_seconds, 1500);

        let base = Instant::now();
        engine.start(base).expect("start");
        engine.tick(base + Duration::from_secs(3));
        assert_eq!(engine.state().remaining_seconds, 1497);
    }

    #[test]
    fn setup_overrides_and_piece_count() {
        let store = Arc::new(InMemorySessionStateStore::default());
        let hooks = Arc::new(RecordingHooks::default());
        let planner = PiecePlanner::new(PlannerSettings {
            max_focus_minutes: 90,
            ..PlannerSettings::default()
        });
        let mut engine = SessionEngine::open(sample_plan(), planner, Arc::clone(&store))
            .expect("open")
            .with_hooks(Arc::clone(&hooks) as Arc<dyn SessionHooks>);

        engine.configure_pieces(3).expect("three pieces");
        assert_eq!(engine.state().config.piece_count, 3);
        // 60 minutes over 18 units: 16.67 rounds to 17.
        assert_eq!(engine.state().config.focus_seconds, 17 * 60);

        engine.set_durations(Some(500), Some(0)).expect("override");
        assert_eq!(engine.state().config.focus_seconds, 90 * 60);
        assert_eq!(engine.state().config.break_seconds, 60);
        assert_eq!(engine.state().config.piece_count, 3);

        engine.start(Instant::now()).expect("start");
        assert!(matches!(
            engine.configure_pieces(1),
            Err(InfraError::InvalidState(_))
        ));
    }

    #[test]
    fn suspend_keeps_record_and_abandon_clears_it() {
        let store = Arc::new(InMemorySessionStateStore::default());
        let hooks = Arc::new(RecordingHooks::default());
        let base = Instant::now();
        let mut engine = open_engine(&store, &hooks);
        engine.start(base).expect("start");
        engine.tick(base + Duration::from_secs(5));
        assert!(engine.leave_guard_active());

        engine.suspend();
        assert!(!engine.state().is_running);
        let stored = store.load("plan-1").expect("load").expect("record kept");
        assert_eq!(stored.remaining_seconds, 1495);
        // Already paused: nothing left to pause, the record is written again.
        engine.suspend();
        assert_eq!(engine.state().remaining_seconds, 1495);

        engine.abandon().expect("abandon");
        assert_eq!(engine.state().mode, SessionMode::Idle);
        assert!(!store.contains("plan-1"));
    }

    #[test]
    fn reset_piece_pauses_and_persists() {
        let store = Arc::new(InMemorySessionStateStore::default());
        let hooks = Arc::new(RecordingHooks::default());
        let base = Instant::now();
        let mut engine = open_engine(&store, &hooks);
        engine.start(base).expect("start");
        engine.tick(base + Duration::from_secs(90));
        engine.reset_piece().expect("reset");

        let stored = store.load("plan-1").expect("load").expect("record");
        assert_eq!(stored.remaining_seconds, 1500);
        assert!(!stored.is_running);
        assert!(engine.pause().is_ok());
    }
}
