use crate::domain::clock::DriftClock;
use crate::domain::models::{SessionConfig, SessionMode, SessionState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    FocusToBreak,
    BreakToFocus,
    Completed,
}

impl TransitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FocusToBreak => "focus_to_break",
            Self::BreakToFocus => "break_to_focus",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub elapsed_seconds: u32,
    pub transition: Option<TransitionKind>,
}

impl TickOutcome {
    pub fn changed(&self) -> bool {
        self.elapsed_seconds > 0 || self.transition.is_some()
    }
}

/// In-memory owner of one plan's [`SessionState`]. Performs no I/O; callers
/// persist and fire hooks based on the returned outcomes.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    clock: DriftClock,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::idle()
    }
}

impl SessionMachine {
    pub fn idle() -> Self {
        Self {
            state: SessionState::idle(),
            clock: DriftClock::default(),
        }
    }

    /// Rebuilds a machine from a persisted record. The session always comes
    /// back paused.
    pub fn restore(mut state: SessionState) -> Result<Self, String> {
        state.validate()?;
        if state.mode == SessionMode::Idle {
            return Err("idle sessions are never persisted".to_string());
        }
        state.is_running = false;
        Ok(Self {
            state,
            clock: DriftClock::default(),
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> SessionMode {
        self.state.mode
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    /// True while leaving would lose a running countdown.
    pub fn leave_guard_active(&self) -> bool {
        self.state.is_running && self.state.remaining_seconds > 0
    }

    pub fn select(&mut self, config: SessionConfig) -> Result<(), String> {
        if self.state.mode != SessionMode::Idle {
            return Err(format!(
                "cannot select a plan from {} mode",
                self.state.mode.as_str()
            ));
        }
        config.validate()?;
        self.state = SessionState::setup(config);
        Ok(())
    }

    pub fn configure(&mut self, config: SessionConfig) -> Result<(), String> {
        if self.state.mode != SessionMode::Setup {
            return Err("session configuration is fixed once started".to_string());
        }
        config.validate()?;
        self.state.config = config;
        Ok(())
    }

    pub fn start(&mut self, now: Instant) -> Result<(), String> {
        if self.state.mode != SessionMode::Setup {
            return Err(format!(
                "cannot start a session from {} mode",
                self.state.mode.as_str()
            ));
        }
        self.state.mode = SessionMode::Focus;
        self.state.remaining_seconds = self.state.config.focus_seconds;
        self.state.current_piece_index = 1;
        self.state.is_running = true;
        self.clock.resume(now);
        Ok(())
    }

    /// Returns whether anything changed.
    pub fn pause(&mut self) -> Result<bool, String> {
        self.ensure_piece("pause")?;
        if !self.state.is_running {
            return Ok(false);
        }
        self.state.is_running = false;
        self.clock.stop();
        Ok(true)
    }

    /// Returns whether anything changed. A piece resumed at zero transitions
    /// on the next tick.
    pub fn resume(&mut self, now: Instant) -> Result<bool, String> {
        self.ensure_piece("resume")?;
        if self.state.is_running {
            return Ok(false);
        }
        self.state.is_running = true;
        self.clock.resume(now);
        Ok(true)
    }

    /// Restores the current piece to its full length and pauses. Mode and
    /// piece index are untouched.
    pub fn reset_piece(&mut self) -> Result<(), String> {
        self.ensure_piece("reset")?;
        let Some(full) = self.state.config.piece_seconds(self.state.mode) else {
            return Err("current mode has no piece duration".to_string());
        };
        self.state.remaining_seconds = full;
        self.state.is_running = false;
        self.clock.stop();
        Ok(())
    }

    pub fn abandon(&mut self) {
        self.clock.stop();
        self.state = SessionState::idle();
    }

    pub fn tick(&mut self, now: Instant, wall_clock: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if !self.state.is_running || !self.state.mode.is_piece() {
            return outcome;
        }

        if self.state.remaining_seconds > 0 {
            let elapsed = self.clock.sample(now);
            if elapsed == 0 {
                return outcome;
            }
            let applied = elapsed.min(self.state.remaining_seconds);
            self.state.remaining_seconds -= applied;
            outcome.elapsed_seconds = applied;
            if self.state.remaining_seconds > 0 {
                return outcome;
            }
        }

        outcome.transition = self.advance(wall_clock);
        outcome
    }

    fn advance(&mut self, wall_clock: DateTime<Utc>) -> Option<TransitionKind> {
        let config = self.state.config;
        match self.state.mode {
            SessionMode::Focus if self.state.current_piece_index < config.piece_count => {
                self.state.mode = SessionMode::Break;
                self.state.remaining_seconds = config.break_seconds;
                Some(TransitionKind::FocusToBreak)
            }
            SessionMode::Focus => {
                self.state.mode = SessionMode::Completed;
                self.state.remaining_seconds = 0;
                self.state.current_piece_index = config.piece_count;
                self.state.is_running = false;
                self.state.completed_at = Some(wall_clock);
                self.clock.stop();
                Some(TransitionKind::Completed)
            }
            SessionMode::Break => {
                self.state.mode = SessionMode::Focus;
                self.state.current_piece_index =
                    (self.state.current_piece_index + 1).min(config.piece_count);
                self.state.remaining_seconds = config.focus_seconds;
                Some(TransitionKind::BreakToFocus)
            }
            SessionMode::Idle | SessionMode::Setup | SessionMode::Completed => None,
        }
    }

    fn ensure_piece(&self, action: &str) -> Result<(), String> {
        if self.state.mode.is_piece() {
            return Ok(());
        }
        Err(format!(
            "cannot {action} in {} mode",
            self.state.mode.as_str()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn config(piece_count: u32) -> SessionConfig {
        SessionConfig {
            piece_count,
            focus_seconds: 1500,
            break_seconds: 300,
        }
    }

    fn wall() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T10:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn started(piece_count: u32, base: Instant) -> SessionMachine {
        let mut machine = SessionMachine::idle();
        machine.select(config(piece_count)).expect("select");
        machine.start(base).expect("start");
        machine
    }

    #[test]
    fn start_initializes_first_focus_piece() {
        let base = Instant::now();
        let machine = started(2, base);
        let state = machine.state();
        assert_eq!(state.mode, SessionMode::Focus);
        assert_eq!(state.remaining_seconds, 1500);
        assert_eq!(state.current_piece_index, 1);
        assert!(state.is_running);
        assert!(machine.leave_guard_active());
    }

    #[test]
    fn two_pieces_run_focus_break_focus_completed() {
        let base = Instant::now();
        let mut machine = started(2, base);
        let mut cursor = base;
        let mut modes = vec![machine.mode()];
        let mut transitions = Vec::new();

        for _ in 0..3 {
            let full = machine
                .state()
                .config
                .piece_seconds(machine.mode())
                .expect("piece mode");
            cursor += Duration::from_secs(u64::from(full));
            let outcome = machine.tick(cursor, wall());
            transitions.push(outcome.transition.expect("transition at zero"));
            modes.push(machine.mode());
        }

        assert_eq!(
            modes,
            vec![
                SessionMode::Focus,
                SessionMode::Break,
                SessionMode::Focus,
                SessionMode::Completed
            ]
        );
        assert_eq!(
            transitions,
            vec![
                TransitionKind::FocusToBreak,
                TransitionKind::BreakToFocus,
                TransitionKind::Completed
            ]
        );
        let state = machine.state();
        assert!(!state.is_running);
        assert_eq!(state.current_piece_index, 2);
        assert_eq!(state.completed_at, Some(wall()));
        assert!(state.validate().is_ok());
    }

    #[test]
    fn delayed_tick_decrements_by_elapsed_seconds() {
        let base = Instant::now();
        let mut machine = started(2, base);
        let outcome = machine.tick(base + Duration::from_millis(7_450), wall());
        assert_eq!(outcome.elapsed_seconds, 7);
        assert_eq!(outcome.transition, None);
        assert_eq!(machine.state().remaining_seconds, 1493);
    }

    #[test]
    fn overshoot_is_floored_at_zero_and_transitions_once() {
        let base = Instant::now();
        let mut machine = started(1, base);
        let outcome = machine.tick(base + Duration::from_secs(10_000), wall());
        assert_eq!(outcome.elapsed_seconds, 1500);
        assert_eq!(outcome.transition, Some(TransitionKind::Completed));

        let again = machine.tick(base + Duration::from_secs(20_000), wall());
        assert_eq!(again, TickOutcome::default());
    }

    #[test]
    fn paused_time_is_not_counted() {
        let base = Instant::now();
        let mut machine = started(2, base);
        machine.tick(base + Duration::from_secs(100), wall());
        assert!(machine.pause().expect("pause"));
        assert!(!machine.pause().expect("second pause is a no-op"));
        assert!(!machine.leave_guard_active());

        let outcome = machine.tick(base + Duration::from_secs(500), wall());
        assert!(!outcome.changed());

        assert!(machine.resume(base + Duration::from_secs(900)).expect("resume"));
        machine.tick(base + Duration::from_secs(905), wall());
        assert_eq!(machine.state().remaining_seconds, 1395);
    }

    #[test]
    fn reset_piece_restores_duration_and_pauses() {
        let base = Instant::now();
        let mut machine = started(2, base);
        machine.tick(base + Duration::from_secs(1500), wall());
        assert_eq!(machine.mode(), SessionMode::Break);
        machine.tick(base + Duration::from_secs(1600), wall());
        assert_eq!(machine.state().remaining_seconds, 200);

        machine.reset_piece().expect("reset");
        let state = machine.state();
        assert_eq!(state.mode, SessionMode::Break);
        assert_eq!(state.remaining_seconds, 300);
        assert_eq!(state.current_piece_index, 1);
        assert!(!state.is_running);
    }

    #[test]
    fn configuration_is_fixed_after_start() {
        let base = Instant::now();
        let mut machine = SessionMachine::idle();
        machine.select(config(2)).expect("select");
        machine.configure(config(4)).expect("configure in setup");
        assert_eq!(machine.state().config.piece_count, 4);
        machine.start(base).expect("start");
        assert!(machine.configure(config(1)).is_err());
        assert!(machine.start(base).is_err());
    }

    #[test]
    fn actions_outside_pieces_are_rejected() {
        let mut machine = SessionMachine::idle();
        assert!(machine.pause().is_err());
        assert!(machine.resume(Instant::now()).is_err());
        assert!(machine.reset_piece().is_err());
        assert!(machine.select(SessionConfig { piece_count: 0, ..config(1) }).is_err());
    }

    #[test]
    fn abandon_returns_to_idle_from_any_mode() {
        let base = Instant::now();
        let mut machine = started(1, base);
        machine.tick(base + Duration::from_secs(1500), wall());
        assert_eq!(machine.mode(), SessionMode::Completed);
        machine.abandon();
        assert_eq!(machine.mode(), SessionMode::Idle);
        assert!(machine.select(config(1)).is_ok());
    }

    #[test]
    fn restore_comes_back_paused() {
        let state = SessionState {
            mode: SessionMode::Focus,
            remaining_seconds: 800,
            current_piece_index: 1,
            is_running: true,
            config: config(2),
            completed_at: None,
        };
        let machine = SessionMachine::restore(state).expect("restore");
        assert_eq!(machine.state().remaining_seconds, 800);
        assert!(!machine.is_running());
        assert!(SessionMachine::restore(SessionState::idle()).is_err());
    }

    #[test]
    fn resume_at_zero_transitions_on_next_tick() {
        let state = SessionState {
            mode: SessionMode::Focus,
            remaining_seconds: 0,
            current_piece_index: 1,
            is_running: false,
            config: config(2),
            completed_at: None,
        };
        let base = Instant::now();
        let mut machine = SessionMachine::restore(state).expect("restore");
        machine.resume(base).expect("resume");
        let outcome = machine.tick(base, wall());
        assert_eq!(outcome.transition, Some(TransitionKind::FocusToBreak));
        assert_eq!(machine.state().remaining_seconds, 300);
    }

    proptest! {
        #[test]
        fn random_tick_sequences_keep_invariants(
            piece_count in 1u32..=4u32,
            steps in proptest::collection::vec(0u64..2_000_000u64, 1..60)
        ) {
            let base = Instant::now();
            let mut machine = SessionMachine::idle();
            machine.select(SessionConfig {
                piece_count,
                focus_seconds: 120,
                break_seconds: 60,
            }).expect("select");
            machine.start(base).expect("start");

            let mut elapsed_ms = 0u64;
            let mut completions = 0;
            for step in steps {
                elapsed_ms += step;
                let before = machine.mode();
                let outcome = machine.tick(base + Duration::from_millis(elapsed_ms), wall());
                match (before, outcome.transition) {
                    (SessionMode::Focus, Some(TransitionKind::FocusToBreak)) => {
                        prop_assert!(machine.state().current_piece_index < piece_count);
                    }
                    (SessionMode::Focus, Some(TransitionKind::Completed)) => {
                        completions += 1;
                        prop_assert_eq!(machine.state().current_piece_index, piece_count);
                    }
                    (SessionMode::Break, Some(TransitionKind::BreakToFocus)) | (_, None) => {}
                    (mode, Some(kind)) => {
                        prop_assert!(false, "unexpected {:?} from {:?}", kind, mode);
                    }
                }

                let state = machine.state();
                prop_assert!(state.current_piece_index >= 1);
                prop_assert!(state.current_piece_index <= piece_count);
                prop_assert!(state.validate().is_ok());
                if state.mode == SessionMode::Completed {
                    prop_assert!(!state.is_running);
                }
            }
            prop_assert!(completions <= 1);
        }
    }
}
