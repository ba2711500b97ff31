use crate::domain::session::TransitionKind;
use std::io::Write;
use tracing::info;

/// A short tone played on a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cue {
    pub frequency_hz: u32,
    pub duration_ms: u64,
}

impl Cue {
    pub const PIECE_BOUNDARY: Cue = Cue {
        frequency_hz: 800,
        duration_ms: 400,
    };
    pub const SESSION_COMPLETE: Cue = Cue {
        frequency_hz: 1200,
        duration_ms: 1200,
    };

    pub fn for_transition(kind: TransitionKind) -> Self {
        match kind {
            TransitionKind::FocusToBreak | TransitionKind::BreakToFocus => Self::PIECE_BOUNDARY,
            TransitionKind::Completed => Self::SESSION_COMPLETE,
        }
    }
}

/// Side effects attached to state transitions. Invoked exactly once per
/// transition, after the new state has been persisted.
pub trait SessionHooks: Send + Sync {
    fn on_transition(&self, plan_id: &str, kind: TransitionKind);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {
    fn on_transition(&self, _plan_id: &str, _kind: TransitionKind) {}
}

/// Rings the terminal bell; the cue itself is only recorded in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalCueHooks;

impl SessionHooks for TerminalCueHooks {
    fn on_transition(&self, plan_id: &str, kind: TransitionKind) {
        let cue = Cue::for_transition(kind);
        info!(
            plan_id,
            transition = kind.as_str(),
            frequency_hz = cue.frequency_hz,
            duration_ms = cue.duration_ms,
            "playing transition cue"
        );
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingHooks {
        fired: Mutex<Vec<(String, TransitionKind)>>,
    }

    impl RecordingHooks {
        pub fn fired(&self) -> Vec<(String, TransitionKind)> {
            self.fired.lock().expect("hooks lock").clone()
        }
    }

    impl SessionHooks for RecordingHooks {
        fn on_transition(&self, plan_id: &str, kind: TransitionKind) {
            self.fired
                .lock()
                .expect("hooks lock")
                .push((plan_id.to_string(), kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cues_follow_transition_kind() {
        assert_eq!(Cue::for_transition(TransitionKind::FocusToBreak), Cue::PIECE_BOUNDARY);
        assert_eq!(Cue::for_transition(TransitionKind::BreakToFocus).frequency_hz, 800);
        let done = Cue::for_transition(TransitionKind::Completed);
        assert_eq!(done.frequency_hz, 1200);
        assert_eq!(done.duration_ms, 1200);
    }
}
