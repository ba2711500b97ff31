use crate::domain::models::{SessionMode, SessionState};

/// Whole-session completion in percent.
///
/// Setup and idle report 0 and a completed session reports 100; focus and
/// break pieces are measured against `piece_count * (focus + break)`.
pub fn global_progress(state: &SessionState) -> u8 {
    let config = &state.config;
    let within_piece = match state.mode {
        SessionMode::Idle | SessionMode::Setup => return 0,
        SessionMode::Completed => return 100,
        SessionMode::Focus => {
            u64::from(config.focus_seconds.saturating_sub(state.remaining_seconds))
        }
        SessionMode::Break => {
            u64::from(config.focus_seconds)
                + u64::from(config.break_seconds.saturating_sub(state.remaining_seconds))
        }
    };

    let total = config.total_seconds();
    if total == 0 {
        return 0;
    }
    let finished_pieces = u64::from(state.current_piece_index.saturating_sub(1));
    let elapsed = finished_pieces * config.cycle_seconds() + within_piece;
    let percent = (elapsed as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionConfig;
    use proptest::prelude::*;

    fn config() -> SessionConfig {
        SessionConfig {
            piece_count: 2,
            focus_seconds: 1500,
            break_seconds: 300,
        }
    }

    fn state(mode: SessionMode, index: u32, remaining: u32) -> SessionState {
        SessionState {
            mode,
            remaining_seconds: remaining,
            current_piece_index: index,
            is_running: mode.is_piece(),
            config: config(),
            completed_at: None,
        }
    }

    #[test]
    fn progress_at_piece_boundaries() {
        assert_eq!(global_progress(&state(SessionMode::Focus, 1, 1500)), 0);
        // 1500 of 3600
        assert_eq!(global_progress(&state(SessionMode::Break, 1, 300)), 42);
        // 1800 of 3600
        assert_eq!(global_progress(&state(SessionMode::Focus, 2, 1500)), 50);
        // 3300 of 3600
        assert_eq!(global_progress(&state(SessionMode::Focus, 2, 0)), 92);
    }

    #[test]
    fn setup_and_completed_are_fixed() {
        assert_eq!(global_progress(&SessionState::setup(config())), 0);
        assert_eq!(global_progress(&SessionState::idle()), 0);
        let mut done = state(SessionMode::Completed, 2, 0);
        done.is_running = false;
        assert_eq!(global_progress(&done), 100);
    }

    proptest! {
        #[test]
        fn progress_is_bounded_and_pure(
            piece_count in 1u32..=10u32,
            focus_minutes in 1u32..120u32,
            break_minutes in 1u32..30u32,
            index_seed in 0u32..10u32,
            remaining_seed in 0u32..u32::MAX,
            in_break in any::<bool>()
        ) {
            let config = SessionConfig {
                piece_count,
                focus_seconds: focus_minutes * 60,
                break_seconds: break_minutes * 60,
            };
            let mode = if in_break { SessionMode::Break } else { SessionMode::Focus };
            let full = config.piece_seconds(mode).expect("piece mode");
            let snapshot = SessionState {
                mode,
                remaining_seconds: remaining_seed % (full + 1),
                current_piece_index: index_seed % piece_count + 1,
                is_running: true,
                config,
                completed_at: None,
            };

            let first = global_progress(&snapshot);
            prop_assert!(first <= 100);
            prop_assert_eq!(first, global_progress(&snapshot));
        }
    }
}
