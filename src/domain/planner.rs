use crate::domain::models::{SessionConfig, SessionPlan, MIN_PIECE_SECONDS};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

const MIN_PIECE_MINUTES: i64 = (MIN_PIECE_SECONDS / 60) as i64;

/// Tunables for splitting a plan window into pieces. Each cycle is
/// `focus_units + break_units` equal time units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerSettings {
    pub focus_units: u32,
    pub break_units: u32,
    pub default_piece_count: u32,
    pub max_piece_count: u32,
    pub max_focus_minutes: u32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            focus_units: 5,
            break_units: 1,
            default_piece_count: 2,
            max_piece_count: 10,
            max_focus_minutes: 720,
        }
    }
}

impl PlannerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.focus_units == 0 {
            return Err("planner.focusUnits must be > 0".to_string());
        }
        if self.break_units == 0 {
            return Err("planner.breakUnits must be > 0".to_string());
        }
        if self.max_piece_count == 0 {
            return Err("planner.maxPieceCount must be > 0".to_string());
        }
        if self.default_piece_count == 0 || self.default_piece_count > self.max_piece_count {
            return Err(format!(
                "planner.defaultPieceCount must be within 1..={}",
                self.max_piece_count
            ));
        }
        if self.max_focus_minutes == 0 {
            return Err("planner.maxFocusMinutes must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PiecePlanner {
    settings: PlannerSettings,
}

impl PiecePlanner {
    pub fn new(settings: PlannerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn clamp_piece_count(&self, piece_count: u32) -> u32 {
        piece_count.clamp(1, self.settings.max_piece_count.max(1))
    }

    pub fn plan(&self, start: NaiveTime, end: NaiveTime, piece_count: u32) -> SessionConfig {
        self.plan_minutes((end - start).num_minutes(), piece_count)
    }

    /// Uses the configured default piece count when none was chosen.
    pub fn plan_for(&self, plan: &SessionPlan, piece_count: Option<u32>) -> SessionConfig {
        let piece_count = piece_count.unwrap_or(self.settings.default_piece_count);
        self.plan(plan.start_time, plan.end_time, piece_count)
    }

    /// Zero or negative totals degrade to one-minute pieces instead of failing.
    pub fn plan_minutes(&self, total_minutes: i64, piece_count: u32) -> SessionConfig {
        let piece_count = self.clamp_piece_count(piece_count);
        let focus_units = f64::from(self.settings.focus_units.max(1));
        let break_units = f64::from(self.settings.break_units.max(1));
        let units = (focus_units + break_units) * f64::from(piece_count);
        let unit = total_minutes as f64 / units;

        SessionConfig {
            piece_count,
            focus_seconds: minutes_to_seconds((unit * focus_units).round() as i64),
            break_seconds: minutes_to_seconds((unit * break_units).round() as i64),
        }
    }

    /// Manual override of the computed durations, returning a new value.
    pub fn with_durations(
        &self,
        config: SessionConfig,
        focus_minutes: Option<u32>,
        break_minutes: Option<u32>,
    ) -> SessionConfig {
        let focus_seconds = match focus_minutes {
            Some(minutes) => {
                minutes_to_seconds(i64::from(minutes.min(self.settings.max_focus_minutes.max(1))))
            }
            None => config.focus_seconds,
        };
        let break_seconds = match break_minutes {
            Some(minutes) => minutes_to_seconds(i64::from(minutes)),
            None => config.break_seconds,
        };
        SessionConfig {
            piece_count: config.piece_count,
            focus_seconds,
            break_seconds,
        }
    }
}

fn minutes_to_seconds(minutes: i64) -> u32 {
    let minutes = minutes.max(MIN_PIECE_MINUTES);
    u32::try_from(minutes)
        .unwrap_or(u32::MAX)
        .saturating_mul(60)
}
