use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_PIECE_SECONDS: u32 = 60;

/// A scheduled study block as read from the plan store. Immutable once a
/// session for it has started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPlan {
    pub id: String,
    pub owner_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub section: String,
    pub tasks_text: String,
}

impl SessionPlan {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "plan.id")?;
        validate_non_empty(&self.owner_id, "plan.owner_id")?;
        validate_non_empty(&self.section, "plan.section")?;
        if self.end_time <= self.start_time {
            return Err("plan.end_time must be after plan.start_time".to_string());
        }
        Ok(())
    }

    /// Whole minutes between start and end. Negative when the plan is
    /// inverted; callers decide how to degrade.
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn tasks(&self) -> Vec<&str> {
        self.tasks_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Compared at minute precision: a plan ending 10:00 is past from 10:01.
    pub fn is_past_at(&self, local_time: NaiveTime) -> bool {
        let minute = NaiveTime::from_hms_opt(local_time.hour(), local_time.minute(), 0)
            .unwrap_or(local_time);
        self.end_time < minute
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub piece_count: u32,
    pub focus_seconds: u32,
    pub break_seconds: u32,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.piece_count == 0 {
            return Err("config.piece_count must be >= 1".to_string());
        }
        if self.focus_seconds < MIN_PIECE_SECONDS {
            return Err(format!("config.focus_seconds must be >= {MIN_PIECE_SECONDS}"));
        }
        if self.break_seconds < MIN_PIECE_SECONDS {
            return Err(format!("config.break_seconds must be >= {MIN_PIECE_SECONDS}"));
        }
        Ok(())
    }

    pub fn cycle_seconds(&self) -> u64 {
        u64::from(self.focus_seconds) + u64::from(self.break_seconds)
    }

    pub fn total_seconds(&self) -> u64 {
        u64::from(self.piece_count) * self.cycle_seconds()
    }

    /// Full length of a piece in the given mode, or `None` outside focus/break.
    pub fn piece_seconds(&self, mode: SessionMode) -> Option<u32> {
        match mode {
            SessionMode::Focus => Some(self.focus_seconds),
            SessionMode::Break => Some(self.break_seconds),
            _ => None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            piece_count: 1,
            focus_seconds: MIN_PIECE_SECONDS,
            break_seconds: MIN_PIECE_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Idle,
    Setup,
    Focus,
    Break,
    Completed,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Setup => "setup",
            Self::Focus => "focus",
            Self::Break => "break",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "setup" => Some(Self::Setup),
            "focus" => Some(Self::Focus),
            "break" => Some(Self::Break),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_piece(self) -> bool {
        matches!(self, Self::Focus | Self::Break)
    }
}

/// The live record of one plan's session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    pub mode: SessionMode,
    pub remaining_seconds: u32,
    pub current_piece_index: u32,
    pub is_running: bool,
    pub config: SessionConfig,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn idle() -> Self {
        Self {
            mode: SessionMode::Idle,
            remaining_seconds: 0,
            current_piece_index: 1,
            is_running: false,
            config: SessionConfig::default(),
            completed_at: None,
        }
    }

    pub fn setup(config: SessionConfig) -> Self {
        Self {
            mode: SessionMode::Setup,
            config,
            ..Self::idle()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.config.validate()?;
        if self.current_piece_index == 0 || self.current_piece_index > self.config.piece_count {
            return Err(format!(
                "state.current_piece_index must be within 1..={}",
                self.config.piece_count
            ));
        }
        if let Some(full) = self.config.piece_seconds(self.mode) {
            if self.remaining_seconds > full {
                return Err(format!("state.remaining_seconds must be <= {full}"));
            }
        } else if self.is_running {
            return Err(format!("state.is_running must be false in {} mode", self.mode.as_str()));
        }
        if self.mode == SessionMode::Completed {
            if self.current_piece_index != self.config.piece_count {
                return Err("completed state must be on the last piece".to_string());
            }
            if self.remaining_seconds != 0 {
                return Err("completed state must have no remaining time".to_string());
            }
            if self.completed_at.is_none() {
                return Err("completed state must carry completed_at".to_string());
            }
        }
        Ok(())
    }
}

/// Emitted once when a session enters `completed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionEvent {
    pub plan_id: String,
    pub date: NaiveDate,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Done,
    Missed,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Missed => "missed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "done" => Ok(Self::Done),
            "missed" => Ok(Self::Missed),
            other => Err(format!("invalid log status: {other}")),
        }
    }
}

/// One row of the external daily log, keyed by `(plan_id, date)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyLogEntry {
    pub owner_id: String,
    pub plan_id: String,
    pub date: NaiveDate,
    pub status: LogStatus,
    pub checked_at: DateTime<Utc>,
}

impl DailyLogEntry {
    pub fn done(owner_id: &str, event: &CompletionEvent) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            plan_id: event.plan_id.clone(),
            date: event.date,
            status: LogStatus::Done,
            checked_at: event.completed_at,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.owner_id, "log.owner_id")?;
        validate_non_empty(&self.plan_id, "log.plan_id")
    }
}

/// Renders a countdown as `m:ss`, or `h:mm:ss` from one hour up.
pub fn format_clock(total_seconds: u32) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

pub fn parse_date(value: &str, field_name: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
