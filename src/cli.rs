use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::commands::{
    abandon_session_impl, add_plan_impl, complete_handoff_impl, configure_pieces_impl,
    get_session_state_impl, leave_session_impl, list_available_plans_impl, open_session_impl,
    resume_session_impl, set_log_key_impl, set_piece_durations_impl, start_session_impl,
    take_session_events_impl, AddPlanInput, AppState,
};
use crate::application::engine::SessionSnapshot;
use crate::application::session_runtime::SessionEvent;
use crate::domain::models::{format_clock, SessionMode};
use crate::domain::session::TransitionKind;

#[derive(Debug, Parser)]
#[command(name = "studyroom", about = "Adaptive multi-piece study session timer")]
pub struct Cli {
    /// Workspace holding config/, state/ and logs/
    #[arg(short, long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List today's (or the given day's) plans that are not logged yet
    Plans {
        /// Day to list, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },

    /// Create or replace a study plan
    AddPlan {
        #[arg(long)]
        id: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// HH:MM
        #[arg(long)]
        start: String,
        /// HH:MM
        #[arg(long)]
        end: String,
        #[arg(long)]
        section: String,
        /// One task per line
        #[arg(long)]
        tasks: Option<String>,
    },

    /// Run (or resume) the session for a plan until it completes or you leave
    Run {
        #[arg(long)]
        plan: String,
        /// Number of focus/break pieces
        #[arg(long)]
        pieces: Option<u32>,
        /// Override the computed focus length
        #[arg(long)]
        focus_minutes: Option<u32>,
        /// Override the computed break length
        #[arg(long)]
        break_minutes: Option<u32>,
    },

    /// Show the stored session for a plan
    Status {
        #[arg(long)]
        plan: String,
    },

    /// Discard the stored session for a plan
    Abandon {
        #[arg(long)]
        plan: String,
    },

    /// Retry sending a completed session to the daily log
    Handoff {
        #[arg(long)]
        plan: String,
    },

    /// Save the API key used by the remote daily log
    SetLogKey { key: String },
}

impl Cli {
    pub fn logs_dir(&self) -> PathBuf {
        self.workspace.join("logs")
    }

    pub async fn run(self) -> Result<()> {
        let state = AppState::new(self.workspace.clone()).with_context(|| {
            format!("failed to open workspace {}", self.workspace.display())
        })?;

        match self.command {
            Commands::Plans { date } => list_plans(&state, date).await,
            Commands::AddPlan {
                id,
                date,
                start,
                end,
                section,
                tasks,
            } => {
                let plan = add_plan_impl(
                    &state,
                    AddPlanInput {
                        id,
                        date,
                        start_time: start,
                        end_time: end,
                        section,
                        tasks_text: tasks,
                    },
                )
                .map_err(|error| anyhow::anyhow!(state.command_error("add_plan", &error)))?;
                println!(
                    "saved {} on {} ({}-{})",
                    plan.id,
                    plan.date,
                    plan.start_time.format("%H:%M"),
                    plan.end_time.format("%H:%M")
                );
                Ok(())
            }
            Commands::Run {
                plan,
                pieces,
                focus_minutes,
                break_minutes,
            } => run_session(&state, plan, pieces, focus_minutes, break_minutes).await,
            Commands::Status { plan } => {
                let snapshot = get_session_state_impl(&state, Some(plan))
                    .map_err(|error| anyhow::anyhow!(state.command_error("status", &error)))?;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                Ok(())
            }
            Commands::Abandon { plan } => {
                let existed = abandon_session_impl(&state, plan.clone())
                    .map_err(|error| anyhow::anyhow!(state.command_error("abandon", &error)))?;
                if existed {
                    println!("discarded session for {plan}");
                } else {
                    println!("no stored session for {plan}");
                }
                Ok(())
            }
            Commands::Handoff { plan } => hand_off(&state, plan).await,
            Commands::SetLogKey { key } => {
                set_log_key_impl(&state, key)
                    .map_err(|error| anyhow::anyhow!(state.command_error("set_log_key", &error)))?;
                println!("log store key saved");
                Ok(())
            }
        }
    }
}

async fn list_plans(state: &AppState, date: Option<String>) -> Result<()> {
    let plans = list_available_plans_impl(state, date)
        .await
        .map_err(|error| anyhow::anyhow!(state.command_error("plans", &error)))?;
    if plans.is_empty() {
        println!("no open plans");
        return Ok(());
    }
    for plan in plans {
        let marker = if plan.is_past { " (past)" } else { "" };
        println!(
            "{:<16} {}-{} {:>4}m  {}{}",
            plan.id, plan.start_time, plan.end_time, plan.duration_minutes, plan.section, marker
        );
        for task in plan.tasks {
            println!("{:<16} - {}", "", task);
        }
    }
    Ok(())
}

async fn run_session(
    state: &AppState,
    plan_id: String,
    pieces: Option<u32>,
    focus_minutes: Option<u32>,
    break_minutes: Option<u32>,
) -> Result<()> {
    let opened = open_session_impl(state, plan_id.clone())
        .map_err(|error| anyhow::anyhow!(state.command_error("open_session", &error)))?;
    let overrides_given = pieces.is_some() || focus_minutes.is_some() || break_minutes.is_some();

    let started = match opened.mode {
        SessionMode::Setup => {
            if let Some(pieces) = pieces {
                configure_pieces_impl(state, pieces)?;
            }
            if focus_minutes.is_some() || break_minutes.is_some() {
                set_piece_durations_impl(state, focus_minutes, break_minutes)?;
            }
            start_session_impl(state)?
        }
        SessionMode::Focus | SessionMode::Break => {
            if overrides_given {
                eprintln!("session already started; piece settings are unchanged");
            }
            resume_session_impl(state)?
        }
        SessionMode::Completed => {
            println!("session already completed");
            return hand_off(state, plan_id).await;
        }
        SessionMode::Idle => bail!("session for {plan_id} could not be opened"),
    };
    print_header(&started);

    let mut events = take_session_events_impl(state)?.context("session events already taken")?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Ticked(snapshot)) => render_countdown(&snapshot),
                Some(SessionEvent::Transitioned { kind, snapshot }) => {
                    println!();
                    println!("{}", describe_transition(kind, &snapshot));
                }
                Some(SessionEvent::Completed(_)) => {
                    return hand_off(state, plan_id).await;
                }
                None => return Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                let snapshot = get_session_state_impl(state, None)?;
                let leave = if snapshot.leave_guard_active {
                    eprint!("\nLeave this session? Progress is kept and the timer pauses. [y/N] ");
                    let answer = stdin.next_line().await?.unwrap_or_default();
                    answer.trim().eq_ignore_ascii_case("y")
                } else {
                    true
                };
                if leave {
                    if let Some(left) = leave_session_impl(state)? {
                        println!(
                            "\nsaved {} at piece {}/{} with {} left",
                            left.plan_id,
                            left.current_piece_index,
                            left.piece_count,
                            left.remaining_display
                        );
                    }
                    return Ok(());
                }
            }
        }
    }
}

async fn hand_off(state: &AppState, plan_id: String) -> Result<()> {
    match complete_handoff_impl(state, Some(plan_id.clone())).await {
        Ok(response) => {
            println!("logged {} as {} for {}", response.plan_id, response.status.as_str(), response.date);
            Ok(())
        }
        Err(error) => {
            let message = state.command_error("handoff", &error);
            eprintln!("could not reach the daily log: {message}");
            eprintln!("the completed session is kept; retry with `studyroom handoff --plan {plan_id}`");
            Ok(())
        }
    }
}

fn print_header(snapshot: &SessionSnapshot) {
    println!(
        "{}: {} pieces of {} focus / {} break",
        snapshot.section,
        snapshot.piece_count,
        format_clock(snapshot.focus_seconds),
        format_clock(snapshot.break_seconds)
    );
    for task in &snapshot.tasks {
        println!("  - {task}");
    }
    render_countdown(snapshot);
}

fn render_countdown(snapshot: &SessionSnapshot) {
    print!(
        "\r[{} {}/{}] {:>8}  {:>3}%   ",
        snapshot.mode.as_str(),
        snapshot.current_piece_index,
        snapshot.piece_count,
        snapshot.remaining_display,
        snapshot.progress_percent
    );
    let _ = std::io::stdout().flush();
}

fn describe_transition(kind: TransitionKind, snapshot: &SessionSnapshot) -> String {
    match kind {
        TransitionKind::FocusToBreak => format!(
            "piece {} focus done, break for {}",
            snapshot.current_piece_index, snapshot.remaining_display
        ),
        TransitionKind::BreakToFocus => format!(
            "break over, piece {}/{} focus",
            snapshot.current_piece_index, snapshot.piece_count
        ),
        TransitionKind::Completed => "session complete".to_string(),
    }
}
