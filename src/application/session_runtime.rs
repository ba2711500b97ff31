use crate::application::engine::{SessionEngine, SessionSnapshot};
use crate::application::timer::{timer_now, SessionTimer, TickControl};
use crate::domain::models::CompletionEvent;
use crate::domain::session::TransitionKind;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_store::SessionStateStore;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ticked(SessionSnapshot),
    Transitioned {
        kind: TransitionKind,
        snapshot: SessionSnapshot,
    },
    Completed(CompletionEvent),
}

/// The session currently on screen: its engine plus the one timer loop
/// driving it.
pub struct ActiveSession<S>
where
    S: SessionStateStore + 'static,
{
    engine: Arc<Mutex<SessionEngine<S>>>,
    timer: SessionTimer,
    events: UnboundedSender<SessionEvent>,
}

impl<S> ActiveSession<S>
where
    S: SessionStateStore + 'static,
{
    pub fn new(
        engine: SessionEngine<S>,
        tick_interval: Duration,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = unbounded_channel();
        let session = Self {
            engine: Arc::new(Mutex::new(engine)),
            timer: SessionTimer::new(tick_interval),
            events,
        };
        (session, receiver)
    }

    pub fn plan_id(&self) -> Result<String, InfraError> {
        Ok(self.lock()?.plan().id.clone())
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot, InfraError> {
        Ok(self.lock()?.snapshot())
    }

    pub fn completion_event(&self) -> Result<Option<CompletionEvent>, InfraError> {
        Ok(self.lock()?.completion_event())
    }

    pub fn timer_active(&self) -> bool {
        self.timer.is_active()
    }

    pub fn configure_pieces(&self, piece_count: u32) -> Result<SessionSnapshot, InfraError> {
        let mut engine = self.lock()?;
        engine.configure_pieces(piece_count)?;
        Ok(engine.snapshot())
    }

    pub fn set_durations(
        &self,
        focus_minutes: Option<u32>,
        break_minutes: Option<u32>,
    ) -> Result<SessionSnapshot, InfraError> {
        let mut engine = self.lock()?;
        engine.set_durations(focus_minutes, break_minutes)?;
        Ok(engine.snapshot())
    }

    pub fn start(&mut self) -> Result<SessionSnapshot, InfraError> {
        let snapshot = {
            let mut engine = self.lock()?;
            engine.start(timer_now())?;
            engine.snapshot()
        };
        self.arm();
        Ok(snapshot)
    }

    pub fn pause(&mut self) -> Result<SessionSnapshot, InfraError> {
        self.timer.stop();
        let mut engine = self.lock()?;
        engine.pause()?;
        Ok(engine.snapshot())
    }

    pub fn resume(&mut self) -> Result<SessionSnapshot, InfraError> {
        let snapshot = {
            let mut engine = self.lock()?;
            engine.resume(timer_now())?;
            engine.snapshot()
        };
        self.arm();
        Ok(snapshot)
    }

    pub fn reset_piece(&mut self) -> Result<SessionSnapshot, InfraError> {
        self.timer.stop();
        let mut engine = self.lock()?;
        engine.reset_piece()?;
        Ok(engine.snapshot())
    }

    /// Save & exit.
    pub fn leave(mut self) -> Result<SessionSnapshot, InfraError> {
        self.timer.stop();
        let mut engine = self.lock()?;
        engine.suspend();
        Ok(engine.snapshot())
    }

    /// Discard & exit.
    pub fn abandon(mut self) -> Result<(), InfraError> {
        self.timer.stop();
        let mut engine = self.lock()?;
        engine.abandon()
    }

    /// Tears the loop down without writing anything, for sessions whose
    /// record has already been handed off.
    pub fn close(mut self) {
        self.timer.stop();
    }

    fn arm(&mut self) {
        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        self.timer.start(move |now| {
            let Ok(mut engine) = engine.lock() else {
                return TickControl::Stop;
            };
            let outcome = engine.tick(now);
            if outcome.changed() {
                let snapshot = engine.snapshot();
                let event = match outcome.transition {
                    Some(kind) => SessionEvent::Transitioned { kind, snapshot },
                    None => SessionEvent::Ticked(snapshot),
                };
                let _ = events.send(event);
            }

            if outcome.transition == Some(TransitionKind::Completed) {
                if let Some(completion) = engine.completion_event() {
                    let _ = events.send(SessionEvent::Completed(completion));
                }
                return TickControl::Stop;
            }
            if !engine.state().is_running {
                debug!(plan_id = %engine.plan().id, "timer loop finished");
                return TickControl::Stop;
            }
            TickControl::Continue
        });
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionEngine<S>>, InfraError> {
        self.engine
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("session lock poisoned: {error}")))
    }
}
