use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// A single owned polling loop. The loop only samples the clock; deciding
/// whether whole seconds elapsed is up to the callback.
#[derive(Debug)]
pub struct SessionTimer {
    period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl SessionTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            handle: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Replaces any running loop. Must be called inside a tokio runtime.
    pub fn start<F>(&mut self, mut on_tick: F)
    where
        F: FnMut(Instant) -> TickControl + Send + 'static,
    {
        self.stop();
        let period = self.period;
        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let now = tokio::time::Instant::now().into_std();
                if on_tick(now) == TickControl::Stop {
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The instant the timer loop would observe right now.
pub fn timer_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn timer_polls_until_stopped() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let mut timer = SessionTimer::new(Duration::from_millis(100));
        timer.start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        });
        assert!(timer.is_active());

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 10);

        timer.stop();
        assert!(!timer.is_active());
        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_can_end_the_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let mut timer = SessionTimer::new(Duration::from_millis(100));
        timer.start(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                TickControl::Stop
            } else {
                TickControl::Continue
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!timer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_the_previous_loop() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let mut timer = SessionTimer::new(Duration::from_millis(100));

        let counter = Arc::clone(&first);
        timer.start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        });
        tokio::time::sleep(Duration::from_millis(250)).await;
        let counter = Arc::clone(&second);
        timer.start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        });
        let frozen = first.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(first.load(Ordering::SeqCst), frozen);
        assert!(second.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_timer_stops_polling() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        {
            let mut timer = SessionTimer::new(Duration::from_millis(100));
            timer.start(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                TickControl::Continue
            });
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
