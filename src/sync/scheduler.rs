//! Tick scheduling
//!
//! The registry never owns a timer directly. It is handed a [`Scheduler`] at
//! construction, starts it exactly once and stops it on shutdown. Production
//! code uses [`IntervalScheduler`]; tests drive ticks by hand through
//! [`ManualScheduler`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use crate::core::error::{Error, Result};
use crate::{log_debug, log_warn};

/// Callback fired on every tick
pub type TickFn = Arc<dyn Fn() + Send + Sync>;

/// Periodic timer abstraction
pub trait Scheduler: Send + Sync {
    /// Begin firing `tick`. Starting an already running scheduler is an error.
    fn start(&self, tick: TickFn) -> Result<()>;

    /// Stop firing. Stopping twice is a no-op.
    fn stop(&self);

    /// Whether ticks are currently being fired
    fn is_running(&self) -> bool;
}

/// Fires ticks on a fixed tokio interval
pub struct IntervalScheduler {
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalScheduler {
    /// Create a scheduler with the given period
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: Mutex::new(None),
        }
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Scheduler for IntervalScheduler {
    fn start(&self, tick: TickFn) -> Result<()> {
        if self.period.is_zero() {
            return Err(Error::config("Tick interval must be greater than zero"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::config(format!("IntervalScheduler needs a tokio runtime: {}", e)))?;

        let mut task = self.task.lock();
        if task.is_some() {
            return Err(Error::internal("scheduler already started"));
        }

        let period = self.period;
        *task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                tick();
            }
        }));
        log_debug!("IntervalScheduler started with period {:?}", period);
        Ok(())
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            log_debug!("IntervalScheduler stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.lock().as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Scheduler that only ticks when told to
#[derive(Default)]
pub struct ManualScheduler {
    tick: Mutex<Option<TickFn>>,
    stops: AtomicUsize,
}

impl ManualScheduler {
    /// Create a stopped scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire one tick. Returns false when the scheduler is not running.
    pub fn fire(&self) -> bool {
        // Clone out so the callback may stop the scheduler
        let tick = self.tick.lock().clone();
        match tick {
            Some(tick) => {
                tick();
                true
            }
            None => {
                log_warn!("ManualScheduler::fire - not running");
                false
            }
        }
    }

    /// Fire `n` ticks
    pub fn fire_n(&self, n: usize) {
        for _ in 0..n {
            self.fire();
        }
    }

    /// How many times `stop` actually stopped a running scheduler
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Scheduler for ManualScheduler {
    fn start(&self, tick: TickFn) -> Result<()> {
        let mut slot = self.tick.lock();
        if slot.is_some() {
            return Err(Error::internal("scheduler already started"));
        }
        *slot = Some(tick);
        Ok(())
    }

    fn stop(&self) {
        if self.tick.lock().take().is_some() {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_running(&self) -> bool {
        self.tick.lock().is_some()
    }
}
