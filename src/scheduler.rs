//! Reconfigurable periodic scheduler
//!
//! The scheduler owns at most one live periodic task. Changing the interval
//! replaces that task: the old one is aborted before the new one is installed
//! and awaited before the reschedule returns. An aborted task never starts
//! another tick, and the replacement's first tick is a full interval away, so
//! two periodic tasks never tick side by side.
//!
//! ## States
//!
//! ```text
//!   Idle ──start──► Running(I) ──interval change──► Running(I')
//!                       │        (cancel, install)
//!                       └──stop──► Stopped
//! ```
//!
//! A tick that is already executing is never interrupted: ticks are
//! synchronous, and an abort only takes effect at the task's next await point.
//! Errors and panics inside a tick are caught at the tick boundary and logged;
//! the next tick fires as usual.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::{config::TelemetryConfiguration, error::SchedulingError};

/// Work executed on every tick
pub trait Tick: Send + Sync + 'static {
    fn tick(&self) -> Result<(), SchedulingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running { interval: Duration, task_id: u64 },
    Stopped,
}

/// Handle to the installed periodic task
struct ScheduledTask {
    id: u64,
    interval: Duration,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    async fn cancel(self) {
        self.handle.abort();
        match self.handle.await {
            Err(e) if e.is_panic() => error!("periodic task {} panicked: {e}", self.id),
            _ => trace!("periodic task {} cancelled", self.id),
        }
    }
}

enum Slot {
    Idle,
    Running(ScheduledTask),
    Stopped,
}

pub struct Scheduler {
    tick: Arc<dyn Tick>,

    /// Also serializes reschedules: only one cancel-and-install at a time
    slot: Mutex<Slot>,

    next_task_id: AtomicU64,
}

impl Scheduler {
    pub fn new(tick: Arc<dyn Tick>) -> Self {
        Self {
            tick,
            slot: Mutex::new(Slot::Idle),
            next_task_id: AtomicU64::new(1),
        }
    }

    /// Install the periodic task at the snapshot's interval
    ///
    /// Only effective from `Idle`; a stopped scheduler stays stopped.
    #[instrument(skip_all)]
    pub async fn start(&self, config: &TelemetryConfiguration) {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Idle => *slot = Slot::Running(self.install(config.publish_interval())),
            Slot::Running(task) => debug!("already running (task {})", task.id),
            Slot::Stopped => warn!("scheduler is stopped, ignoring start"),
        }
    }

    /// Reschedule if the snapshot's interval differs from the running one
    ///
    /// The first tick of the new task fires one full interval after this call.
    #[instrument(skip_all)]
    pub async fn on_configuration_changed(&self, config: &TelemetryConfiguration) {
        let interval = config.publish_interval();
        let mut slot = self.slot.lock().await;

        let Slot::Running(task) = &mut *slot else {
            trace!("not running, nothing to reschedule");
            return;
        };
        if task.interval == interval {
            trace!("no reschedule needed");
            return;
        }

        debug!(
            "publish interval changed from {:?} to {interval:?}, rescheduling",
            task.interval
        );
        // the slot already holds the replacement if this call is dropped while waiting
        task.handle.abort();
        let previous = std::mem::replace(task, self.install(interval));
        previous.cancel().await;
    }

    /// Cancel the periodic task; calling it again is a no-op
    #[instrument(skip_all)]
    pub async fn stop(&self) {
        let mut slot = self.slot.lock().await;
        if let Slot::Running(task) = std::mem::replace(&mut *slot, Slot::Stopped) {
            task.cancel().await;
            debug!("scheduler stopped");
        }
    }

    pub async fn state(&self) -> SchedulerState {
        match &*self.slot.lock().await {
            Slot::Idle => SchedulerState::Idle,
            Slot::Running(task) => SchedulerState::Running {
                interval: task.interval,
                task_id: task.id,
            },
            Slot::Stopped => SchedulerState::Stopped,
        }
    }

    fn install(&self, interval: Duration) -> ScheduledTask {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(run_schedule(Arc::clone(&self.tick), interval, id));

        ScheduledTask {
            id,
            interval,
            handle,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Slot::Running(task) = self.slot.get_mut() {
            task.handle.abort();
        }
    }
}

#[instrument(skip(tick))]
async fn run_schedule(tick: Arc<dyn Tick>, interval: Duration, task_id: u64) {
    debug!("periodic task installed");

    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        run_tick(tick.as_ref());
    }
}

/// Execute one tick, absorbing errors and panics
fn run_tick(tick: &dyn Tick) {
    match catch_unwind(AssertUnwindSafe(|| tick.tick())) {
        Ok(Ok(())) => trace!("tick completed"),
        Ok(Err(e)) => error!("tick failed: {e:#}"),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("tick failed: {}", SchedulingError::Panicked(message));
        }
    }
}
