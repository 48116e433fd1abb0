//! Telemetry emitter service
//!
//! Wires the configuration manager, the scheduler and the tick pipeline
//! together.
//!
//! ## Message Flow
//!
//! ```text
//! apply_update ─► ConfigurationManager ─(watch)─► watcher task ─► Scheduler::on_configuration_changed
//!                        │ current()                                   │ tick
//!                        ▼                                             ▼
//!                 TelemetryPipeline ◄──────────────────────────────────┘
//!                   aggregate ─► serialize ─► PublishDispatcher ─► sinks
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace};

use crate::{
    aggregator::{MetricAggregator, PayloadSerializer},
    config::{ConfigurationManager, RawOptions, TelemetryConfiguration, ValidationOutcome},
    dispatcher::PublishDispatcher,
    error::SchedulingError,
    scheduler::{Scheduler, SchedulerState, Tick},
};

/// One tick: snapshot, aggregate, serialize, dispatch
///
/// The snapshot is read once at the start of the tick, so a concurrent update
/// only becomes visible to the next tick.
pub struct TelemetryPipeline {
    configuration: Arc<ConfigurationManager>,
    aggregator: MetricAggregator,
    serializer: Arc<dyn PayloadSerializer>,
    dispatcher: PublishDispatcher,
}

impl TelemetryPipeline {
    pub fn new(
        configuration: Arc<ConfigurationManager>,
        aggregator: MetricAggregator,
        serializer: Arc<dyn PayloadSerializer>,
        dispatcher: PublishDispatcher,
    ) -> Self {
        Self {
            configuration,
            aggregator,
            serializer,
            dispatcher,
        }
    }
}

impl Tick for TelemetryPipeline {
    #[instrument(skip_all)]
    fn tick(&self) -> Result<(), SchedulingError> {
        let config = self.configuration.current();
        let payload = self.aggregator.build_payload(self.serializer.as_ref())?;
        self.dispatcher.dispatch(&payload, &config);
        Ok(())
    }
}

pub struct TelemetryEmitter {
    configuration: Arc<ConfigurationManager>,
    scheduler: Arc<Scheduler>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryEmitter {
    pub fn new(configuration: Arc<ConfigurationManager>, tick: Arc<dyn Tick>) -> Self {
        Self {
            configuration,
            scheduler: Arc::new(Scheduler::new(tick)),
            watcher: Mutex::new(None),
        }
    }

    /// Emitter running the standard pipeline over `configuration`
    pub fn with_pipeline(
        configuration: Arc<ConfigurationManager>,
        aggregator: MetricAggregator,
        serializer: Arc<dyn PayloadSerializer>,
        dispatcher: PublishDispatcher,
    ) -> Self {
        let pipeline = TelemetryPipeline::new(
            Arc::clone(&configuration),
            aggregator,
            serializer,
            dispatcher,
        );
        Self::new(configuration, Arc::new(pipeline))
    }

    /// Start ticking and follow configuration changes
    ///
    /// Calling it while started is a no-op, and a stopped emitter stays
    /// stopped.
    #[instrument(skip_all)]
    pub async fn start(&self) {
        if self.is_watching() {
            debug!("emitter already started");
            return;
        }

        // subscribe before reading so no update can slip in between
        let mut updates = self.configuration.subscribe();
        let current = self.configuration.current();
        self.scheduler.start(&current).await;

        if self.scheduler.state().await == SchedulerState::Stopped {
            debug!("emitter is stopped, not watching configuration");
            return;
        }

        let scheduler = Arc::clone(&self.scheduler);
        let watcher = tokio::spawn(async move {
            // catch up with whatever is current by the time the watcher runs
            let snapshot = Arc::clone(&updates.borrow_and_update());
            scheduler.on_configuration_changed(&snapshot).await;

            while updates.changed().await.is_ok() {
                let snapshot = Arc::clone(&updates.borrow_and_update());
                trace!("configuration change observed");
                scheduler.on_configuration_changed(&snapshot).await;
            }

            debug!("configuration channel closed");
        });

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(watcher);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop ticking; calling it again is a no-op
    #[instrument(skip_all)]
    pub async fn stop(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(watcher) = watcher {
            watcher.abort();
            let _ = watcher.await;
        }

        self.scheduler.stop().await;
    }

    fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|watcher| !watcher.is_finished())
    }

    pub fn apply_update(&self, raw: &RawOptions) -> ValidationOutcome {
        self.configuration.apply_update(raw)
    }

    pub fn current_configuration(&self) -> Arc<TelemetryConfiguration> {
        self.configuration.current()
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state().await
    }
}

impl Drop for TelemetryEmitter {
    fn drop(&mut self) {
        let watcher = self.watcher.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = watcher.take() {
            watcher.abort();
        }
    }
}
