//! Long-lived background loop that triggers lock-coordinated materialization runs.

use std::{fmt, sync::Arc, time::Duration};

use recur_domain::CheckpointPolicy;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    lock::{SingleFlight, DEFAULT_LOCK_KEY},
    materializer::{Materializer, RunSummary},
    time::Clock,
    CoreError, RecurrenceStore,
};

/// Tunables for the scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub interval: Duration,
    /// Bound applied to every individual store call.
    pub operation_timeout: Duration,
    pub lock_key: i64,
    pub checkpoint_policy: CheckpointPolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            operation_timeout: Duration::from_secs(10),
            lock_key: DEFAULT_LOCK_KEY,
            checkpoint_policy: CheckpointPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Drives [`Materializer`] runs on startup and on every interval tick.
pub struct Scheduler<S: ?Sized> {
    materializer: Materializer<S>,
    lock: SingleFlight<S>,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
}

impl<S: RecurrenceStore + ?Sized + 'static> Scheduler<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, options: SchedulerOptions) -> Self {
        let materializer = Materializer::new(Arc::clone(&store))
            .with_policy(options.checkpoint_policy)
            .with_operation_timeout(options.operation_timeout);
        let lock = SingleFlight::new(store).with_operation_timeout(options.operation_timeout);
        Self {
            materializer,
            lock,
            clock,
            options,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Performs one lock-coordinated run as of the clock's current UTC date.
    ///
    /// Returns `Ok(None)` when another instance holds the lock.
    pub async fn run_once(&self) -> Result<Option<RunSummary>, CoreError> {
        let as_of = self.clock.today();
        match self
            .lock
            .run_exclusive(self.options.lock_key, self.materializer.process(as_of))
            .await?
        {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    /// Spawns the loop on the current tokio runtime. The first run starts
    /// immediately; later runs follow the configured interval.
    pub fn start(self) -> StopHandle {
        let token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (summary_tx, summary_rx) = watch::channel(None);
        let task = tokio::spawn(self.run_loop(token.clone(), state_tx, summary_tx));
        StopHandle {
            token,
            task,
            state: state_rx,
            summaries: summary_rx,
        }
    }

    async fn run_loop(
        self,
        token: CancellationToken,
        state: watch::Sender<SchedulerState>,
        summaries: watch::Sender<Option<RunSummary>>,
    ) {
        info!(
            interval = ?self.options.interval,
            lock_key = self.options.lock_key,
            policy = %self.options.checkpoint_policy,
            "recurrence scheduler started"
        );
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    state.send_replace(SchedulerState::Running);
                    match self.run_once().await {
                        Ok(Some(summary)) => {
                            summaries.send_replace(Some(summary));
                        }
                        Ok(None) => debug!("materialization run skipped; lock contended"),
                        Err(err) => error!(error = %err, "materialization run aborted"),
                    }
                    state.send_replace(SchedulerState::Idle);
                }
            }
        }

        state.send_replace(SchedulerState::Stopped);
        info!("recurrence scheduler stopped");
    }
}

/// Handle returned by [`Scheduler::start`]. Dropping it leaves the loop running.
pub struct StopHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<SchedulerState>,
    summaries: watch::Receiver<Option<RunSummary>>,
}

impl StopHandle {
    /// Requests termination. An in-flight run finishes before the loop exits.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Requests termination and waits for the loop to exit.
    pub async fn shutdown(self) -> Result<(), CoreError> {
        self.token.cancel();
        self.task
            .await
            .map_err(|err| CoreError::TaskFailed(err.to_string()))
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Summary of the most recent completed run.
    pub fn last_summary(&self) -> Option<RunSummary> {
        self.summaries.borrow().clone()
    }

    pub fn subscribe_summaries(&self) -> watch::Receiver<Option<RunSummary>> {
        self.summaries.clone()
    }
}
