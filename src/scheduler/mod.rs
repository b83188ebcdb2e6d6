//! Worker pool that fans items out across gated sessions.
//!
//! Each worker runs as one tokio task and handles its items strictly one at
//! a time. Items reach workers either as fixed round-robin slices
//! ([`Partition::Static`]) or through one shared FIFO ([`Partition::Dynamic`]).
//! Sessions are either created and cleared per worker
//! ([`SessionMode::Isolated`]) or cleared once and shared by all workers
//! ([`SessionMode::Shared`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mediaprobe_core::gate::{GateController, GatePolicy, GateSignals};
//! use mediaprobe_core::scheduler::{Scheduler, SchedulerConfig, WorkHandler};
//! use mediaprobe_core::session::{HttpSessionConfig, HttpSessionFactory};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(handler: Arc<dyn WorkHandler<String>>) -> Result<(), Box<dyn std::error::Error>> {
//! let gate = GateController::new(
//!     GateSignals { challenge_cookie_markers: vec!["cf".into()], consent_marker: "<video".into() },
//!     GatePolicy {
//!         seed_url: "https://host/seed.mp4".into(),
//!         poll_interval: Duration::from_secs(2),
//!         timeout: None,
//!         seed_timeout: Duration::from_secs(15),
//!     },
//! );
//! let scheduler = Scheduler::new(
//!     SchedulerConfig::default(),
//!     Arc::new(HttpSessionFactory::new(HttpSessionConfig::default())),
//!     Arc::new(gate),
//!     CancellationToken::new(),
//! )?;
//! let summary = scheduler.run(vec!["a".to_string()], handler).await?;
//! println!("found {}", summary.found);
//! # Ok(())
//! # }
//! ```

mod queue;
mod sink;
mod stats;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use queue::SharedQueue;
pub use sink::{ResourceSink, SinkError, SinkOutcome};
pub use stats::{RunStats, RunSummary};

use crate::constants::{DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS};
use crate::gate::{GateController, GateError, SessionHandle};
use crate::session::{Session, SessionError, SessionFactory};
use queue::{WorkSource, round_robin};

/// How items are split between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Partition {
    /// Round-robin slices fixed at start.
    Static,
    /// One shared FIFO popped by every worker.
    #[default]
    Dynamic,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

impl FromStr for Partition {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(format!(
                "unknown partition '{other}' (expected static or dynamic)"
            )),
        }
    }
}

/// Whether workers share one cleared session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Every worker creates and clears its own session.
    #[default]
    Isolated,
    /// One session is cleared up front and shared by all workers.
    Shared,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isolated => write!(f, "isolated"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolated" => Ok(Self::Isolated),
            "shared" => Ok(Self::Shared),
            other => Err(format!(
                "unknown session mode '{other}' (expected isolated or shared)"
            )),
        }
    }
}

/// Scheduler errors that abort a run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Worker count outside the supported range.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The rejected value.
        value: usize,
    },

    /// The shared session could not be created.
    #[error("failed to create shared session: {0}")]
    Session(#[from] SessionError),

    /// The shared session could not clear the gate.
    #[error("shared session did not clear the gate: {0}")]
    Gate(#[from] GateError),
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Item distribution strategy.
    pub partition: Partition,
    /// Session ownership strategy.
    pub session_mode: SessionMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            partition: Partition::default(),
            session_mode: SessionMode::default(),
        }
    }
}

impl SchedulerConfig {
    /// Checks the worker count.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidWorkers`] outside `1..=32`.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if (MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidWorkers {
                value: self.workers,
            })
        }
    }
}

/// What a worker hands to its handler.
pub struct WorkerContext {
    /// 1-based worker id.
    pub worker_id: usize,
    /// The worker's cleared session.
    pub session: Arc<dyn Session>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_id", &self.worker_id)
            .field("session", &self.session.label())
            .finish()
    }
}

/// Result of handling one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// This many resources were found and handed on.
    Found(usize),
    /// Nothing found.
    NotFound,
    /// Already covered by an earlier run.
    Skipped,
    /// Handling failed; the item stays pending for a later run.
    Failed,
}

/// Per-item work done by a worker.
#[async_trait]
pub trait WorkHandler<T>: Send + Sync {
    /// Handles one item. Must not fail the run; problems become
    /// [`ItemOutcome::Failed`].
    async fn handle(&self, context: &WorkerContext, item: T) -> ItemOutcome;
}

/// Drives items through handlers on gated sessions.
pub struct Scheduler {
    config: SchedulerConfig,
    factory: Arc<dyn SessionFactory>,
    gate: Arc<GateController>,
    stats: Arc<RunStats>,
    cancel: CancellationToken,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidWorkers`] for an unsupported worker count.
    pub fn new(
        config: SchedulerConfig,
        factory: Arc<dyn SessionFactory>,
        gate: Arc<GateController>,
        cancel: CancellationToken,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            gate,
            stats: Arc::new(RunStats::new()),
            cancel,
        })
    }

    /// Live counters, for progress display.
    #[must_use]
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Runs every item through `handler` and waits for all workers.
    ///
    /// Every item is handed to exactly one worker. A worker whose own
    /// session cannot clear the gate gives up its static slice (counted as
    /// abandoned); in dynamic mode the remaining workers drain the queue.
    ///
    /// # Errors
    ///
    /// In shared session mode, failing to create or clear the one session
    /// aborts the run. Cancellation during that wait is not an error; the
    /// summary reports the run as interrupted.
    pub async fn run<T>(
        &self,
        items: Vec<T>,
        handler: Arc<dyn WorkHandler<T>>,
    ) -> Result<RunSummary, SchedulerError>
    where
        T: Send + 'static,
    {
        let total = items.len();
        self.stats.set_total(total);
        if total == 0 {
            return Ok(self.stats.snapshot());
        }

        let workers = self.config.workers.min(total);
        let shared_session = match self.config.session_mode {
            SessionMode::Shared => match self.clear_shared_session().await? {
                Some(session) => Some(session),
                None => return Ok(self.stats.snapshot()),
            },
            SessionMode::Isolated => None,
        };

        let mut shared_queue = None;
        let sources: Vec<WorkSource<T>> = match self.config.partition {
            Partition::Static => round_robin(items, workers)
                .into_iter()
                .map(WorkSource::Slice)
                .collect(),
            Partition::Dynamic => {
                let queue = Arc::new(SharedQueue::new(items));
                shared_queue = Some(Arc::clone(&queue));
                (0..workers)
                    .map(|_| WorkSource::Shared(Arc::clone(&queue)))
                    .collect()
            }
        };

        info!(
            items = total,
            workers,
            partition = %self.config.partition,
            session_mode = %self.config.session_mode,
            "starting workers"
        );

        let mut tasks = JoinSet::new();
        for (offset, source) in sources.into_iter().enumerate() {
            let worker = Worker {
                id: offset + 1,
                source,
                session: shared_session.clone(),
                factory: Arc::clone(&self.factory),
                gate: Arc::clone(&self.gate),
                handler: Arc::clone(&handler),
                stats: Arc::clone(&self.stats),
                cancel: self.cancel.clone(),
            };
            tasks.spawn(worker.run());
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "worker task ended abnormally");
            }
        }

        if let Some(queue) = shared_queue {
            let leftover = queue.len();
            if leftover > 0 && !self.cancel.is_cancelled() {
                warn!(leftover, "no worker could clear the gate; items left pending");
                self.stats.abandon(leftover);
            }
        }
        if self.cancel.is_cancelled() {
            self.stats.mark_interrupted();
        }

        let summary = self.stats.snapshot();
        debug!(?summary, "workers finished");
        Ok(summary)
    }

    /// Returns `None` when the run was interrupted before the gate cleared.
    async fn clear_shared_session(&self) -> Result<Option<Arc<dyn Session>>, SchedulerError> {
        let session = self.factory.create("shared").await?;
        let mut handle = SessionHandle::new(session, 0);
        match self.gate.clear(&mut handle, &self.cancel).await {
            Ok(()) => Ok(Some(Arc::clone(handle.session()))),
            Err(GateError::Cancelled { state }) => {
                info!(%state, "interrupted while the shared session waited at the gate");
                self.stats.mark_interrupted();
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }
}

struct Worker<T> {
    id: usize,
    source: WorkSource<T>,
    session: Option<Arc<dyn Session>>,
    factory: Arc<dyn SessionFactory>,
    gate: Arc<GateController>,
    handler: Arc<dyn WorkHandler<T>>,
    stats: Arc<RunStats>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(mut self) {
        let session = match self.session.take() {
            Some(session) => session,
            None => match open_session(self.id, &self.factory, &self.gate, &self.cancel).await {
                Some(session) => session,
                None => {
                    let owned = self.source.owned_remaining();
                    if owned > 0 && !self.cancel.is_cancelled() {
                        self.stats.abandon(owned);
                    }
                    return;
                }
            },
        };

        let context = WorkerContext {
            worker_id: self.id,
            session,
        };
        let handler = Arc::clone(&self.handler);
        let mut handled = 0usize;
        while !self.cancel.is_cancelled() {
            let Some(item) = self.source.next() else {
                break;
            };
            let outcome = handler.handle(&context, item).await;
            self.stats.record(outcome);
            handled += 1;
        }
        debug!(worker = self.id, handled, "worker finished");
    }
}

async fn open_session(
    worker_id: usize,
    factory: &Arc<dyn SessionFactory>,
    gate: &GateController,
    cancel: &CancellationToken,
) -> Option<Arc<dyn Session>> {
    let label = format!("worker-{worker_id}");
    let session = match factory.create(&label).await {
        Ok(session) => session,
        Err(error) => {
            warn!(worker = worker_id, error = %error, "failed to create session");
            return None;
        }
    };
    let mut handle = SessionHandle::new(session, worker_id);
    match gate.clear(&mut handle, cancel).await {
        Ok(()) => Some(Arc::clone(handle.session())),
        Err(error) => {
            warn!(worker = worker_id, error = %error, "worker stopped before probing");
            None
        }
    }
}
