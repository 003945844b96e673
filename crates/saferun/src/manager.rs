//! # Coordination Manager
//!
//! Process-wide state shared by every wrapper: the in-flight record registry,
//! per-identifier groups, the bounded worker pool, and the watchdog that
//! abandons calls once their deadline passes.
//!
//! Uses DashMap for concurrent access without global locking; caller tasks,
//! workers, and watchdogs read and update the bookkeeping concurrently.
//!
//! ## Invariants
//!
//! - A record leaves `Pending` exactly once; the transition winner delivers
//!   the outcome, every loser's result is discarded.
//! - Saturation is reported as a failure, never as a silent timeout.
//! - Abandonment is advisory: a timed-out call keeps its worker until the
//!   target future returns on its own.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::anyhow;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tokio::sync::oneshot;

use crate::builder::GuardBuilder;
use crate::record::CallId;
use crate::record::Identifier;
use crate::record::Outcome;
use crate::record::Record;
use crate::record::State;

/// Timeout applied when a wrapper does not configure its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker pool size used by [`Manager::new`].
pub const DEFAULT_WORKERS: usize = 8;

/// Submissions allowed to queue beyond the running workers before new ones
/// are rejected.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

#[derive(Debug)]
pub enum Error {
    /// The worker pool and its queue are exhausted.
    Saturated {
        identifier: Identifier,
        method: &'static str,
    },
    /// The manager has been shut down.
    Shutdown,
    /// Pool limits that cannot schedule anything.
    InvalidLimits { workers: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Saturated { identifier, method } => {
                write!(f, "Worker pool saturated: {} ({})", identifier, method)
            }
            Self::Shutdown => write!(f, "Manager is shut down"),
            Self::InvalidLimits { workers } => {
                write!(f, "Invalid pool limits: {} workers", workers)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Bookkeeping for one identifier group. Counters only; a group never owns
/// invocation records.
#[derive(Debug, Default)]
struct Group {
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
}

impl Group {
    fn snapshot(&self) -> GroupStats {
        GroupStats {
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one identifier group's counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Records currently pending under this identifier.
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Submissions rejected because the pool was saturated.
    pub rejected: u64,
}

/// Shared slot for the outcome sender; the terminal-transition winner takes it.
type Slot<R> = Arc<Mutex<Option<oneshot::Sender<Outcome<R>>>>>;

/// The process-wide coordination state behind every safe-call wrapper.
///
/// Initialized once per host process and torn down at host shutdown via
/// [`Manager::shutdown`]. Wrappers hold an `Arc<Manager>`; there is no
/// implicit singleton.
#[derive(Debug)]
pub struct Manager {
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    records: DashMap<CallId, Arc<Record>>,
    groups: DashMap<Identifier, Arc<Group>>,
    next_call_id: AtomicU64,
    open: AtomicBool,
}

impl Manager {
    /// Creates a manager with the default pool limits.
    pub fn new() -> Self {
        Self::assemble(DEFAULT_WORKERS, DEFAULT_QUEUE_DEPTH)
    }

    /// Creates a manager with an explicit pool size and queue depth.
    ///
    /// A zero-sized pool could never run anything and is rejected.
    pub fn with_limits(workers: usize, queue_depth: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::InvalidLimits { workers });
        }
        Ok(Self::assemble(workers, queue_depth))
    }

    fn assemble(workers: usize, queue_depth: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers)),
            slots: Arc::new(Semaphore::new(workers + queue_depth)),
            records: DashMap::new(),
            groups: DashMap::new(),
            next_call_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
        }
    }

    /// Starts configuring a safe wrapper around `target`.
    pub fn wrap<T: Send + Sync + 'static>(self: &Arc<Self>, target: Arc<T>) -> GuardBuilder<T> {
        GuardBuilder::new(Arc::clone(self), target)
    }

    /// Stops accepting submissions and wakes queued ones with a shutdown
    /// failure. In-flight calls settle on their own.
    pub fn shutdown(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.workers.close();
        self.slots.close();
    }

    pub fn is_shutdown(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    /// Number of invocation records currently tracked, abandoned ones
    /// included until their execution returns.
    pub fn in_flight(&self) -> usize {
        self.records.len()
    }

    /// Snapshot of the counters for one identifier group, if it has ever been
    /// used.
    pub fn stats(&self, identifier: &Identifier) -> Option<GroupStats> {
        self.groups.get(identifier).map(|group| group.snapshot())
    }

    /// Group for `identifier`, created lazily on first use. Groups persist for
    /// the process lifetime.
    fn group(&self, identifier: &Identifier) -> Arc<Group> {
        self.groups
            .entry(identifier.clone())
            .or_insert_with(|| Arc::new(Group::default()))
            .value()
            .clone()
    }

    /// Registers an invocation record and schedules the call on the pool.
    ///
    /// Returns the channel on which the terminal outcome arrives. The record
    /// is settled exactly once: by the worker (completed or failed), by the
    /// watchdog (timed out), or synchronously here (rejected or shut down).
    /// This method contains no await points.
    pub(crate) fn submit<R, F>(
        self: &Arc<Self>,
        identifier: &Identifier,
        method: &'static str,
        timeout: Duration,
        call: F,
    ) -> oneshot::Receiver<Outcome<R>>
    where
        R: Send + 'static,
        F: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let id = CallId(self.next_call_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(Record::new(id, identifier.clone(), method, timeout));
        let group = self.group(identifier);
        group.active.fetch_add(1, Ordering::Relaxed);
        self.records.insert(id, Arc::clone(&record));

        let (tx, rx) = oneshot::channel();
        let slot: Slot<R> = Arc::new(Mutex::new(Some(tx)));

        if self.is_shutdown() {
            self.conclude(&record, &group, &slot, State::Failed, Outcome::Failed(Error::Shutdown.into()));
            return rx;
        }

        // Reserve a queue slot synchronously; exhaustion is an explicit
        // failure equivalent to a target error, not a silent timeout.
        let reservation = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                group.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    call = %id,
                    identifier = %record.identifier,
                    method,
                    "submission rejected: worker pool saturated"
                );
                let error = Error::Saturated {
                    identifier: identifier.clone(),
                    method,
                };
                self.conclude(&record, &group, &slot, State::Failed, Outcome::Failed(error.into()));
                return rx;
            }
        };

        self.spawn_watchdog(Arc::clone(&record), Arc::clone(&group), Arc::clone(&slot));
        self.spawn_worker(reservation, record, group, slot, call);
        rx
    }

    /// Schedules the abandonment check for `startTime + timeout`. If the
    /// record is still pending when it fires, the watchdog wins the terminal
    /// transition and notifies the strategy; the execution itself is left to
    /// finish on its own.
    fn spawn_watchdog<R>(self: &Arc<Self>, record: Arc<Record>, group: Arc<Group>, slot: Slot<R>)
    where
        R: Send + 'static,
    {
        let manager = Arc::clone(self);
        let deadline = tokio::time::Instant::from_std(record.deadline);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if manager.conclude(&record, &group, &slot, State::TimedOut, Outcome::TimedOut) {
                tracing::warn!(
                    call = %record.id,
                    identifier = %record.identifier,
                    method = record.method,
                    "call exceeded its deadline; abandoning"
                );
            }
        });
    }

    /// Runs the call on the bounded pool. Queued submissions wait here for a
    /// worker permit; the queue-slot reservation is held for the whole run.
    fn spawn_worker<R, F>(
        self: &Arc<Self>,
        reservation: OwnedSemaphorePermit,
        record: Arc<Record>,
        group: Arc<Group>,
        slot: Slot<R>,
        call: F,
    ) where
        R: Send + 'static,
        F: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let _reservation = reservation;
            let permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    manager.conclude(&record, &group, &slot, State::Failed, Outcome::Failed(Error::Shutdown.into()));
                    return;
                }
            };

            // Abandoned while still queued: nothing left to run.
            if record.state() != State::Pending {
                manager.records.remove(&record.id);
                return;
            }

            // A panicking target is a failure, not a dead worker.
            let result = AssertUnwindSafe(call).catch_unwind().await;
            drop(permit);

            let outcome = match result {
                Ok(Ok(value)) => Outcome::Completed(value),
                Ok(Err(error)) => Outcome::Failed(error),
                Err(panic) => Outcome::Failed(anyhow!("target panicked: {}", panic_text(panic.as_ref()))),
            };
            let next = match &outcome {
                Outcome::Completed(_) => State::Completed,
                _ => State::Failed,
            };

            if !manager.conclude(&record, &group, &slot, next, outcome) {
                // Lost the race to the watchdog: the result arrived after
                // abandonment and must not be delivered anywhere.
                tracing::debug!(
                    call = %record.id,
                    identifier = %record.identifier,
                    method = record.method,
                    elapsed = ?record.elapsed(),
                    "late result discarded"
                );
                manager.records.remove(&record.id);
            }
        });
    }

    /// Applies a terminal transition if the record is still pending and
    /// delivers the outcome to the owning strategy. Returns whether this
    /// caller won the transition.
    fn conclude<R>(
        &self,
        record: &Arc<Record>,
        group: &Group,
        slot: &Slot<R>,
        next: State,
        outcome: Outcome<R>,
    ) -> bool
    where
        R: Send,
    {
        if !record.settle(next) {
            return false;
        }

        group.active.fetch_sub(1, Ordering::Relaxed);
        match next {
            State::Completed => {
                group.completed.fetch_add(1, Ordering::Relaxed);
            }
            State::Failed => {
                group.failed.fetch_add(1, Ordering::Relaxed);
            }
            State::TimedOut => {
                group.timed_out.fetch_add(1, Ordering::Relaxed);
            }
            State::Pending => {}
        }

        // A timed-out record stays visible until its abandoned execution
        // returns; everything else is done now.
        if next != State::TimedOut {
            self.records.remove(&record.id);
        }

        let sender = match slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(tx) = sender {
            // A detached caller may already be gone; that is fine.
            let _ = tx.send(outcome);
        }
        true
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text
    } else {
        "non-string panic payload"
    }
}
