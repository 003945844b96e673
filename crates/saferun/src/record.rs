//! # Invocation Records
//!
//! Per-call bookkeeping owned by the coordination manager. A record is created
//! when an intercepted call is registered and leaves `Pending` exactly once,
//! whether the call completes, fails, or is abandoned by the watchdog.

use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

/// Strong type for invocation identifiers, one per intercepted call.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct CallId(pub u64);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Bulkhead key grouping invocations for diagnostics and isolation accounting.
///
/// Defaults to the address of the wrapped target, so every wrapper around one
/// target shares a group unless an explicit name is configured. The key is
/// correlation only; concurrent calls under one identifier run independently.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Identifier {
    /// Address of the wrapped target instance.
    Target(usize),
    /// Caller-supplied key.
    Named(String),
}

impl Identifier {
    /// Identifier derived from the target instance itself.
    pub fn of<T>(target: &Arc<T>) -> Self {
        Self::Target(Arc::as_ptr(target) as usize)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(addr) => write!(f, "target-{:x}", addr),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// Completion state of an invocation record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Pending,
    Completed,
    Failed,
    TimedOut,
}

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const FAILED: u8 = 2;
const TIMED_OUT: u8 = 3;

impl State {
    fn encode(self) -> u8 {
        match self {
            Self::Pending => PENDING,
            Self::Completed => COMPLETED,
            Self::Failed => FAILED,
            Self::TimedOut => TIMED_OUT,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            COMPLETED => Self::Completed,
            FAILED => Self::Failed,
            TIMED_OUT => Self::TimedOut,
            _ => Self::Pending,
        }
    }
}

/// Terminal outcome delivered to the owning strategy, exactly once per record.
pub(crate) enum Outcome<R> {
    Completed(R),
    Failed(anyhow::Error),
    TimedOut,
}

/// One in-flight invocation.
///
/// The state machine is the single point of truth for "who owns the outcome":
/// the worker, the watchdog, and the rejection path all race through
/// [`Record::settle`], and only the winner may notify the strategy.
#[derive(Debug)]
pub(crate) struct Record {
    pub(crate) id: CallId,
    pub(crate) identifier: Identifier,
    pub(crate) method: &'static str,
    pub(crate) started: Instant,
    pub(crate) deadline: Instant,
    state: AtomicU8,
}

impl Record {
    pub(crate) fn new(
        id: CallId,
        identifier: Identifier,
        method: &'static str,
        timeout: Duration,
    ) -> Self {
        let started = Instant::now();
        Self {
            id,
            identifier,
            method,
            started,
            deadline: started + timeout,
            state: AtomicU8::new(PENDING),
        }
    }

    pub(crate) fn state(&self) -> State {
        State::decode(self.state.load(Ordering::Acquire))
    }

    /// Attempts the single terminal transition out of `Pending`.
    ///
    /// Returns false if another party already settled the record; the caller
    /// must then discard its outcome.
    pub(crate) fn settle(&self, next: State) -> bool {
        debug_assert!(next != State::Pending);
        self.state
            .compare_exchange(PENDING, next.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
