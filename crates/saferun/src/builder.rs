//! # Wrapper Builder
//!
//! Fluent configuration for safe-call wrappers. The builder collects the
//! optional settings, then `build` combines the chosen strategy with a facade
//! into the finished wrapper. `build` borrows the builder, so one base
//! configuration can produce any number of wrappers.

use std::sync::Arc;
use std::time::Duration;

use crate::facade;
use crate::facade::Facade;
use crate::guard::Blocking;
use crate::guard::CallSite;
use crate::guard::Detached;
use crate::guard::ErrorHook;
use crate::guard::Guard;
use crate::guard::TimeoutHook;
use crate::manager::DEFAULT_TIMEOUT;
use crate::manager::Manager;
use crate::record::Identifier;

#[derive(Debug)]
pub enum Error {
    /// The builder state cannot produce a working wrapper.
    Configuration(String),
    /// The facade could not assemble the wrapper object.
    Facade(facade::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Self::Facade(e) => write!(f, "Facade error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<facade::Error> for Error {
    fn from(e: facade::Error) -> Self {
        Self::Facade(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fluent builder for safe-call wrappers around one target.
pub struct GuardBuilder<T> {
    manager: Arc<Manager>,
    target: Arc<T>,
    identifier: Identifier,
    timeout: Duration,
    on_error: Option<ErrorHook>,
    on_timeout: Option<TimeoutHook>,
    detached: bool,
}

impl<T: Send + Sync + 'static> GuardBuilder<T> {
    pub(crate) fn new(manager: Arc<Manager>, target: Arc<T>) -> Self {
        let identifier = Identifier::of(&target);
        Self {
            manager,
            target,
            identifier,
            timeout: DEFAULT_TIMEOUT,
            on_error: None,
            on_timeout: None,
            detached: false,
        }
    }

    /// Overrides the default timeout for wrappers built from this builder.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the bulkhead/diagnostic key. Defaults to the target address.
    pub fn with_identifier(mut self, identifier: impl Into<Identifier>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Registers the callback invoked when a guarded call fails. Without it,
    /// failures propagate to blocking callers and are discarded for detached
    /// ones.
    pub fn on_error(mut self, hook: impl Fn(&anyhow::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Registers the callback invoked when a guarded call times out. Without
    /// it, a timeout is a silent default-value return.
    pub fn on_timeout(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(hook));
        self
    }

    /// Switches dispatch from blocking to detached (fire-and-forget).
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Produces a wrapper from the current builder state.
    ///
    /// Validates the configuration, constructs the chosen strategy bound to
    /// the shared manager, and asks the facade to assemble the proxy object.
    pub fn build<P: Facade<T>>(&self) -> Result<P> {
        if self.timeout.is_zero() {
            return Err(Error::Configuration("timeout must be non-zero".into()));
        }
        if self.manager.is_shutdown() {
            return Err(Error::Configuration("manager is shut down".into()));
        }

        let site = CallSite {
            target: Arc::clone(&self.target),
            identifier: self.identifier.clone(),
            timeout: self.timeout,
            on_error: self.on_error.clone(),
            on_timeout: self.on_timeout.clone(),
            manager: Arc::clone(&self.manager),
        };
        let guard = if self.detached {
            Guard::Detached(Detached::new(site))
        } else {
            Guard::Blocking(Blocking::new(site))
        };
        P::assemble(guard).map_err(Error::Facade)
    }
}
