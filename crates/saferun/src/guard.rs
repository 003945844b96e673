//! # Interception Strategies
//!
//! The interception point behind every wrapper facade. Each intercepted call
//! flows through exactly one strategy: [`Blocking`] makes the caller await the
//! outcome up to the configured timeout, [`Detached`] returns immediately and
//! reports misbehavior through the hooks. Both register the call with the
//! manager and let its watchdog own the deadline.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::time::Duration;

use crate::manager::Manager;
use crate::record::Identifier;
use crate::record::Outcome;

/// Callback invoked when a guarded call fails.
pub type ErrorHook = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Callback invoked when a guarded call exceeds its timeout.
pub type TimeoutHook = Arc<dyn Fn() + Send + Sync>;

/// Immutable per-wrapper configuration shared by both strategies.
pub(crate) struct CallSite<T> {
    pub(crate) target: Arc<T>,
    pub(crate) identifier: Identifier,
    pub(crate) timeout: Duration,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) on_timeout: Option<TimeoutHook>,
    pub(crate) manager: Arc<Manager>,
}

impl<T> CallSite<T> {
    /// Runs the error hook, if any. A panicking hook cannot replace the
    /// call's outcome. Returns whether a hook was present.
    fn notify_error(&self, error: &anyhow::Error) -> bool {
        match &self.on_error {
            Some(hook) => {
                if catch_unwind(AssertUnwindSafe(|| hook(error))).is_err() {
                    tracing::warn!(identifier = %self.identifier, "error hook panicked");
                }
                true
            }
            None => false,
        }
    }

    /// Runs the timeout hook, if any, containing panics so the timeout
    /// outcome stands.
    fn notify_timeout(&self) {
        if let Some(hook) = &self.on_timeout {
            if catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                tracing::warn!(identifier = %self.identifier, "timeout hook panicked");
            }
        }
    }
}

/// Strategy that makes the caller wait for the outcome, bounded by the
/// timeout.
pub struct Blocking<T> {
    pub(crate) site: CallSite<T>,
}

impl<T: Send + Sync + 'static> Blocking<T> {
    pub(crate) fn new(site: CallSite<T>) -> Self {
        Self { site }
    }

    /// Intercepts one call.
    ///
    /// Success passes the target's value through unchanged. A failure runs
    /// the error hook and yields the default value, or propagates unchanged
    /// when no hook is configured. A timeout runs the timeout hook and yields
    /// the default value; a late result never reaches the caller.
    pub async fn invoke<R, F, Fut>(&self, method: &'static str, op: F) -> anyhow::Result<R>
    where
        R: Default + Send + 'static,
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let site = &self.site;
        let call = op(Arc::clone(&site.target));
        let rx = site.manager.submit(&site.identifier, method, site.timeout, call);

        match rx.await {
            Ok(Outcome::Completed(value)) => Ok(value),
            Ok(Outcome::Failed(error)) => {
                if site.notify_error(&error) {
                    Ok(R::default())
                } else {
                    Err(error)
                }
            }
            Ok(Outcome::TimedOut) => {
                site.notify_timeout();
                Ok(R::default())
            }
            // The manager delivers exactly one outcome; a closed channel
            // means the process is tearing down mid-call.
            Err(_) => Err(anyhow::anyhow!("invocation abandoned: outcome channel closed")),
        }
    }
}

/// Fire-and-forget strategy: the caller gets the default value immediately
/// and a background task feeds the eventual outcome to the hooks.
pub struct Detached<T> {
    pub(crate) site: CallSite<T>,
}

impl<T: Send + Sync + 'static> Detached<T> {
    pub(crate) fn new(site: CallSite<T>) -> Self {
        Self { site }
    }

    /// Intercepts one call. Contains no await points: the caller never
    /// suspends, and a successful result is never delivered back.
    pub async fn invoke<R, F, Fut>(&self, method: &'static str, op: F) -> anyhow::Result<R>
    where
        R: Default + Send + 'static,
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let site = &self.site;
        let call = op(Arc::clone(&site.target));
        let rx = site.manager.submit(&site.identifier, method, site.timeout, call);

        let on_error = site.on_error.clone();
        let on_timeout = site.on_timeout.clone();
        let identifier = site.identifier.clone();
        tokio::spawn(async move {
            match rx.await {
                Ok(Outcome::Failed(error)) => match on_error {
                    Some(hook) => hook(&error),
                    None => tracing::debug!(
                        %identifier,
                        method,
                        error = %error,
                        "detached call failed; error discarded"
                    ),
                },
                Ok(Outcome::TimedOut) => {
                    if let Some(hook) = on_timeout {
                        hook();
                    }
                }
                Ok(Outcome::Completed(_)) | Err(_) => {}
            }
        });

        Ok(R::default())
    }
}

/// The interception handle handed to wrapper facades, one per built wrapper.
///
/// The dispatch mode is chosen at build time; a facade calls through
/// [`Guard::invoke`] without caring which strategy is behind it.
pub enum Guard<T> {
    Blocking(Blocking<T>),
    Detached(Detached<T>),
}

impl<T: Send + Sync + 'static> Guard<T> {
    /// Single interception entry point for generated and hand-written
    /// facades.
    pub async fn invoke<R, F, Fut>(&self, method: &'static str, op: F) -> anyhow::Result<R>
    where
        R: Default + Send + 'static,
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        match self {
            Self::Blocking(strategy) => strategy.invoke(method, op).await,
            Self::Detached(strategy) => strategy.invoke(method, op).await,
        }
    }

    /// Bulkhead key this wrapper reports under.
    pub fn identifier(&self) -> &Identifier {
        match self {
            Self::Blocking(strategy) => &strategy.site.identifier,
            Self::Detached(strategy) => &strategy.site.identifier,
        }
    }
}
