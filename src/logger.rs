//! Injected logging sink.
//!
//! Middleware never writes to a process-wide logger it did not receive.
//! A [`Logger`] is a cheap handle to a `tracing` dispatcher; every event the
//! middleware emits is routed to that dispatcher, whatever the global default
//! happens to be.

use tracing::{Dispatch, Subscriber, dispatcher};
use tracing_subscriber::EnvFilter;

/// A handle to the `tracing` dispatcher middleware should log to.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    pub fn from_subscriber<S>(subscriber: S) -> Self
    where
        S: Subscriber + Send + Sync + 'static,
    {
        Self::new(Dispatch::new(subscriber))
    }

    /// Human-readable output on stdout, filtered by `RUST_LOG` (default `info`).
    pub fn from_env() -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        Self::from_subscriber(tracing_subscriber::fmt().with_env_filter(filter).finish())
    }

    /// The dispatcher that is the default for the calling thread.
    pub fn current() -> Self {
        dispatcher::get_default(|d| Self::new(d.clone()))
    }

    /// Runs `f` with this logger as the default dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::current()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
