//! Panic recovery.
//!
//! A panic in one request must never reach the connection task, let alone
//! the accept loop. [`with_recovery`] runs the wrapped handler inside a
//! [`Supervised`] future: every poll happens inside a fault boundary, and a
//! panic comes out as a typed [`Fault`] instead of unwinding further.
//!
//! The stack trace is taken by a panic hook at the moment of the panic. The
//! hook only records traces for panics raised inside a fault boundary on the
//! same thread; every other panic goes to the previously installed hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};
use std::time::Instant;

use http::StatusCode;
use tracing::error;

use super::logging::RequestLine;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::logger::Logger;
use crate::request::Request;
use crate::response::Response;

/// A handler that panicked.
#[derive(Debug, thiserror::Error)]
#[error("handler panicked: {message}")]
pub struct Fault {
    pub message: String,
    /// `file:line:column` of the panic, when the hook saw it.
    pub location: Option<String>,
    pub trace: String,
}

/// Wraps `handler` so a panic turns into a logged `500 Internal Server Error`.
///
/// The client-visible body is the status reason only; see [`Recovery`] to
/// include the panic message and trace.
pub fn with_recovery(handler: impl Handler, logger: Logger) -> BoxedHandler {
    Recovery::new(logger).wrap(handler)
}

/// Configurable form of [`with_recovery`].
#[derive(Clone, Debug)]
pub struct Recovery {
    logger: Logger,
    expose_trace: bool,
}

impl Recovery {
    pub fn new(logger: Logger) -> Self {
        Self { logger, expose_trace: false }
    }

    /// Sends the panic message and trace to the client. Meant for local
    /// development; traces are always logged regardless.
    pub fn expose_trace(mut self, expose: bool) -> Self {
        self.expose_trace = expose;
        self
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn wrap(self, handler: impl Handler) -> BoxedHandler {
        install_hook();
        BoxedHandler::new(Recover { inner: handler.into_boxed_handler(), config: self })
    }
}

struct Recover {
    inner: BoxedHandler,
    config: Recovery,
}

impl ErasedHandler for Recover {
    fn call(&self, req: Request) -> BoxFuture {
        let started = Instant::now();
        let line = RequestLine::of(&req);
        let inner = self.inner.clone();
        let config = self.config.clone();

        // The call itself runs inside the boundary too: a handler may panic
        // before it ever returns a future.
        let supervised = Supervised::new(Box::pin(async move { inner.call(req).await }));

        Box::pin(async move {
            match supervised.await {
                Ok(response) => response,
                Err(fault) => {
                    let status = StatusCode::INTERNAL_SERVER_ERROR;
                    let body = fault_body(&fault, config.expose_trace);
                    config.logger.in_scope(|| {
                        error!(
                            status = status.as_u16(),
                            remote = %line.remote, method = %line.method,
                            proto = ?line.version, uri = %line.uri,
                            took = ?started.elapsed(), size = body.len(),
                            panic = %fault.message,
                            location = fault.location.as_deref().unwrap_or("unknown"),
                            traceback = %fault.trace,
                            "Unhandled panic"
                        );
                    });
                    Response::builder().status(status).text(body)
                }
            }
        })
    }
}

/// Client-visible text for a fault: the status reason, or the panic message
/// and trace when exposed.
fn fault_body(fault: &Fault, expose_trace: bool) -> String {
    if expose_trace {
        format!("{fault}\n\n{}", fault.trace)
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
            .canonical_reason()
            .unwrap_or("Internal Server Error")
            .to_owned()
    }
}

// ── Fault boundary ────────────────────────────────────────────────────────────

/// A future whose panics are caught and returned as [`Fault`]s.
pub struct Supervised {
    inner: BoxFuture,
}

impl Supervised {
    pub fn new(inner: BoxFuture) -> Self {
        install_hook();
        Self { inner }
    }
}

impl Future for Supervised {
    type Output = Result<Response, Fault>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = {
            let _guard = Guarded::enter();
            panic::catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx)))
        };
        match polled {
            Ok(Poll::Ready(response)) => Poll::Ready(Ok(response)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(Fault::from_payload(payload))),
        }
    }
}

impl Fault {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };

        match LAST_PANIC.with(|slot| slot.borrow_mut().take()) {
            Some(Captured { location, trace }) => Self { message, location, trace },
            None => Self {
                message,
                location: None,
                trace: Backtrace::force_capture().to_string(),
            },
        }
    }
}

// ── Panic hook ────────────────────────────────────────────────────────────────

struct Captured {
    location: Option<String>,
    trace: String,
}

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

/// Marks the current thread as inside a fault boundary while alive.
struct Guarded;

impl Guarded {
    fn enter() -> Self {
        // A panic caught further in by the handler itself must not be
        // reported for a later fault.
        LAST_PANIC.with(|slot| slot.borrow_mut().take());
        DEPTH.with(|d| d.set(d.get() + 1));
        Self
    }
}

impl Drop for Guarded {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

fn install_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if DEPTH.with(Cell::get) == 0 {
                return previous(info);
            }
            let captured = Captured {
                location: info.location().map(ToString::to_string),
                trace: Backtrace::force_capture().to_string(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(captured));
        }));
    });
}
