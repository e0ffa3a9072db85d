//! HTTP server and graceful shutdown.
//!
//! The server wraps the application in the standard middleware chain
//! (see [`middleware::stack`](crate::middleware::stack)) and serves it over
//! HTTP/1.1 and HTTP/2.
//!
//! # Failure policy
//!
//! A listener that cannot bind, or an accept loop that hits a non-transient
//! error, ends [`Server::serve`] with an error. [`run_http`] turns that into
//! process exit: restarting is the supervisor's job.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server:
//! 1. Immediately stops `listener.accept()` — no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns `Ok(())` from [`Server::serve`].

use std::io;
use std::net::SocketAddr;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::logger::Logger;
use crate::middleware::{self, Recovery, SchemaGate};
use crate::request::Request;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    logger: Logger,
    gate: Option<SchemaGate>,
    expose_fault_trace: bool,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. Logs go to [`Logger::current`] until [`logger`](Server::logger)
    /// says otherwise.
    pub fn bind(addr: SocketAddr) -> Self {
        Self { addr, logger: Logger::current(), gate: None, expose_fault_trace: false }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::bind(config.addr())
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Validates every request body against `gate` before anything else runs.
    pub fn schema_gate(mut self, gate: SchemaGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sends panic messages and traces to clients. Off by default.
    pub fn expose_fault_trace(mut self, expose: bool) -> Self {
        self.expose_fault_trace = expose;
        self
    }

    /// Binds and serves `handler` until shutdown or a fatal listener error.
    pub async fn serve(self, handler: impl Handler) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, handler).await
    }

    /// Like [`serve`](Server::serve) on an already bound listener.
    pub async fn serve_listener(self, listener: TcpListener, handler: impl Handler) -> Result<(), Error> {
        let recovery = Recovery::new(self.logger.clone()).expose_trace(self.expose_fault_trace);
        let app = middleware::stack(handler, recovery, self.gate.as_ref());
        let logger = self.logger;
        let addr = listener.local_addr()?;

        logger.in_scope(|| info!(addr = %addr, "sluice listening"));

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM immediately stops
                // accepting new connections, even if more are queued.
                biased;

                () = &mut shutdown => {
                    logger.in_scope(|| {
                        info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    });
                    break Ok(());
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) if is_transient(&e) => {
                            logger.in_scope(|| warn!("accept error: {e}"));
                            continue;
                        }
                        Err(e) => break Err(Error::Io(e)),
                    };

                    let app = app.clone();
                    let logger = logger.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = app.clone();
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            logger.in_scope(|| error!(peer = %remote_addr, "connection error: {e}"));
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };

        // Drain: wait for every in-flight connection to finish before we return.
        while tasks.join_next().await.is_some() {}

        logger.in_scope(|| info!("sluice stopped"));
        result
    }
}

/// Starts `handler` on the port named by `SERVICE_PORT` (default 8080) with
/// logging and panic recovery, and never comes back on failure: a bad port
/// or a dead listener is logged and the process exits with status 1.
pub async fn run_http(service_name: &str, logger: Logger, handler: impl Handler) {
    let config = match Config::from_env(service_name) {
        Ok(config) => config,
        Err(e) => fatal(&logger, &e),
    };

    logger.in_scope(|| info!("Starting {} on port {}", config.service_name, config.port));

    if let Err(e) = Server::from_config(&config).logger(logger.clone()).serve(handler).await {
        fatal(&logger, &e);
    }
}

fn fatal(logger: &Logger, e: &Error) -> ! {
    logger.in_scope(|| error!("{e}"));
    std::process::exit(1)
}

/// Accept errors that concern one connection rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the middleware chain.
///
/// The error type is [`Infallible`](std::convert::Infallible): every failure
/// is already a response by the time it gets here.
async fn dispatch(
    app: BoxedHandler,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<crate::Body>, std::convert::Infallible> {
    let response = app.call(Request::from_incoming(req, remote_addr)).await;
    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C). If a
/// handler cannot be installed, that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    // `pending()` is a future that never resolves — on non-Unix platforms
    // the SIGTERM arm is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
