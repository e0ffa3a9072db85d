//! Per-request access log.

use std::time::Instant;

use http::{Method, Uri, Version};
use tracing::{error, info, warn};

use super::observe::{Observation, observe};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::logger::Logger;
use crate::request::Request;

/// Most response-body bytes copied into a 4xx/5xx log record.
pub const MAX_LOGGED_BODY: usize = 8 * 1024;

/// Wraps `handler` so every completed request produces exactly one log record.
///
/// The record is emitted once the response body has been sent and carries
/// `status`, `remote`, `method`, `proto`, `uri`, `took` and `size`.
/// Responses below 400 log at `INFO`, 4xx at `WARN` and 5xx at `ERROR`;
/// the latter two also carry the response body text (first
/// [`MAX_LOGGED_BODY`] bytes).
pub fn with_request_logging(handler: impl Handler, logger: Logger) -> BoxedHandler {
    BoxedHandler::new(RequestLogging { inner: handler.into_boxed_handler(), logger })
}

struct RequestLogging {
    inner: BoxedHandler,
    logger: Logger,
}

impl ErasedHandler for RequestLogging {
    fn call(&self, req: Request) -> BoxFuture {
        let line = RequestLine::of(&req);
        let started = Instant::now();
        let logger = self.logger.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = fut.await;
            let capture = response.status_code().as_u16() >= 400;
            observe(response, started, capture, MAX_LOGGED_BODY, move |obs| {
                logger.in_scope(|| line.log(&obs));
            })
        })
    }
}

/// The request fields a log record needs, detached from the request so the
/// request itself can move on to the handler.
pub(crate) struct RequestLine {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) remote: String,
}

impl RequestLine {
    pub(crate) fn of(req: &Request) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            remote: req.remote_addr().map_or_else(|| "-".to_owned(), |a| a.to_string()),
        }
    }

    fn log(&self, obs: &Observation) {
        let status = obs.status.as_u16();
        let reason = obs.status.canonical_reason().unwrap_or("Unknown");
        let took = obs.elapsed();
        let Self { method, uri, version, remote } = self;

        match status {
            0..=399 => info!(
                status = status, remote = %remote, method = %method, proto = ?version,
                uri = %uri, took = ?took, size = obs.size,
                "{reason}"
            ),
            400..=499 => warn!(
                status = status, remote = %remote, method = %method, proto = ?version,
                uri = %uri, took = ?took, size = obs.size,
                body = %obs.captured_text().unwrap_or_default(),
                "{reason}"
            ),
            _ => error!(
                status = status, remote = %remote, method = %method, proto = ?version,
                uri = %uri, took = ?took, size = obs.size,
                body = %obs.captured_text().unwrap_or_default(),
                "{reason}"
            ),
        }
    }
}
