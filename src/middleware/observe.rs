//! Response observer.
//!
//! Wraps a response body and records what actually went out: the status,
//! the number of body bytes handed to the transport, and optionally a copy of
//! those bytes. The wrapped body behaves exactly like the original one.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::body::Body;
use crate::error::BoxError;
use crate::response::Response;

/// What the observer saw for one response.
#[derive(Clone, Debug)]
pub struct Observation {
    pub status: StatusCode,
    /// Data bytes handed to the transport.
    pub size: u64,
    pub started: Instant,
    /// Copy of the first bytes written, when capture was requested.
    pub captured: Option<Vec<u8>>,
    /// `false` when the body ended in an error or was dropped unfinished.
    pub complete: bool,
}

impl Observation {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Captured bytes as text, lossy.
    pub fn captured_text(&self) -> Option<String> {
        self.captured.as_deref().map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

type OnComplete = Box<dyn FnOnce(Observation) + Send>;

/// A body that counts (and optionally copies) the frames it passes through.
///
/// `on_complete` runs exactly once: at end of stream, on a body error, or
/// when the body is dropped before it finished.
pub struct ObservedBody {
    inner: Body,
    observation: Observation,
    capture_limit: usize,
    on_complete: Option<OnComplete>,
}

impl ObservedBody {
    fn new(inner: Body, observation: Observation, capture_limit: usize, on_complete: OnComplete) -> Self {
        Self { inner, observation, capture_limit, on_complete: Some(on_complete) }
    }

    fn record(&mut self, data: &Bytes) {
        self.observation.size += data.len() as u64;
        if let Some(buf) = self.observation.captured.as_mut() {
            let room = self.capture_limit.saturating_sub(buf.len());
            buf.extend_from_slice(&data[..room.min(data.len())]);
        }
    }

    fn finish(&mut self, complete: bool) {
        if let Some(on_complete) = self.on_complete.take() {
            self.observation.complete = complete;
            on_complete(self.observation.clone());
        }
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.record(data);
                }
                if this.inner.is_end_stream() {
                    this.finish(true);
                }
            }
            Poll::Ready(Some(Err(_))) => this.finish(false),
            Poll::Ready(None) => this.finish(true),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        let complete = self.inner.is_end_stream();
        self.finish(complete);
    }
}

/// Wraps `response` so that `on_complete` receives an [`Observation`] once
/// its body has been fully sent (or abandoned).
///
/// Up to `capture_limit` body bytes are copied into the observation when
/// `capture` is set. Capture never consumes the body: the client still
/// receives every byte.
pub fn observe(
    response: Response,
    started: Instant,
    capture: bool,
    capture_limit: usize,
    on_complete: impl FnOnce(Observation) + Send + 'static,
) -> Response {
    let observation = Observation {
        status: response.status_code(),
        size: 0,
        started,
        captured: capture.then(Vec::new),
        complete: false,
    };
    response.map_body(|body| {
        Body::new(ObservedBody::new(body, observation, capture_limit, Box::new(on_complete)))
    })
}
