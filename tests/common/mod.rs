//! Shared test helpers.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Method, StatusCode};
use sluice::{Body, BoxFuture, BoxedHandler, Logger, Request, Response};
use tracing::Level;

/// In-memory log sink. Hands out a [`Logger`] whose records land here.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn logger(&self) -> Logger {
        let sink = self.clone();
        Logger::from_subscriber(
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_max_level(Level::TRACE)
                .with_writer(move || sink.clone())
                .finish(),
        )
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Log lines that start a record at `level` (continuation lines of
    /// multi-line fields are not counted).
    pub fn records_at(&self, level: &str) -> usize {
        self.contents()
            .lines()
            .filter(|line| line.split_whitespace().nth(1) == Some(level))
            .count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Counts how often a handler ran and keeps the last body it saw.
#[derive(Clone, Default)]
pub struct Probe {
    calls: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Bytes>>>,
}

impl Probe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Bytes> {
        self.last_body.lock().unwrap().clone()
    }

    /// A handler that records its input and answers `200 ok`.
    pub fn handler(&self) -> impl Fn(Request) -> BoxFuture + Send + Sync + use<> {
        let probe = self.clone();
        move |mut req: Request| {
            let probe = probe.clone();
            let fut: BoxFuture = Box::pin(async move {
                probe.calls.fetch_add(1, Ordering::SeqCst);
                let body = req.take_body().to_bytes().await.unwrap_or_default();
                *probe.last_body.lock().unwrap() = Some(body);
                Response::text("ok")
            });
            fut
        }
    }
}

pub fn post(uri: &str, body: impl Into<Body>) -> Request {
    Request::from(
        http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(body.into())
            .unwrap(),
    )
}

pub fn get(uri: &str) -> Request {
    Request::from(
        http::Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
}

/// Runs `req` through `handler` and reads the whole response.
pub async fn send(handler: &BoxedHandler, req: Request) -> (StatusCode, String) {
    let response = handler.call(req).await;
    let status = response.status_code();
    let body = response.into_body().to_bytes().await.unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}
