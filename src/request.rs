//! Incoming HTTP request type.

use std::collections::HashMap;
use std::mem;
use std::net::SocketAddr;

use http::{HeaderMap, Method, Uri, Version};

use crate::body::Body;

/// An incoming HTTP request.
///
/// The body is a stream. Middleware that needs the bytes reads it with
/// [`take_body`](Request::take_body) and, when the request should go on,
/// puts an equivalent body back with [`set_body`](Request::set_body).
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    pub(crate) fn from_incoming(
        req: http::Request<hyper::body::Incoming>,
        remote_addr: SocketAddr,
    ) -> Self {
        Self::from(req.map(Body::new)).with_remote_addr(remote_addr)
    }

    /// Sets the peer address, as the server does for every accepted
    /// connection.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Takes the body out, leaving an empty one in its place.
    pub fn take_body(&mut self) -> Body {
        mem::take(&mut self.body)
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }
}

impl From<http::Request<Body>> for Request {
    fn from(req: http::Request<Body>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            remote_addr: None,
        }
    }
}
