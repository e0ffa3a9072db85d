//! # sluice
//!
//! HTTP middleware for small services: JSON-schema request-body gates,
//! panic recovery, per-request logging, and a one-call server that wires
//! them around your application.
//!
//! ## The chain
//!
//! ```text
//! request ─▶ schema gate ─▶ recovery ─▶ logging ─▶ your handler
//! ```
//!
//! - **Schema gate** — buffers the body, decodes one or many concatenated
//!   JSON documents, validates each against a compiled schema, and either
//!   forwards the exact original bytes or answers `400` with a report.
//! - **Recovery** — a panic inside a handler becomes a logged `500`; the
//!   server and every other request carry on.
//! - **Logging** — one structured `tracing` record per request with status,
//!   size and latency, measured by observing the response body as it is sent.
//!
//! Loggers are injected, never global: every middleware takes a [`Logger`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sluice::{Logger, Request, Response, Router, run_http};
//! use sluice::middleware::validate_json_schema;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sluice::Error> {
//!     let logger = Logger::from_env();
//!
//!     // A schema that cannot be loaded stops the process here, before
//!     // any traffic is accepted.
//!     let users = validate_json_schema("schemas/user.json")?;
//!
//!     let app = Router::new()
//!         .post("/users", users.wrap(create_user))
//!         .get("/users/{id}", get_user);
//!
//!     run_http("users", logger, app).await;
//!     Ok(())
//! }
//!
//! async fn create_user(mut req: Request) -> Response {
//!     // The gate put the validated bytes back; read them as usual.
//!     let body = req.take_body().to_bytes().await.unwrap_or_default();
//!     Response::json(body.to_vec())
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//! ```

mod body;
mod config;
mod error;
mod handler;
mod logger;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use body::Body;
pub use config::{Config, DEFAULT_PORT, PORT_VAR};
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, BoxedHandler, Handler};
pub use logger::Logger;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{Server, run_http};
