//! Middleware layer.
//!
//! Every middleware takes a [`Handler`](crate::Handler) and returns a
//! [`BoxedHandler`], so layers stack by plain function application:
//!
//! ```text
//! schema gate  → rejects bad bodies before anything else sees them
//!   recovery   → turns a panic anywhere below into a 500
//!     logging  → one record per request, measuring only the application
//!       application handler
//! ```
//!
//! [`stack`] builds exactly that order; the server uses it for you.

mod logging;
mod observe;
mod recover;
mod schema;

pub use logging::{MAX_LOGGED_BODY, with_request_logging};
pub use observe::{Observation, ObservedBody, observe};
pub use recover::{Fault, Recovery, Supervised, with_recovery};
pub use schema::{
    CompiledSchema, DocumentReport, EngineError, Outcome, SchemaGate, validate_json_schema,
};

use crate::handler::{BoxedHandler, Handler};

/// Applies the standard chain around `app`: gate (if any) → recovery →
/// logging → `app`.
pub fn stack(app: impl Handler, recovery: Recovery, gate: Option<&SchemaGate>) -> BoxedHandler {
    let logger = recovery.logger().clone();
    let handler = recovery.wrap(with_request_logging(app, logger));
    match gate {
        Some(gate) => gate.wrap(handler),
        None => handler,
    }
}
