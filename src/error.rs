//! Unified error type.

use std::path::PathBuf;

/// The error type returned by sluice's fallible operations.
///
/// Request-level failures (unreadable body, schema violations, handler
/// panics) are expressed as HTTP [`Response`](crate::Response) values, not as
/// `Error`s. This type surfaces configuration and infrastructure failures:
/// a schema that cannot be loaded, a bad port, binding or accepting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read schema {}: {source}", path.display())]
    SchemaRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema {} is not valid JSON: {source}", path.display())]
    SchemaParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("schema {location} does not compile: {message}")]
    SchemaCompile { location: String, message: String },

    #[error("config: {0}")]
    Config(String),
}

/// Boxed error used for body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
