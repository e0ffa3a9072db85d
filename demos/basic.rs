//! Minimal sluice example — a schema-gated JSON endpoint, a route that
//! panics, and the standard logging / recovery chain around both.
//!
//! Run with:
//!   RUST_LOG=info SERVICE_PORT=3000 cargo run --example basic
//!
//! Try:
//!   curl -X POST http://localhost:3000/users -d '{"id":1,"name":"alice"}'
//!   curl -X POST http://localhost:3000/users -d '{"id":1}{"id":2}'
//!   curl -X POST http://localhost:3000/users -d '{"name":"alice"}'   # 400
//!   curl http://localhost:3000/users/42
//!   curl http://localhost:3000/boom                                    # 500, server keeps going

use sluice::middleware::validate_json_schema;
use sluice::{Logger, Request, Response, Router, run_http};

#[tokio::main]
async fn main() -> Result<(), sluice::Error> {
    let logger = Logger::from_env();

    let schema = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/schemas/user.json");
    let users = validate_json_schema(schema)?;

    let app = Router::new()
        .post("/users", users.wrap(create_users))
        .get("/users/{id}", get_user)
        .get("/boom", boom);

    run_http("basic", logger, app).await;
    Ok(())
}

// POST /users
//
// The body has already been validated; it may hold several documents.
async fn create_users(mut req: Request) -> Response {
    let body = req.take_body().to_bytes().await.unwrap_or_default();
    let count = serde_json::Deserializer::from_slice(&body)
        .into_iter::<serde_json::Value>()
        .count();

    Response::builder()
        .status(http::StatusCode::CREATED)
        .json(format!(r#"{{"created":{count}}}"#).into_bytes())
}

// GET /users/{id}
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}

// GET /boom
async fn boom(_req: Request) -> Response {
    panic!("boom");
}
