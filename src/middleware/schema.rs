//! JSON-schema request-body gate.
//!
//! # Flow of one request
//!
//! ```text
//! body stream ──read all──▶ Bytes ──decode──▶ value 0, value 1, … ──validate each──┐
//!                                                                                   │
//!        all valid: same Bytes installed as a fresh body, next handler runs ◀───────┤
//!        any invalid: 400 + one NDJSON report line per failing document ◀───────────┘
//! ```
//!
//! The body may hold a single document or several concatenated /
//! newline-delimited ones; each is checked independently and every failure
//! is reported, not just the first. An empty body holds zero documents and
//! passes.

use std::path::Path;
use std::sync::Arc;

use http::StatusCode;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{ValidationError, Validator};
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::request::Request;
use crate::response::{ContentType, Response};

/// Loads and compiles the schema at `path` and returns a gate for it.
///
/// Fails if the file cannot be read, is not JSON, or is not a valid schema.
/// Call this while setting up routes and let the error end the process:
/// a route whose gate cannot be built must never serve.
pub fn validate_json_schema(path: impl AsRef<Path>) -> Result<SchemaGate, Error> {
    SchemaGate::from_path(path)
}

// ── Compiled schema ───────────────────────────────────────────────────────────

/// An immutable, compiled JSON schema.
pub struct CompiledSchema {
    validator: Validator,
    location: String,
}

/// The schema engine failed while checking a document. Unlike a validation
/// failure this says nothing about the document itself.
#[derive(Debug, thiserror::Error)]
#[error("schema engine failed on document {document}: {message}")]
pub struct EngineError {
    pub document: usize,
    pub message: String,
}

/// One failing document in a validation report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentReport {
    /// Zero-based position of the document in the body.
    pub document: usize,
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every document matched; `documents` may be zero.
    Valid { documents: usize },
    /// Reports for the failing documents only, in body order. Never empty.
    Invalid(Vec<DocumentReport>),
}

impl CompiledSchema {
    /// Relative `$ref`s in the file resolve against its own directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let read_error = |source| Error::SchemaRead { path: path.to_owned(), source };
        let canonical = path.canonicalize().map_err(read_error)?;
        let raw = std::fs::read(&canonical).map_err(read_error)?;
        let mut document: Value = serde_json::from_slice(&raw)
            .map_err(|source| Error::SchemaParse { path: path.to_owned(), source })?;
        anchor_to_file(&mut document, &canonical);
        Self::compile(&document, path.display().to_string())
    }

    pub fn from_value(document: &Value) -> Result<Self, Error> {
        Self::compile(document, "<inline>".to_owned())
    }

    fn compile(document: &Value, location: String) -> Result<Self, Error> {
        let validator = jsonschema::validator_for(document).map_err(|e| Error::SchemaCompile {
            location: location.clone(),
            message: e.to_string(),
        })?;
        Ok(Self { validator, location })
    }

    /// Where the schema was loaded from.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Decodes `body` as a sequence of JSON values and validates each one.
    ///
    /// Malformed JSON is reported as a failing document. The decoder cannot
    /// resynchronise after it, so it also ends the sequence.
    pub fn validate_documents(&self, body: &[u8]) -> Result<Outcome, EngineError> {
        let mut documents = 0;
        let mut reports = Vec::new();

        let stream = serde_json::Deserializer::from_slice(body).into_iter::<Value>();
        for (index, decoded) in stream.enumerate() {
            documents += 1;
            let value = match decoded {
                Ok(value) => value,
                Err(e) => {
                    reports.push(DocumentReport {
                        document: index,
                        valid: false,
                        errors: vec![format!("invalid JSON: {e}")],
                    });
                    break;
                }
            };

            let errors = self.check(index, &value)?;
            if !errors.is_empty() {
                reports.push(DocumentReport { document: index, valid: false, errors });
            }
        }

        if reports.is_empty() {
            Ok(Outcome::Valid { documents })
        } else {
            Ok(Outcome::Invalid(reports))
        }
    }

    fn check(&self, document: usize, value: &Value) -> Result<Vec<String>, EngineError> {
        let mut errors = Vec::new();
        for error in self.validator.iter_errors(value) {
            if is_engine_failure(&error) {
                return Err(EngineError { document, message: error.to_string() });
            }
            errors.push(describe(&error));
        }
        Ok(errors)
    }
}

/// Gives a root schema without an id of its own a `file://` one, which the
/// engine uses as the base URI for resolving references.
fn anchor_to_file(document: &mut Value, path: &Path) {
    let Some(object) = document.as_object_mut() else {
        return;
    };
    let draft4 = object
        .get("$schema")
        .and_then(Value::as_str)
        .is_some_and(|uri| uri.contains("draft-04"));
    let key = if draft4 { "id" } else { "$id" };
    if !object.contains_key(key) {
        object.insert(key.to_owned(), Value::String(format!("file://{}", path.display())));
    }
}

/// Errors raised by the engine itself (unresolvable references, regex
/// backtracking limits) rather than by the document.
fn is_engine_failure(error: &ValidationError<'_>) -> bool {
    matches!(
        error.kind,
        ValidationErrorKind::Referencing(_) | ValidationErrorKind::BacktrackLimitExceeded { .. }
    )
}

fn describe(error: &ValidationError<'_>) -> String {
    let path = error.instance_path.to_string();
    let at = if path.is_empty() { "(root)" } else { path.as_str() };
    format!("{at}: {error}")
}

// ── Gate middleware ───────────────────────────────────────────────────────────

/// Middleware that only lets requests through whose body matches a schema.
///
/// Cheap to clone; all clones share one compiled schema.
#[derive(Clone)]
pub struct SchemaGate {
    schema: Arc<CompiledSchema>,
}

impl SchemaGate {
    pub fn new(schema: CompiledSchema) -> Self {
        Self { schema: Arc::new(schema) }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        CompiledSchema::from_path(path).map(Self::new)
    }

    pub fn from_value(document: &Value) -> Result<Self, Error> {
        CompiledSchema::from_value(document).map(Self::new)
    }

    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    /// Puts the gate in front of `handler`.
    pub fn wrap(&self, handler: impl Handler) -> BoxedHandler {
        BoxedHandler::new(Gate { schema: Arc::clone(&self.schema), next: handler.into_boxed_handler() })
    }
}

struct Gate {
    schema: Arc<CompiledSchema>,
    next: BoxedHandler,
}

impl ErasedHandler for Gate {
    fn call(&self, mut req: Request) -> BoxFuture {
        let schema = Arc::clone(&self.schema);
        let next = self.next.clone();

        Box::pin(async move {
            let body = match req.take_body().to_bytes().await {
                Ok(body) => body,
                Err(e) => {
                    return Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .text(format!("Failed to read body: {e}"));
                }
            };

            match refusal(schema.validate_documents(&body)) {
                Some(response) => response,
                None => {
                    req.set_body(body);
                    next.call(req).await
                }
            }
        })
    }
}

/// The response that stops a request, or `None` when every document is
/// valid and the request may go on.
fn refusal(verdict: Result<Outcome, EngineError>) -> Option<Response> {
    match verdict {
        Ok(Outcome::Valid { .. }) => None,
        Ok(Outcome::Invalid(reports)) => Some(rejection(&reports)),
        Err(e) => Some(
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .text(format!("Failed to validate: {e}")),
        ),
    }
}

/// `400` with one JSON report per line.
fn rejection(reports: &[DocumentReport]) -> Response {
    let mut body = Vec::new();
    for report in reports {
        // Serializing plain strings, numbers and bools into a Vec cannot fail.
        if serde_json::to_writer(&mut body, report).is_ok() {
            body.push(b'\n');
        }
    }
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .bytes(ContentType::NdJson, body)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn id_schema() -> CompiledSchema {
        CompiledSchema::from_value(&json!({"type": "object", "required": ["id"]})).unwrap()
    }

    #[test]
    fn single_valid_document() {
        let outcome = id_schema().validate_documents(br#"{"id":1}"#).unwrap();
        assert_eq!(outcome, Outcome::Valid { documents: 1 });
    }

    #[test]
    fn concatenated_and_newline_delimited_documents() {
        let schema = id_schema();
        assert_eq!(
            schema.validate_documents(br#"{"id":1}{"id":2}"#).unwrap(),
            Outcome::Valid { documents: 2 }
        );
        assert_eq!(
            schema.validate_documents(b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n").unwrap(),
            Outcome::Valid { documents: 3 }
        );
    }

    #[test]
    fn empty_and_blank_bodies_hold_zero_documents() {
        let schema = id_schema();
        assert_eq!(schema.validate_documents(b"").unwrap(), Outcome::Valid { documents: 0 });
        assert_eq!(schema.validate_documents(b" \n\t").unwrap(), Outcome::Valid { documents: 0 });
    }

    #[test]
    fn reports_every_failing_document_in_order() {
        let body = br#"{"name":"a"} {"id":2} {"name":"c"}"#;
        let Outcome::Invalid(reports) = id_schema().validate_documents(body).unwrap() else {
            panic!("expected failures");
        };

        let failing: Vec<usize> = reports.iter().map(|r| r.document).collect();
        assert_eq!(failing, vec![0, 2]);
        assert!(reports.iter().all(|r| !r.valid));
        assert!(reports[0].errors[0].starts_with("(root): "));
        assert!(reports[0].errors[0].contains("id"));
    }

    #[test]
    fn nested_errors_carry_their_location() {
        let schema = CompiledSchema::from_value(&json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}}
        }))
        .unwrap();

        let Outcome::Invalid(reports) = schema.validate_documents(br#"{"id":"x"}"#).unwrap() else {
            panic!("expected failure");
        };
        assert!(reports[0].errors[0].starts_with("/id: "));
    }

    #[test]
    fn malformed_json_ends_the_sequence() {
        let Outcome::Invalid(reports) =
            id_schema().validate_documents(br#"{"id":1} {"id": } {"id":3}"#).unwrap()
        else {
            panic!("expected failure");
        };

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].document, 1);
        assert!(reports[0].errors[0].starts_with("invalid JSON"));
    }

    #[test]
    fn report_serializes_validity_and_errors() {
        let report = DocumentReport { document: 0, valid: false, errors: vec!["bad".into()] };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"document": 0, "valid": false, "errors": ["bad"]})
        );
    }

    #[test]
    fn reference_failures_are_engine_failures() {
        let dangling = ValidationError::from(jsonschema::ReferencingError::PointerToNowhere {
            pointer: "/definitions/missing".to_owned(),
        });
        assert!(is_engine_failure(&dangling));

        let unreachable = ValidationError::from(jsonschema::ReferencingError::Unretrievable {
            uri: "file:///nowhere/id.json".to_owned(),
            source: "not found".into(),
        });
        assert!(is_engine_failure(&unreachable));
    }

    #[test]
    fn document_errors_are_not_engine_failures() {
        let schema = jsonschema::validator_for(&json!({"type": "integer"})).unwrap();
        let value = json!("x");
        let errors: Vec<_> = schema.iter_errors(&value).collect();
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|e| !is_engine_failure(e)));
    }

    #[tokio::test]
    async fn engine_error_stops_the_request_with_500() {
        let response = refusal(Err(EngineError { document: 2, message: "pointer".to_owned() }))
            .expect("engine errors stop the request");
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().to_bytes().await.unwrap();
        let body = String::from_utf8_lossy(&body);
        assert!(body.starts_with("Failed to validate: "), "{body}");
        assert!(body.contains("document 2"), "{body}");
    }

    #[test]
    fn only_a_valid_verdict_lets_the_request_through() {
        assert!(refusal(Ok(Outcome::Valid { documents: 0 })).is_none());

        let report = DocumentReport { document: 0, valid: false, errors: vec!["bad".into()] };
        let response = refusal(Ok(Outcome::Invalid(vec![report]))).unwrap();
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn file_schemas_get_a_base_uri_unless_they_have_one() {
        let path = Path::new("/srv/schemas/user.json");

        let mut plain = json!({"type": "object"});
        anchor_to_file(&mut plain, path);
        assert_eq!(plain["$id"], "file:///srv/schemas/user.json");

        let mut draft4 = json!({"$schema": "http://json-schema.org/draft-04/schema#"});
        anchor_to_file(&mut draft4, path);
        assert_eq!(draft4["id"], "file:///srv/schemas/user.json");
        assert!(draft4.get("$id").is_none());

        let mut named = json!({"$id": "https://example.com/user.json"});
        anchor_to_file(&mut named, path);
        assert_eq!(named["$id"], "https://example.com/user.json");
    }

    #[test]
    fn invalid_schema_does_not_compile() {
        let err = CompiledSchema::from_value(&json!({"type": 12})).err().unwrap();
        assert!(matches!(err, Error::SchemaCompile { .. }));
    }
}
