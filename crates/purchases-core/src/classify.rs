//! Raw exchange outcome -> typed payload or typed error.
//!
//! Classification always produces a result. A body that cannot be parsed as
//! an error response still yields a backend error with a missing code; the
//! secondary decoding failure is never surfaced as the primary error.

use crate::error::{BackendError, BackendErrorCode, ClassifiedResult, RequestError};
use crate::http::{ExchangeOutcome, HttpResponse, HttpStatus};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

const CODE_KEY: &str = "code";
const MESSAGE_KEY: &str = "message";
const ATTRIBUTE_ERRORS_KEY: &str = "attribute_errors";
const ATTRIBUTES_ERROR_RESPONSE_KEY: &str = "attributes_error_response";
const ATTRIBUTE_KEY_NAME: &str = "key_name";

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseClassifier;

impl ResponseClassifier {
    /// Classify an outcome into a schema-agnostic JSON payload.
    ///
    /// Typed decoding happens separately in [`ResponseClassifier::decode`] so
    /// one classified payload can be shared by callers expecting different
    /// shapes.
    pub fn classify(outcome: ExchangeOutcome) -> ClassifiedResult<Value> {
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "exchange failed before reaching the server");
                return Err(RequestError::Network(e));
            }
        };

        if response.status.is_successful() {
            Self::classify_success(response)
        } else if response.status.is_not_modified() {
            warn!("server answered not-modified but no cached body was available");
            Err(RequestError::malformed(
                "not modified without a cached response body",
                response.body_lossy(),
            ))
        } else {
            let error = Self::backend_error(response.status, &response.body);
            debug!(status = %error.status, code = %error.code, "server rejected request");
            Err(RequestError::from_backend(error))
        }
    }

    /// Decode a classified payload into the caller's expected shape. Fields
    /// the shape does not declare are ignored.
    pub fn decode<T: DeserializeOwned>(payload: Value) -> ClassifiedResult<T> {
        serde_json::from_value::<T>(payload.clone()).map_err(|e| {
            warn!(error = %e, "response body does not match the expected schema");
            RequestError::malformed(e.to_string(), payload.to_string())
        })
    }

    /// Classify and decode in one step.
    pub fn classify_as<T: DeserializeOwned>(outcome: ExchangeOutcome) -> ClassifiedResult<T> {
        Self::classify(outcome).and_then(Self::decode)
    }

    fn classify_success(response: HttpResponse) -> ClassifiedResult<Value> {
        let payload: Value = match serde_json::from_slice(&response.body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(status = %response.status, error = %e, "successful response with unparseable body");
                return Err(RequestError::malformed(e.to_string(), response.body_lossy()));
            }
        };

        // A success status can still carry attribute-level rejections; the
        // request was stored, only those attributes were refused.
        let partial = payload
            .get(ATTRIBUTES_ERROR_RESPONSE_KEY)
            .map(attribute_error_pairs)
            .unwrap_or_default();
        if !partial.is_empty() {
            let nested = payload.get(ATTRIBUTES_ERROR_RESPONSE_KEY);
            let error = BackendError::new(
                response.status,
                nested.map(declared_code).unwrap_or(BackendErrorCode::Missing),
            )
            .with_message(nested.and_then(declared_message))
            .with_attribute_errors(partial);
            debug!(
                status = %response.status,
                attributes = error.attribute_errors.len(),
                "successful response carried attribute errors"
            );
            return Err(RequestError::from_backend(error));
        }

        Ok(payload)
    }

    /// Parse an error body. Anything unreadable degrades to a missing code.
    pub fn backend_error(status: HttpStatus, body: &[u8]) -> BackendError {
        let payload: Value = serde_json::from_slice(body).unwrap_or(Value::Null);

        let mut pairs = attribute_error_pairs(&payload);
        if let Some(nested) = payload.get(ATTRIBUTES_ERROR_RESPONSE_KEY) {
            pairs.extend(attribute_error_pairs(nested));
        }

        BackendError::new(status, declared_code(&payload))
            .with_message(declared_message(&payload))
            .with_attribute_errors(pairs)
    }
}

fn declared_code(payload: &Value) -> BackendErrorCode {
    match payload.get(CODE_KEY) {
        Some(Value::Number(n)) => n
            .as_i64()
            .map(BackendErrorCode::from_code)
            .unwrap_or(BackendErrorCode::Missing),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(BackendErrorCode::from_code)
            .unwrap_or(BackendErrorCode::Missing),
        _ => BackendErrorCode::Missing,
    }
}

fn declared_message(payload: &Value) -> Option<String> {
    payload
        .get(MESSAGE_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Ordered (key, message) pairs from `{"attribute_errors": ...}`.
///
/// The list form `[{"key_name", "message"}]` is what the server sends; a
/// plain object map is accepted too. Malformed entries are skipped.
fn attribute_error_pairs(container: &Value) -> Vec<(String, String)> {
    match container.get(ATTRIBUTE_ERRORS_KEY) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let key = item.get(ATTRIBUTE_KEY_NAME)?.as_str()?;
                let message = item.get(MESSAGE_KEY)?.as_str()?;
                Some((key.to_string(), message.to_string()))
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, message)| Some((key.clone(), message.as_str()?.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}
