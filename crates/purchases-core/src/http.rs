//! Transport-level values: status codes, outgoing requests, raw responses.

use crate::signature::{HttpMethod, RequestSignature};
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outgoing header carrying the last known validation tag.
pub const VALIDATION_TAG_REQUEST_HEADER: &str = "If-None-Match";

/// Response header the server uses to issue a validation tag.
pub const VALIDATION_TAG_RESPONSE_HEADER: &str = "ETag";

/// Result of one network call. Consumed immediately by the cache store and
/// the classifier.
pub type ExchangeOutcome = Result<HttpResponse, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HttpStatus(u16);

impl HttpStatus {
    pub const OK: HttpStatus = HttpStatus(200);
    pub const CREATED: HttpStatus = HttpStatus(201);
    pub const NOT_MODIFIED: HttpStatus = HttpStatus(304);
    pub const BAD_REQUEST: HttpStatus = HttpStatus(400);
    pub const UNAUTHORIZED: HttpStatus = HttpStatus(401);
    pub const NOT_FOUND: HttpStatus = HttpStatus(404);
    pub const INTERNAL_SERVER_ERROR: HttpStatus = HttpStatus(500);
    pub const SERVICE_UNAVAILABLE: HttpStatus = HttpStatus(503);

    pub const fn new(code: u16) -> Self {
        HttpStatus(code)
    }

    pub const fn code(&self) -> u16 {
        self.0
    }

    pub fn is_successful(&self) -> bool {
        (200..=299).contains(&self.0)
    }

    pub fn is_not_modified(&self) -> bool {
        self.0 == Self::NOT_MODIFIED.0
    }

    pub fn is_server_error(&self) -> bool {
        (500..=599).contains(&self.0)
    }

    /// Whether the server durably stored the request even though it may have
    /// rejected part of it. Server errors and 404 are the only rejections
    /// that mean nothing was stored.
    pub fn is_successfully_synced(&self) -> bool {
        !self.is_server_error() && *self != Self::NOT_FOUND
    }

    /// Whether locally known purchases may be finished after this response.
    pub fn is_finishable(&self) -> bool {
        !self.is_server_error()
    }
}

impl From<u16> for HttpStatus {
    fn from(code: u16) -> Self {
        HttpStatus(code)
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully prepared exchange handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    pub fn from_signature(signature: &RequestSignature) -> Self {
        Self {
            method: signature.method(),
            path: signature.path().to_string(),
            body: signature.body().map(|b| b.as_bytes().to_vec()),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn validation_tag(&self) -> Option<&str> {
        self.header(VALIDATION_TAG_REQUEST_HEADER)
    }
}

/// What came back when the transport reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: HttpStatus,
    pub validation_tag: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: HttpStatus(status),
            validation_tag: None,
            body: body.into(),
        }
    }

    pub fn not_modified() -> Self {
        Self::new(HttpStatus::NOT_MODIFIED.code(), Vec::new())
    }

    pub fn with_validation_tag(mut self, tag: impl Into<String>) -> Self {
        self.validation_tag = Some(tag.into());
        self
    }

    /// Body rendered for diagnostics; invalid UTF-8 is replaced.
    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_classes() {
        assert!(HttpStatus::OK.is_successful());
        assert!(HttpStatus::new(299).is_successful());
        assert!(!HttpStatus::NOT_MODIFIED.is_successful());
        assert!(HttpStatus::NOT_MODIFIED.is_not_modified());
        assert!(HttpStatus::SERVICE_UNAVAILABLE.is_server_error());
        assert!(!HttpStatus::BAD_REQUEST.is_server_error());
    }

    #[test]
    fn test_successfully_synced_groups() {
        assert!(HttpStatus::OK.is_successfully_synced());
        assert!(HttpStatus::BAD_REQUEST.is_successfully_synced());
        assert!(HttpStatus::UNAUTHORIZED.is_successfully_synced());
        assert!(HttpStatus::new(422).is_successfully_synced());

        assert!(!HttpStatus::NOT_FOUND.is_successfully_synced());
        assert!(!HttpStatus::INTERNAL_SERVER_ERROR.is_successfully_synced());
        assert!(!HttpStatus::SERVICE_UNAVAILABLE.is_successfully_synced());
    }

    #[test]
    fn test_finishable_groups() {
        assert!(HttpStatus::NOT_FOUND.is_finishable());
        assert!(HttpStatus::BAD_REQUEST.is_finishable());
        assert!(!HttpStatus::new(502).is_finishable());
    }

    #[test]
    fn test_request_from_signature() {
        let signature = RequestSignature::post("/receipts", &json!({"fetch_token": "t"})).unwrap();
        let request = HttpRequest::from_signature(&signature)
            .with_header(VALIDATION_TAG_REQUEST_HEADER, "abc");

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, "/receipts");
        assert_eq!(request.body.as_deref(), Some(br#"{"fetch_token":"t"}"#.as_slice()));
        assert_eq!(request.validation_tag(), Some("abc"));
    }
}
