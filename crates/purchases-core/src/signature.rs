//! Structural identity of a logical request.
//!
//! Two requests with equal signatures are the same operation for both
//! coalescing and conditional caching, whoever issued them.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method, path (with path parameters already substituted) and a stable
/// serialization of the body.
///
/// Bodies are normalised through `serde_json::Value`, whose object maps are
/// key-ordered, so field order in the caller's struct never changes the
/// signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature {
    method: HttpMethod,
    path: String,
    body: Option<String>,
}

impl RequestSignature {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// Build a signature carrying a JSON body.
    pub fn with_body<B: Serialize>(
        method: HttpMethod,
        path: impl Into<String>,
        body: &B,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(body)?;
        Ok(Self {
            method,
            path: path.into(),
            body: Some(value.to_string()),
        })
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, serde_json::Error> {
        Self::with_body(HttpMethod::Post, path, body)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Canonical JSON body, if any.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Flat string key used to namespace persisted state for this signature.
    ///
    /// Bodies are folded into a blake3 digest so keys stay short regardless
    /// of payload size.
    pub fn cache_key(&self) -> String {
        match &self.body {
            Some(body) => {
                let digest = blake3::hash(body.as_bytes()).to_hex();
                format!("{} {} #{}", self.method, self.path, &digest[..32])
            }
            None => format!("{} {}", self.method, self.path),
        }
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
