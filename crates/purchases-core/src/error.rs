//! Error taxonomy delivered to callers of the request layer.

use crate::http::HttpStatus;
use crate::transport::TransportError;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// The only thing ever delivered to callers.
pub type ClassifiedResult<T> = Result<T, RequestError>;

/// Machine-readable error codes declared by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorCode {
    InvalidPlatform,
    StoreProblem,
    CannotTransferPurchase,
    InvalidReceiptToken,
    InvalidAppStoreSharedSecret,
    InvalidPaymentModeOrIntroPriceNotProvided,
    ProductIdsMalformed,
    InternalServerError,
    InvalidAppUserId,
    InvalidApiKey,
    BadRequest,
    PlayStoreQuotaExceeded,
    PlayStoreInvalidPackageName,
    PlayStoreGenericError,
    UserIneligibleForPromoOffer,
    InvalidAppleSubscriptionKey,
    InvalidSubscriberAttributes,
    InvalidSubscriberAttributesBody,
    PurchasedProductMissingInReceipt,
    /// A code this client does not know about, kept verbatim.
    Unknown(i64),
    /// The server did not declare a code at all.
    Missing,
}

impl BackendErrorCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            7000 => Self::InvalidPlatform,
            7101 => Self::StoreProblem,
            7102 => Self::CannotTransferPurchase,
            7103 => Self::InvalidReceiptToken,
            7104 => Self::InvalidAppStoreSharedSecret,
            7105 => Self::InvalidPaymentModeOrIntroPriceNotProvided,
            7106 => Self::ProductIdsMalformed,
            7110 => Self::InternalServerError,
            7220 => Self::InvalidAppUserId,
            7225 => Self::InvalidApiKey,
            7226 => Self::BadRequest,
            7229 => Self::PlayStoreQuotaExceeded,
            7230 => Self::PlayStoreInvalidPackageName,
            7231 => Self::PlayStoreGenericError,
            7232 => Self::UserIneligibleForPromoOffer,
            7234 => Self::InvalidAppleSubscriptionKey,
            7263 => Self::InvalidSubscriberAttributes,
            7264 => Self::InvalidSubscriberAttributesBody,
            7712 => Self::PurchasedProductMissingInReceipt,
            other => Self::Unknown(other),
        }
    }

    /// Numeric code as sent by the server, if one was sent.
    pub fn code(&self) -> Option<i64> {
        let code = match self {
            Self::InvalidPlatform => 7000,
            Self::StoreProblem => 7101,
            Self::CannotTransferPurchase => 7102,
            Self::InvalidReceiptToken => 7103,
            Self::InvalidAppStoreSharedSecret => 7104,
            Self::InvalidPaymentModeOrIntroPriceNotProvided => 7105,
            Self::ProductIdsMalformed => 7106,
            Self::InternalServerError => 7110,
            Self::InvalidAppUserId => 7220,
            Self::InvalidApiKey => 7225,
            Self::BadRequest => 7226,
            Self::PlayStoreQuotaExceeded => 7229,
            Self::PlayStoreInvalidPackageName => 7230,
            Self::PlayStoreGenericError => 7231,
            Self::UserIneligibleForPromoOffer => 7232,
            Self::InvalidAppleSubscriptionKey => 7234,
            Self::InvalidSubscriberAttributes => 7263,
            Self::InvalidSubscriberAttributesBody => 7264,
            Self::PurchasedProductMissingInReceipt => 7712,
            Self::Unknown(code) => *code,
            Self::Missing => return None,
        };
        Some(code)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unknown(_) | Self::Missing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPlatform => "InvalidPlatform",
            Self::StoreProblem => "StoreProblem",
            Self::CannotTransferPurchase => "CannotTransferPurchase",
            Self::InvalidReceiptToken => "InvalidReceiptToken",
            Self::InvalidAppStoreSharedSecret => "InvalidAppStoreSharedSecret",
            Self::InvalidPaymentModeOrIntroPriceNotProvided => {
                "InvalidPaymentModeOrIntroPriceNotProvided"
            }
            Self::ProductIdsMalformed => "ProductIdsMalformed",
            Self::InternalServerError => "InternalServerError",
            Self::InvalidAppUserId => "InvalidAppUserId",
            Self::InvalidApiKey => "InvalidApiKey",
            Self::BadRequest => "BadRequest",
            Self::PlayStoreQuotaExceeded => "PlayStoreQuotaExceeded",
            Self::PlayStoreInvalidPackageName => "PlayStoreInvalidPackageName",
            Self::PlayStoreGenericError => "PlayStoreGenericError",
            Self::UserIneligibleForPromoOffer => "UserIneligibleForPromoOffer",
            Self::InvalidAppleSubscriptionKey => "InvalidAppleSubscriptionKey",
            Self::InvalidSubscriberAttributes => "InvalidSubscriberAttributes",
            Self::InvalidSubscriberAttributesBody => "InvalidSubscriberAttributesBody",
            Self::PurchasedProductMissingInReceipt => "PurchasedProductMissingInReceipt",
            Self::Unknown(_) => "Unknown",
            Self::Missing => "Missing",
        }
    }
}

impl fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{} ({})", self.as_str(), code),
            None => f.write_str(self.as_str()),
        }
    }
}

/// The server's explicit rejection (full or partial) of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub status: HttpStatus,
    pub code: BackendErrorCode,
    pub message: Option<String>,
    /// Per-attribute validation failures, key -> message.
    pub attribute_errors: BTreeMap<String, String>,
    /// The server durably stored the request despite the error.
    pub successfully_synced: bool,
    /// Locally known purchases may be finished despite the error.
    pub finishable: bool,
}

impl BackendError {
    pub fn new(status: HttpStatus, code: BackendErrorCode) -> Self {
        Self {
            status,
            code,
            message: None,
            attribute_errors: BTreeMap::new(),
            successfully_synced: status.is_successfully_synced(),
            finishable: status.is_finishable(),
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    /// Build the attribute map from ordered pairs; a repeated key keeps the
    /// last message seen.
    pub fn with_attribute_errors<I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, message) in pairs {
            self.attribute_errors.insert(key, message);
        }
        self
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}, code {}", self.status, self.code)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        if !self.attribute_errors.is_empty() {
            write!(f, " ({} attribute errors)", self.attribute_errors.len())?;
        }
        Ok(())
    }
}

/// Errors produced by one classified exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The transport never completed; always eligible for a caller retry.
    #[error("network error: {0}")]
    Network(#[source] TransportError),

    /// Successful transport, undecodable body.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String, body: String },

    /// The server rejected the request with a recognized code.
    #[error("backend error: {0}")]
    Backend(BackendError),

    /// The server rejected the request with an unrecognized or missing code.
    #[error("unknown backend error: {0}")]
    UnknownBackend(BackendError),
}

impl RequestError {
    pub fn malformed(reason: impl Into<String>, body: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
            body: body.into(),
        }
    }

    /// Wrap a server rejection, picking the variant from its code.
    pub fn from_backend(error: BackendError) -> Self {
        if error.code.is_recognized() {
            Self::Backend(error)
        } else {
            Self::UnknownBackend(error)
        }
    }

    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Backend(e) | Self::UnknownBackend(e) => Some(e),
            _ => None,
        }
    }

    /// Only transport failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn successfully_synced(&self) -> bool {
        self.backend_error()
            .map(|e| e.successfully_synced)
            .unwrap_or(false)
    }

    pub fn finishable(&self) -> bool {
        self.backend_error().map(|e| e.finishable).unwrap_or(false)
    }

    /// Error type string for logs and CLI output.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Network(_) => "NetworkError",
            Self::MalformedResponse { .. } => "MalformedResponseError",
            Self::Backend(_) => "BackendError",
            Self::UnknownBackend(_) => "UnknownBackendError",
        }
    }
}
