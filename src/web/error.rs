//! Standardized API error responses.
//!
//! Every error body has the shape `{"code": "...", "message": "...", "details": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;
use ts_rs::TS;

use crate::data::orders::{CheckoutError, OrderError};
use crate::data::products::ProductError;
use crate::data::tokens::LedgerError;
use crate::web::auth::otp::PhoneError;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ApiErrorCode {
    BadRequest,
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    InsufficientBalance,
    InsufficientStock,
    OtpInvalid,
    OtpExpired,
    OtpCooldown,
    OtpLocked,
    RateLimited,
    SmsFailed,
    Internal,
}

impl ApiErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::BadRequest | ApiErrorCode::Validation => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized | ApiErrorCode::OtpInvalid | ApiErrorCode::OtpExpired => {
                StatusCode::UNAUTHORIZED
            }
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::Conflict | ApiErrorCode::InsufficientStock => StatusCode::CONFLICT,
            ApiErrorCode::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            ApiErrorCode::OtpCooldown | ApiErrorCode::OtpLocked | ApiErrorCode::RateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiErrorCode::SmsFailed => StatusCode::BAD_GATEWAY,
            ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    #[ts(type = "unknown")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::BadRequest, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Conflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Internal, message)
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "code": self.code,
            "message": self.message,
            "details": self.details,
        });
        (status, Json(body)).into_response()
    }
}

/// Log a database failure and hide it behind a generic 500.
pub fn db_error(context: &str, error: anyhow::Error) -> ApiError {
    error!(error = ?error, "{context} failed");
    ApiError::internal_error(format!("{context} failed"))
}

/// Convert `Option<T>` into a 404 when empty.
pub trait OptionNotFoundExt<T> {
    fn or_not_found(self, kind: &str, id: impl std::fmt::Display) -> Result<T, ApiError>;
}

impl<T> OptionNotFoundExt<T> for Option<T> {
    fn or_not_found(self, kind: &str, id: impl std::fmt::Display) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(format!("{kind} {id} not found")))
    }
}

impl From<PhoneError> for ApiError {
    fn from(e: PhoneError) -> Self {
        ApiError::validation(e.to_string())
    }
}

impl From<CheckoutError> for ApiError {
    fn from(e: CheckoutError) -> Self {
        let message = e.to_string();
        match e {
            CheckoutError::EmptyCart
            | CheckoutError::TooManyLines
            | CheckoutError::BadQuantity { .. }
            | CheckoutError::TotalOverflow
            | CheckoutError::MissingAddress => ApiError::validation(message),
            CheckoutError::UnknownProduct(id) => {
                ApiError::not_found(message).with_details(json!({ "productId": id }))
            }
            CheckoutError::ProductUnavailable(id) => {
                ApiError::conflict(message).with_details(json!({ "productId": id }))
            }
            CheckoutError::InsufficientStock {
                product_id,
                available,
            } => ApiError::new(ApiErrorCode::InsufficientStock, message)
                .with_details(json!({ "productId": product_id, "available": available })),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let message = e.to_string();
        match e {
            LedgerError::InsufficientBalance { balance, required } => {
                ApiError::new(ApiErrorCode::InsufficientBalance, message)
                    .with_details(json!({ "balance": balance, "required": required }))
            }
            LedgerError::NoSuchUser => ApiError::not_found(message),
            LedgerError::ZeroAmount | LedgerError::WrongSign { .. } => {
                ApiError::validation(message)
            }
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NoSuchOrder => ApiError::not_found(e.to_string()),
            OrderError::InvalidTransition { .. } => ApiError::conflict(e.to_string()),
        }
    }
}

impl From<ProductError> for ApiError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::NoSuchProduct => ApiError::not_found(e.to_string()),
            ProductError::DuplicateSlug(_) => ApiError::conflict(e.to_string()),
        }
    }
}

/// Map an `anyhow::Error` from the data layer to an `ApiError`.
///
/// Known domain errors are downcast to their HTTP meaning; anything else is
/// logged and reported as a generic failure of `context`.
pub fn domain_error(context: &str, error: anyhow::Error) -> ApiError {
    let error = match error.downcast::<CheckoutError>() {
        Ok(e) => return e.into(),
        Err(error) => error,
    };
    let error = match error.downcast::<LedgerError>() {
        Ok(e) => return e.into(),
        Err(error) => error,
    };
    let error = match error.downcast::<OrderError>() {
        Ok(e) => return e.into(),
        Err(error) => error,
    };
    let error = match error.downcast::<ProductError>() {
        Ok(e) => return e.into(),
        Err(error) => error,
    };
    db_error(context, error)
}
