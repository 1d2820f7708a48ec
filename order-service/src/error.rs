use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use inventory::InventoryError;
use payment_gateway::GatewayError;
use serde::Serialize;
use shared::{DomainError, StoreError};
use thiserror::Error;

/// Error surfaced by every handler. Internal failures keep their cause for the
/// log but answer with a generic message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        AppError::Internal(error.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Internal(cause) => {
                tracing::error!(error = %format!("{cause:#}"), "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            self.status(),
            Json(ErrorResponse {
                error: message,
                code: self.code(),
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            StoreError::Conflict(what) => AppError::Conflict(what),
            other => AppError::internal(other),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Unconfigured => {
                AppError::BadRequest("Payment is not configured for this store".to_string())
            }
            other => AppError::internal(other),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(error: DomainError) -> Self {
        AppError::BadRequest(error.to_string())
    }
}

impl From<InventoryError> for AppError {
    fn from(error: InventoryError) -> Self {
        match error {
            InventoryError::ProductNotFound(id) => AppError::NotFound(format!("product {id} not found")),
            InventoryError::Store(store) => store.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn internal_errors_hide_their_cause() {
        let response = AppError::internal(anyhow::anyhow!("connection refused to 10.0.0.5")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "INTERNAL_SERVER_ERROR");
        assert_eq!(json["error"], "Internal server error");
    }

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        assert_eq!(AppError::from(StoreError::NotFound("order x".into())).code(), "NOT_FOUND");
        assert_eq!(AppError::from(StoreError::Conflict("dup".into())).code(), "CONFLICT");
        assert_eq!(AppError::from(StoreError::Corrupt("bad".into())).code(), "INTERNAL_SERVER_ERROR");
        assert_eq!(AppError::from(GatewayError::Unconfigured).code(), "BAD_REQUEST");
    }
}
