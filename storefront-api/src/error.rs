use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use storefront_core::CourierError;
use storefront_order::FulfillmentError;

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::ValidationError(msg) => error_response(StatusCode::BAD_REQUEST, "validation", msg),
            AppError::Anyhow(err) => match err.downcast::<FulfillmentError>() {
                Ok(err) => fulfillment_response(err),
                Err(err) => {
                    tracing::error!("Internal Server Error: {}", err);
                    internal_error()
                }
            },
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    (status, Json(json!({ "error": message, "kind": kind }))).into_response()
}

fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "Internal Server Error".to_string(),
    )
}

/// Courier failures are 5xx gateway errors; a failed dispatch also carries the
/// order as it now stands, since its status write already happened.
fn fulfillment_response(err: FulfillmentError) -> Response {
    let message = err.to_string();
    match err {
        FulfillmentError::Validation(msg) => error_response(StatusCode::BAD_REQUEST, "validation", msg),
        FulfillmentError::NotFound(_) => error_response(StatusCode::NOT_FOUND, "not_found", message),
        FulfillmentError::InvalidTransition { .. } => {
            error_response(StatusCode::CONFLICT, "invalid_transition", message)
        }
        FulfillmentError::DispatchFailed { order, source } => (
            courier_status(&source),
            Json(json!({
                "error": message,
                "kind": "dispatch_failed",
                "courier_error": source.kind(),
                "order": order,
            })),
        )
            .into_response(),
        FulfillmentError::CancelRejected { source } => (
            courier_status(&source),
            Json(json!({
                "error": message,
                "kind": "cancel_rejected",
                "courier_error": source.kind(),
            })),
        )
            .into_response(),
        FulfillmentError::Persistence(msg) => {
            tracing::error!("Internal Server Error: {}", msg);
            internal_error()
        }
    }
}

fn courier_status(err: &CourierError) -> StatusCode {
    match err {
        CourierError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        CourierError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}
