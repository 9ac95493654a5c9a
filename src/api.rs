//! HTTP boundary
//!
//! Thin axum layer over [`Ledger`]: three operations plus health and
//! metrics. Every request carries a correlation identifier, taken from the
//! `X-Request-ID` header when the caller supplies one and generated
//! otherwise; it is echoed on the response and embedded in every error
//! payload `{"request_id", "error"}`. Unexpected failures are logged with
//! full detail server-side and surfaced as a fixed opaque message.

use crate::{error::Error, ledger::Ledger, types::AccountId};
use axum::{
    extract::{Path, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request-scoped correlation identifier, bound by middleware and passed to
/// handlers through request extensions (never global state)
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Create-account request body
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    /// Identifier for the new account
    pub account_id: Uuid,
    /// Initial balance, seeded from the service account when positive
    pub balance: Decimal,
}

/// Balance response body
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account the balance belongs to
    pub account_id: Uuid,
    /// Current balance
    pub balance: Decimal,
}

/// Transfer request body
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Source account
    pub source: Uuid,
    /// Destination account
    pub destination: Uuid,
    /// Amount to move
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    request_id: Uuid,
    error: String,
}

/// Error wrapper that renders the caller-facing payload
struct ApiError {
    request_id: Uuid,
    error: Error,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.error {
            Error::InvalidAmount
            | Error::NegativeBalance
            | Error::ServiceAccountAsSource
            | Error::SelfTransfer
            | Error::AlreadyExists
            | Error::SourceNotFound
            | Error::DestinationNotFound
            | Error::InsufficientFunds => StatusCode::BAD_REQUEST,
            Error::AccountNotFound => StatusCode::NOT_FOUND,
            Error::Conflict { .. } | Error::RetriesExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(request_id = %self.request_id, error = %self.error, "request failed");
                "internal server error".to_string()
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                tracing::warn!(request_id = %self.request_id, error = %self.error, "request failed transiently");
                self.error.to_string()
            }
            _ => {
                tracing::info!(request_id = %self.request_id, error = %self.error, "request rejected");
                self.error.to_string()
            }
        };

        (
            status,
            Json(ErrorBody {
                request_id: self.request_id,
                error: message,
            }),
        )
            .into_response()
    }
}

/// Build the router for a ledger instance
pub fn router(ledger: Arc<Ledger>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id/balance", get(get_balance))
        .route("/transfers", post(make_transfer))
        .route("/metrics", get(export_metrics))
        .layer(middleware::from_fn(bind_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}

async fn bind_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .unwrap_or_else(Uuid::new_v4);

    request.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn create_account(
    State(ledger): State<Arc<Ledger>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<StatusCode, ApiError> {
    ledger
        .create_account(AccountId::new(request.account_id), request.balance)
        .await
        .map_err(|error| ApiError { request_id, error })?;

    Ok(StatusCode::NO_CONTENT)
}

async fn get_balance(
    State(ledger): State<Arc<Ledger>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountBalance>, ApiError> {
    let balance = ledger
        .balance(AccountId::new(account_id))
        .await
        .map_err(|error| ApiError { request_id, error })?;

    Ok(Json(AccountBalance {
        account_id,
        balance,
    }))
}

async fn make_transfer(
    State(ledger): State<Arc<Ledger>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(request): Json<TransferRequest>,
) -> Result<StatusCode, ApiError> {
    ledger
        .transfer(
            AccountId::new(request.source),
            AccountId::new(request.destination),
            request.amount,
        )
        .await
        .map_err(|error| ApiError { request_id, error })?;

    Ok(StatusCode::NO_CONTENT)
}

async fn export_metrics(
    State(ledger): State<Arc<Ledger>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Result<String, ApiError> {
    ledger.metrics().export().map_err(|err| ApiError {
        request_id,
        error: Error::Storage(format!("metrics export failed: {}", err)),
    })
}
