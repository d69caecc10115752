// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy and HTTP problem mapping.
//!
//! Domain errors ([`WalletError`], gateway and keystore errors) are
//! typed enums; [`ApiError`] is the single HTTP-facing error that
//! request handlers return. Background loops never surface errors this
//! way — they log and continue.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::ParseError;
use crate::node::{rpc::RpcError, GatewayError};
use crate::plasma::PlasmaError;

/// Wallet session error taxonomy.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("wallet is not initialized")]
    NotInitialized,

    #[error("wallet is already initialized")]
    AlreadyInitialized,

    #[error("wallet is locked")]
    Locked,

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("invalid mnemonic")]
    InvalidMnemonic,

    #[error("account does not exist")]
    AccountNotFound,

    #[error("number of accounts must be at least 1")]
    InvalidAccountCount,

    #[error("keystore failure: {0}")]
    Keystore(String),
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<WalletError> for ApiError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::NotInitialized | WalletError::Locked => {
                ApiError::conflict(e.to_string())
            }
            WalletError::AlreadyInitialized => ApiError::conflict(e.to_string()),
            WalletError::IncorrectPassword => {
                ApiError::new(StatusCode::UNAUTHORIZED, e.to_string())
            }
            WalletError::InvalidMnemonic | WalletError::InvalidAccountCount => {
                ApiError::bad_request(e.to_string())
            }
            WalletError::AccountNotFound => ApiError::not_found(e.to_string()),
            WalletError::Keystore(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<ParseError> for ApiError {
    fn from(e: ParseError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotSynced { .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            GatewayError::Rpc(ref rpc) => ApiError::from_rpc(rpc),
            GatewayError::Plasma(PlasmaError::Insufficient) => {
                ApiError::unprocessable(e.to_string())
            }
            GatewayError::Plasma(_) => ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()),
            GatewayError::Pow(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<PlasmaError> for ApiError {
    fn from(e: PlasmaError) -> Self {
        match e {
            PlasmaError::BotDisabled => ApiError::not_found(e.to_string()),
            PlasmaError::Insufficient => ApiError::unprocessable(e.to_string()),
            PlasmaError::Bot(_) => ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()),
            PlasmaError::Rpc(rpc) => ApiError::from_rpc(&rpc),
        }
    }
}

impl From<RpcError> for ApiError {
    fn from(e: RpcError) -> Self {
        ApiError::from_rpc(&e)
    }
}

impl ApiError {
    fn from_rpc(e: &RpcError) -> Self {
        match e {
            RpcError::NotConnected | RpcError::Transport(_) | RpcError::InvalidResponse(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, e.to_string())
            }
            // The node rejected the submission itself.
            RpcError::Remote { .. } => ApiError::bad_request(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.message, "bad");

        let cf = ApiError::conflict("busy");
        assert_eq!(cf.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data"}"#);
    }

    #[test]
    fn wallet_errors_map_to_expected_statuses() {
        assert_eq!(
            ApiError::from(WalletError::NotInitialized).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(WalletError::IncorrectPassword).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(WalletError::AccountNotFound).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(WalletError::InvalidMnemonic).status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn gateway_errors_map_to_expected_statuses() {
        assert_eq!(
            ApiError::from(GatewayError::NotSynced { lag: 25 }).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(GatewayError::Rpc(RpcError::NotConnected)).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(GatewayError::Plasma(PlasmaError::Insufficient)).status,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(RpcError::Remote {
                code: -32000,
                message: "rejected".to_string()
            })
            .status,
            StatusCode::BAD_REQUEST
        );
    }
}
