// SPDX-License-Identifier: AGPL-3.0-or-later

//! Auto-receiver API endpoints.
//!
//! Status of the background reconciliation loop and per-account opt-out
//! of automatic receiving.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::ApiError,
    models::{AccountSelector, Address, AutoReceiverStatusResponse},
    state::AppState,
};

/// Resolve an account selector against the roster without requiring an
/// unlocked wallet; muting is metadata, not a signing operation.
fn resolve_address(state: &AppState, selector: &AccountSelector) -> Result<Address, ApiError> {
    match selector {
        AccountSelector::Address(address) => Ok(address.clone()),
        AccountSelector::Index(index) => state
            .session
            .roster()
            .iter()
            .find(|account| account.index == *index)
            .map(|account| account.address.clone())
            .ok_or_else(|| ApiError::not_found("account does not exist")),
    }
}

/// Get the auto-receiver status.
#[utoipa::path(
    get,
    path = "/api/auto-receiver/status",
    tag = "AutoReceiver",
    responses(
        (status = 200, description = "Loop status flags", body = AutoReceiverStatusResponse)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> Json<AutoReceiverStatusResponse> {
    Json(state.receiver.status())
}

/// Re-enable automatic receiving for an account.
#[utoipa::path(
    post,
    path = "/api/auto-receiver/{account}/subscribe",
    tag = "AutoReceiver",
    params(("account" = String, Path, description = "Address or account index")),
    responses(
        (status = 204, description = "Account subscribed"),
        (status = 404, description = "Account not found")
    )
)]
pub async fn subscribe(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<StatusCode, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let address = resolve_address(&state, &selector)?;
    state.receiver.subscribe(address);
    Ok(StatusCode::NO_CONTENT)
}

/// Exclude an account from automatic receiving.
#[utoipa::path(
    post,
    path = "/api/auto-receiver/{account}/unsubscribe",
    tag = "AutoReceiver",
    params(("account" = String, Path, description = "Address or account index")),
    responses(
        (status = 204, description = "Account unsubscribed"),
        (status = 404, description = "Account not found")
    )
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<StatusCode, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let address = resolve_address(&state, &selector)?;
    state.receiver.unsubscribe(address);
    Ok(StatusCode::NO_CONTENT)
}
