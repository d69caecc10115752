// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wallet session API endpoints.
//!
//! Init, restore, unlock, lock, status, and account management. The
//! mnemonic returned by init is shown exactly once and never stored in
//! plaintext.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::ApiError,
    models::{
        AddAccountsRequest, InitWalletRequest, InitWalletResponse, RestoreWalletRequest,
        UnlockWalletRequest, WalletAccountList, WalletStatusResponse,
    },
    state::AppState,
};

/// Paging query parameters for account listings.
#[derive(Debug, Deserialize, IntoParams)]
pub struct PageQuery {
    #[serde(default)]
    pub page_index: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    50
}

/// Get the wallet session status.
#[utoipa::path(
    get,
    path = "/api/wallet/status",
    tag = "Wallet",
    responses(
        (status = 200, description = "Current session flags", body = WalletStatusResponse)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> Json<WalletStatusResponse> {
    Json(state.session.status())
}

/// Initialize a new wallet.
///
/// Generates a fresh mnemonic, encrypts it under the given password and
/// derives the first account. The mnemonic in the response is the only
/// copy the caller will ever see.
#[utoipa::path(
    post,
    path = "/api/wallet/init",
    tag = "Wallet",
    request_body = InitWalletRequest,
    responses(
        (status = 201, description = "Wallet created", body = InitWalletResponse),
        (status = 409, description = "Wallet already initialized")
    )
)]
pub async fn init_wallet(
    State(state): State<AppState>,
    Json(request): Json<InitWalletRequest>,
) -> Result<(StatusCode, Json<InitWalletResponse>), ApiError> {
    let mnemonic = state.session.init(&request.password).await?;
    Ok((StatusCode::CREATED, Json(InitWalletResponse { mnemonic })))
}

/// Restore a wallet from an existing mnemonic.
///
/// Replaces any wallet previously stored under the configured name.
#[utoipa::path(
    post,
    path = "/api/wallet/restore",
    tag = "Wallet",
    request_body = RestoreWalletRequest,
    responses(
        (status = 200, description = "Wallet restored and unlocked", body = WalletStatusResponse),
        (status = 400, description = "Invalid mnemonic")
    )
)]
pub async fn restore_wallet(
    State(state): State<AppState>,
    Json(request): Json<RestoreWalletRequest>,
) -> Result<Json<WalletStatusResponse>, ApiError> {
    state
        .session
        .restore(&request.password, &request.mnemonic)
        .await?;
    Ok(Json(state.session.status()))
}

/// Unlock the wallet.
#[utoipa::path(
    post,
    path = "/api/wallet/unlock",
    tag = "Wallet",
    request_body = UnlockWalletRequest,
    responses(
        (status = 200, description = "Wallet unlocked", body = WalletStatusResponse),
        (status = 401, description = "Incorrect password"),
        (status = 409, description = "Wallet not initialized")
    )
)]
pub async fn unlock_wallet(
    State(state): State<AppState>,
    Json(request): Json<UnlockWalletRequest>,
) -> Result<Json<WalletStatusResponse>, ApiError> {
    state.session.unlock(&request.password).await?;
    Ok(Json(state.session.status()))
}

/// Lock the wallet, dropping key material from memory.
#[utoipa::path(
    post,
    path = "/api/wallet/lock",
    tag = "Wallet",
    responses(
        (status = 200, description = "Wallet locked", body = WalletStatusResponse)
    )
)]
pub async fn lock_wallet(State(state): State<AppState>) -> Json<WalletStatusResponse> {
    state.session.lock().await;
    Json(state.session.status())
}

/// List wallet accounts, paged.
#[utoipa::path(
    get,
    path = "/api/wallet/accounts",
    tag = "Wallet",
    params(PageQuery),
    responses(
        (status = 200, description = "Accounts in the requested page", body = WalletAccountList),
        (status = 409, description = "Wallet not initialized or locked")
    )
)]
pub async fn get_accounts(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<WalletAccountList>, ApiError> {
    let list = state.session.get_accounts(page.page_index, page.page_size)?;
    Ok(Json(list))
}

/// Derive additional accounts at the next sequential indexes.
#[utoipa::path(
    post,
    path = "/api/wallet/accounts",
    tag = "Wallet",
    request_body = AddAccountsRequest,
    responses(
        (status = 200, description = "Newly derived accounts", body = WalletAccountList),
        (status = 400, description = "Count must be at least 1"),
        (status = 409, description = "Wallet not initialized or locked")
    )
)]
pub async fn add_accounts(
    State(state): State<AppState>,
    Json(request): Json<AddAccountsRequest>,
) -> Result<Json<WalletAccountList>, ApiError> {
    let added = state.session.add_accounts(request.count).await?;
    Ok(Json(added))
}
