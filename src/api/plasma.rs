// SPDX-License-Identifier: AGPL-3.0-or-later

//! Plasma API endpoints.
//!
//! Fused plasma queries against the node, fusing and revoking QSR
//! through the embedded plasma contract, plus the community bot
//! passthrough for requesting fusions and checking their expiration.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::ApiError,
    models::{
        format_amount, parse_amount, AccountBlockResponse, AccountSelector, Address, BlockHash,
        BotPlasmaExpirationResponse, CancelPlasmaRequest, FuseBotPlasmaRequest, FusePlasmaRequest,
        COIN_DECIMALS,
    },
    state::AppState,
};

use super::transfer::block_response;
use super::wallet::PageQuery;

/// Fused plasma state of a wallet account.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlasmaResponse {
    pub address: Address,
    pub current_plasma: u64,
    pub max_plasma: u64,
    /// Fused QSR backing the plasma, human readable.
    pub fused_qsr: String,
}

/// Get the plasma state of a wallet account.
#[utoipa::path(
    get,
    path = "/api/plasma/{account}",
    tag = "Plasma",
    params(("account" = String, Path, description = "Address or account index")),
    responses(
        (status = 200, description = "Plasma state", body = PlasmaResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_plasma(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<PlasmaResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, _) = state.session.get_account(&selector).await?;

    let info = state.gateway.rpc().plasma_info(&account.address).await?;
    Ok(Json(PlasmaResponse {
        address: account.address,
        current_plasma: info.current_plasma,
        max_plasma: info.max_plasma,
        fused_qsr: format_amount(info.fused_qsr(), COIN_DECIMALS),
    }))
}

/// One fusion entry recorded by the plasma contract.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FusionEntryResponse {
    pub id: BlockHash,
    pub beneficiary: Address,
    /// Fused QSR, human readable.
    pub qsr_amount: String,
    pub expiration_height: u64,
    /// Whether the entry can be cancelled at the current momentum.
    pub is_revocable: bool,
}

/// One page of an address's fusion entries.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FusionListResponse {
    pub count: u64,
    pub list: Vec<FusionEntryResponse>,
}

/// Fuse QSR from a wallet account into plasma for a beneficiary.
///
/// Builds a send block to the embedded plasma contract and runs it
/// through the regular submission pipeline.
#[utoipa::path(
    post,
    path = "/api/plasma/{account}/fuse",
    tag = "Plasma",
    params(("account" = String, Path, description = "Address or account index")),
    request_body = FusePlasmaRequest,
    responses(
        (status = 200, description = "Published fuse block", body = AccountBlockResponse),
        (status = 400, description = "Invalid amount or address"),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Wallet locked"),
        (status = 503, description = "Node not synced")
    )
)]
pub async fn fuse_plasma(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(request): Json<FusePlasmaRequest>,
) -> Result<Json<AccountBlockResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, signer) = state.session.get_account(&selector).await?;

    let beneficiary = Address::parse(&request.address.0)?;
    let amount = parse_amount(&request.amount, COIN_DECIMALS)?;

    let block = state
        .gateway
        .fuse_plasma(&account.address, &signer, beneficiary, amount)
        .await?;
    Ok(Json(block_response(block)))
}

/// Revoke a fusion entry; the fused QSR returns to the account.
#[utoipa::path(
    post,
    path = "/api/plasma/{account}/cancel",
    tag = "Plasma",
    params(("account" = String, Path, description = "Address or account index")),
    request_body = CancelPlasmaRequest,
    responses(
        (status = 200, description = "Published cancel block", body = AccountBlockResponse),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Wallet locked"),
        (status = 503, description = "Node not synced")
    )
)]
pub async fn cancel_plasma(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(request): Json<CancelPlasmaRequest>,
) -> Result<Json<AccountBlockResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, signer) = state.session.get_account(&selector).await?;

    let block = state
        .gateway
        .cancel_fusion(&account.address, &signer, request.id_hash)
        .await?;
    Ok(Json(block_response(block)))
}

/// List the fusion entries of a wallet account.
#[utoipa::path(
    get,
    path = "/api/plasma/{account}/fused",
    tag = "Plasma",
    params(
        ("account" = String, Path, description = "Address or account index"),
        PageQuery
    ),
    responses(
        (status = 200, description = "Fusion entries", body = FusionListResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_fusion_info(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<FusionListResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, _) = state.session.get_account(&selector).await?;

    let sync = state.gateway.sync_status().await?;
    let entries = state
        .gateway
        .rpc()
        .fusion_entries(
            &account.address,
            page.page_index as u32,
            page.page_size as u32,
        )
        .await?;

    Ok(Json(FusionListResponse {
        count: entries.count,
        list: entries
            .list
            .into_iter()
            .map(|entry| FusionEntryResponse {
                id: entry.id,
                beneficiary: entry.beneficiary,
                qsr_amount: format_amount(
                    entry.qsr_amount.parse().unwrap_or(0),
                    COIN_DECIMALS,
                ),
                is_revocable: sync.current_height > entry.expiration_height,
                expiration_height: entry.expiration_height,
            })
            .collect(),
    }))
}

/// Ask the community bot to fuse plasma to an address.
#[utoipa::path(
    post,
    path = "/api/plasma/fuse",
    tag = "Plasma",
    request_body = FuseBotPlasmaRequest,
    responses(
        (status = 204, description = "Fusion requested"),
        (status = 404, description = "Plasma bot not configured"),
        (status = 502, description = "Plasma bot unreachable")
    )
)]
pub async fn fuse_bot_plasma(
    State(state): State<AppState>,
    Json(request): Json<FuseBotPlasmaRequest>,
) -> Result<StatusCode, ApiError> {
    Address::parse(&request.address.0)?;
    state.plasma_bot.fuse(&request.address).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// When the bot's fusion for an address expires.
#[utoipa::path(
    get,
    path = "/api/plasma/expiration/{address}",
    tag = "Plasma",
    params(("address" = String, Path, description = "Beneficiary address")),
    responses(
        (status = 200, description = "Expiration, if a fusion exists", body = BotPlasmaExpirationResponse),
        (status = 404, description = "Plasma bot not configured")
    )
)]
pub async fn get_fuse_expiration(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<BotPlasmaExpirationResponse>, ApiError> {
    let address = Address::parse(&address)?;
    let expiration = state.plasma_bot.expiration(&address).await?;
    Ok(Json(BotPlasmaExpirationResponse { expiration }))
}
