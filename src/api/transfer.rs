// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer API endpoints.
//!
//! Sending spends from a wallet account; receiving claims a specific
//! inbound block. Both go through the node gateway's submission
//! pipeline, so concurrent requests against the same account serialize
//! behind its address lock. The `{account}` path segment accepts either
//! an address or a derivation index.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::ApiError,
    models::{
        format_amount, parse_amount, AccountBlockResponse, AccountSelector, ReceiveTransferRequest,
        SendTransferRequest, TokenStandard, COIN_DECIMALS,
    },
    node::rpc::{AccountBlock, AccountBlockInfo},
    state::AppState,
};

use super::wallet::PageQuery;

/// One token balance of an account.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BalanceEntry {
    pub token_standard: TokenStandard,
    pub symbol: String,
    pub decimals: u8,
    /// Raw token units.
    pub balance: String,
    /// Human-readable decimal amount.
    pub formatted: String,
}

/// Balances of one wallet account.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub address: crate::models::Address,
    pub balances: Vec<BalanceEntry>,
}

/// One page of an account's unreceived inbound blocks.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnreceivedBlocksResponse {
    pub list: Vec<AccountBlockResponse>,
    pub more: bool,
}

/// One page of an account's ledgered blocks, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReceivedBlocksResponse {
    pub count: u64,
    pub list: Vec<AccountBlockResponse>,
    pub more: bool,
}

pub(crate) fn block_response(block: AccountBlock) -> AccountBlockResponse {
    AccountBlockResponse {
        hash: block.hash,
        address: block.address,
        to_address: block.to_address,
        amount: block.amount,
        token_standard: block.token_standard,
        height: block.height,
    }
}

fn block_info_response(block: AccountBlockInfo) -> AccountBlockResponse {
    AccountBlockResponse {
        hash: block.hash,
        address: block.address,
        to_address: block.to_address,
        amount: block.amount,
        token_standard: block.token_standard,
        height: block.height,
    }
}

/// Get the token balances of a wallet account.
#[utoipa::path(
    get,
    path = "/api/accounts/{account}/balances",
    tag = "Transfer",
    params(("account" = String, Path, description = "Address or account index")),
    responses(
        (status = 200, description = "Balances by token", body = BalanceResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_balances(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, _) = state.session.get_account(&selector).await?;

    let info = state.gateway.rpc().account_info(&account.address).await?;
    let mut balances: Vec<BalanceEntry> = info
        .balance_info_map
        .values()
        .map(|entry| BalanceEntry {
            token_standard: entry.token.token_standard.clone(),
            symbol: entry.token.symbol.clone(),
            decimals: entry.token.decimals,
            balance: entry.balance.clone(),
            formatted: format_amount(entry.balance_units(), entry.token.decimals),
        })
        .collect();
    balances.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    Ok(Json(BalanceResponse {
        address: account.address,
        balances,
    }))
}

/// List the unreceived inbound blocks of a wallet account.
#[utoipa::path(
    get,
    path = "/api/accounts/{account}/unreceived",
    tag = "Transfer",
    params(
        ("account" = String, Path, description = "Address or account index"),
        PageQuery
    ),
    responses(
        (status = 200, description = "Unreceived blocks", body = UnreceivedBlocksResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_unreceived(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<UnreceivedBlocksResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, _) = state.session.get_account(&selector).await?;

    let unreceived = state
        .gateway
        .rpc()
        .unreceived_blocks(
            &account.address,
            page.page_index as u32,
            page.page_size as u32,
        )
        .await?;

    Ok(Json(UnreceivedBlocksResponse {
        list: unreceived
            .list
            .into_iter()
            .map(block_info_response)
            .collect(),
        more: unreceived.more,
    }))
}

/// List the ledgered blocks of a wallet account, newest first.
#[utoipa::path(
    get,
    path = "/api/accounts/{account}/received",
    tag = "Transfer",
    params(
        ("account" = String, Path, description = "Address or account index"),
        PageQuery
    ),
    responses(
        (status = 200, description = "Ledgered blocks", body = ReceivedBlocksResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_received(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ReceivedBlocksResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, _) = state.session.get_account(&selector).await?;

    let blocks = state
        .gateway
        .rpc()
        .account_blocks(
            &account.address,
            page.page_index as u32,
            page.page_size as u32,
        )
        .await?;

    Ok(Json(ReceivedBlocksResponse {
        count: blocks.count,
        list: blocks.list.into_iter().map(block_info_response).collect(),
        more: blocks.more,
    }))
}

/// Send tokens from a wallet account.
///
/// The amount is a decimal string interpreted with the token's
/// registered decimals; the balance is checked before the block enters
/// the submission pipeline.
#[utoipa::path(
    post,
    path = "/api/accounts/{account}/send",
    tag = "Transfer",
    params(("account" = String, Path, description = "Address or account index")),
    request_body = SendTransferRequest,
    responses(
        (status = 200, description = "Published send block", body = AccountBlockResponse),
        (status = 400, description = "Invalid amount or unknown token"),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Wallet locked"),
        (status = 422, description = "Insufficient balance"),
        (status = 503, description = "Node not synced")
    )
)]
pub async fn send_transfer(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(request): Json<SendTransferRequest>,
) -> Result<Json<AccountBlockResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, signer) = state.session.get_account(&selector).await?;

    let token_standard = request.token_standard.unwrap_or_else(TokenStandard::znn);
    let decimals = if token_standard.is_native_coin() {
        COIN_DECIMALS
    } else {
        state
            .gateway
            .rpc()
            .token_by_standard(&token_standard)
            .await?
            .ok_or_else(|| ApiError::bad_request(format!("unknown token: {token_standard}")))?
            .decimals
    };
    let amount = parse_amount(&request.amount, decimals)?;

    let info = state.gateway.rpc().account_info(&account.address).await?;
    let available = info.balance_of(&token_standard);
    if available < amount {
        return Err(ApiError::unprocessable(format!(
            "insufficient balance: {} available, {} required",
            format_amount(available, decimals),
            format_amount(amount, decimals),
        )));
    }

    let block = state
        .gateway
        .send_transfer(
            &account.address,
            &signer,
            request.address,
            amount,
            token_standard,
        )
        .await?;
    Ok(Json(block_response(block)))
}

/// Receive a specific inbound block into a wallet account.
#[utoipa::path(
    post,
    path = "/api/accounts/{account}/receive",
    tag = "Transfer",
    params(("account" = String, Path, description = "Address or account index")),
    request_body = ReceiveTransferRequest,
    responses(
        (status = 200, description = "Published receive block", body = AccountBlockResponse),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Wallet locked"),
        (status = 503, description = "Node not synced")
    )
)]
pub async fn receive_transfer(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(request): Json<ReceiveTransferRequest>,
) -> Result<Json<AccountBlockResponse>, ApiError> {
    let selector = AccountSelector::parse(&account)?;
    let (account, signer) = state.session.get_account(&selector).await?;

    let block = state
        .gateway
        .receive_transfer(&account.address, &signer, request.block_hash)
        .await?;
    Ok(Json(block_response(block)))
}
