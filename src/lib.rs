// SPDX-License-Identifier: AGPL-3.0-or-later

//! Zenon Wallet API - Custodial Wallet Service
//!
//! This crate provides an HTTP wallet service over a Zenon full node:
//! one encrypted keystore per instance, deterministic account
//! derivation, serialized block submission and background receiving of
//! inbound transfers.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `wallet` - Wallet session state machine and lifecycle events
//! - `keystore` - Encrypted key container and account derivation
//! - `node` - Full-node gateway, RPC transport and PoW throttling
//! - `receiver` - Background reconciliation of inbound transfers
//! - `plasma` - Fee-capacity provisioning (fused plasma / PoW policy)

pub mod api;
pub mod autolock;
pub mod config;
pub mod error;
pub mod keystore;
pub mod models;
pub mod node;
pub mod plasma;
pub mod receiver;
pub mod state;
pub mod wallet;
