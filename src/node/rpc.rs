// SPDX-License-Identifier: AGPL-3.0-or-later

//! Full-node RPC surface.
//!
//! [`NodeRpc`] is the transport seam: the WebSocket client implements it
//! in production, tests swap in mocks. Everything above this trait is
//! transport-agnostic. Wire structures use the node's camelCase field
//! names.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::keystore::AccountSigner;
use crate::models::{Address, BlockHash, TokenStandard};

/// Momentum lag below which the chain view is fresh enough to build
/// new blocks on.
pub const SUBMIT_SYNC_TOLERANCE: u64 = 20;

/// Stricter lag bound used before reconciling unreceived backlogs.
pub const RECONCILE_SYNC_TOLERANCE: u64 = 3;

const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// RPC transport failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("node is not connected")]
    NotConnected,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("node error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("malformed node response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// A rejection meaning the referenced send block was already
    /// received. Benign during reconciliation.
    pub fn is_already_received(&self) -> bool {
        matches!(self, RpcError::Remote { message, .. }
            if message.to_ascii_lowercase().contains("already received"))
    }
}

/// Node synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unknown,
    Syncing,
    SyncDone,
}

/// Snapshot of the node's momentum sync progress.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncState,
    pub current_height: u64,
    pub target_height: u64,
}

impl SyncStatus {
    /// Momentums still to catch up.
    pub fn lag(&self) -> u64 {
        self.target_height.saturating_sub(self.current_height)
    }

    /// Whether the node's view is fresh enough for the given tolerance.
    pub fn is_synced_within(&self, tolerance: u64) -> bool {
        if self.state == SyncState::SyncDone {
            return true;
        }
        self.current_height > 0 && self.target_height > 0 && self.lag() < tolerance
    }
}

/// Account chain frontier: the most recent block of one account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontier {
    pub height: u64,
    pub hash: BlockHash,
}

/// Plasma requirement quote for a block about to be submitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowRequirement {
    pub available_plasma: u64,
    pub base_plasma: u64,
    /// Zero when fused plasma already covers the block.
    pub required_difficulty: u64,
}

/// Fused plasma state of one address.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlasmaInfo {
    pub current_plasma: u64,
    pub max_plasma: u64,
    pub qsr_amount: String,
}

impl PlasmaInfo {
    pub fn fused_qsr(&self) -> u128 {
        self.qsr_amount.parse().unwrap_or(0)
    }
}

/// Token registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub token_standard: TokenStandard,
}

/// Per-token balance within an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceInfo {
    pub token: Token,
    pub balance: String,
}

impl BalanceInfo {
    pub fn balance_units(&self) -> u128 {
        self.balance.parse().unwrap_or(0)
    }
}

/// Ledger state of one account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub address: Address,
    pub account_height: u64,
    #[serde(default)]
    pub balance_info_map: HashMap<String, BalanceInfo>,
}

impl AccountInfo {
    pub fn balance_of(&self, zts: &TokenStandard) -> u128 {
        self.balance_info_map
            .get(&zts.0)
            .map(|b| b.balance_units())
            .unwrap_or(0)
    }
}

/// A ledger block as reported by the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBlockInfo {
    pub hash: BlockHash,
    pub address: Address,
    pub to_address: Address,
    pub amount: String,
    pub token_standard: TokenStandard,
    pub height: u64,
}

/// One page of an account's unreceived backlog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreceivedPage {
    #[serde(default)]
    pub list: Vec<AccountBlockInfo>,
    #[serde(default)]
    pub more: bool,
}

/// One page of an account's ledgered blocks, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBlockPage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub list: Vec<AccountBlockInfo>,
    #[serde(default)]
    pub more: bool,
}

/// An active QSR fusion recorded by the plasma contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionEntry {
    pub id: BlockHash,
    pub beneficiary: Address,
    pub qsr_amount: String,
    /// Momentum height after which the fusion becomes revocable.
    pub expiration_height: u64,
}

/// One page of an address's fusion entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionEntryList {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub list: Vec<FusionEntry>,
}

/// Live notification of a newly ledgered account block.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockNotification {
    pub hash: BlockHash,
    pub to_address: Address,
}

const BLOCK_TYPE_USER_SEND: u32 = 2;
const BLOCK_TYPE_USER_RECEIVE: u32 = 3;

/// Call data for an embedded-contract method. Stand-in for the
/// network's ABI encoding; the node echoes it back verbatim.
pub fn embedded_call(method: &str, args: &[&str]) -> String {
    hex::encode(format!("{method}({})", args.join(",")))
}

/// An account block under construction and, after sealing, on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBlock {
    pub version: u32,
    pub chain_identifier: u32,
    pub block_type: u32,
    pub height: u64,
    pub previous_hash: BlockHash,
    pub address: Address,
    pub to_address: Address,
    /// Raw token units as a decimal string.
    pub amount: String,
    pub token_standard: TokenStandard,
    pub from_block_hash: BlockHash,
    pub data: String,
    pub fused_plasma: u64,
    pub difficulty: u64,
    pub nonce: String,
    pub public_key: String,
    pub signature: String,
    pub hash: BlockHash,
}

impl AccountBlock {
    fn draft(
        chain_identifier: u32,
        version: u32,
        block_type: u32,
        address: Address,
        to_address: Address,
        amount: u128,
        token_standard: TokenStandard,
        from_block_hash: BlockHash,
    ) -> Self {
        Self {
            version,
            chain_identifier,
            block_type,
            height: 0,
            previous_hash: BlockHash(ZERO_HASH.to_string()),
            address,
            to_address,
            amount: amount.to_string(),
            token_standard,
            from_block_hash,
            data: String::new(),
            fused_plasma: 0,
            difficulty: 0,
            nonce: String::new(),
            public_key: String::new(),
            signature: String::new(),
            hash: BlockHash(ZERO_HASH.to_string()),
        }
    }

    /// Draft an outbound transfer block.
    pub fn send(
        chain_identifier: u32,
        version: u32,
        from: Address,
        to: Address,
        amount: u128,
        token_standard: TokenStandard,
    ) -> Self {
        Self::draft(
            chain_identifier,
            version,
            BLOCK_TYPE_USER_SEND,
            from,
            to,
            amount,
            token_standard,
            BlockHash(ZERO_HASH.to_string()),
        )
    }

    /// Draft a send block invoking an embedded-contract method.
    #[allow(clippy::too_many_arguments)]
    pub fn contract_call(
        chain_identifier: u32,
        version: u32,
        from: Address,
        contract: Address,
        amount: u128,
        token_standard: TokenStandard,
        data: String,
    ) -> Self {
        let mut block = Self::draft(
            chain_identifier,
            version,
            BLOCK_TYPE_USER_SEND,
            from,
            contract,
            amount,
            token_standard,
            BlockHash(ZERO_HASH.to_string()),
        );
        block.data = data;
        block
    }

    /// Draft a block receiving the send block `from_block_hash`.
    pub fn receive(
        chain_identifier: u32,
        version: u32,
        address: Address,
        from_block_hash: BlockHash,
    ) -> Self {
        Self::draft(
            chain_identifier,
            version,
            BLOCK_TYPE_USER_RECEIVE,
            address.clone(),
            address,
            0,
            TokenStandard::znn(),
            from_block_hash,
        )
    }

    pub fn is_receive(&self) -> bool {
        self.block_type == BLOCK_TYPE_USER_RECEIVE
    }

    /// Chain the block onto its account frontier. `None` means this is
    /// the account's first block.
    pub fn chain_onto(&mut self, frontier: Option<&Frontier>) {
        match frontier {
            Some(f) => {
                self.height = f.height + 1;
                self.previous_hash = f.hash.clone();
            }
            None => {
                self.height = 1;
                self.previous_hash = BlockHash(ZERO_HASH.to_string());
            }
        }
    }

    /// Digest of the fields that identify the block, used as both the
    /// PoW input and the signing message.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_le_bytes());
        hasher.update(self.chain_identifier.to_le_bytes());
        hasher.update(self.block_type.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.previous_hash.0.as_bytes());
        hasher.update(self.address.0.as_bytes());
        hasher.update(self.to_address.0.as_bytes());
        hasher.update(self.amount.as_bytes());
        hasher.update(self.token_standard.0.as_bytes());
        hasher.update(self.from_block_hash.0.as_bytes());
        hasher.update(self.data.as_bytes());
        hasher.update(self.difficulty.to_le_bytes());
        hasher.update(self.nonce.as_bytes());
        hasher.finalize().into()
    }

    /// Finalize the block: compute its hash and attach the signature.
    pub fn seal(&mut self, signer: &AccountSigner) {
        let digest = self.digest();
        self.hash = BlockHash(hex::encode(digest));
        self.public_key = hex::encode(signer.public_key_bytes());
        self.signature = hex::encode(signer.sign(&digest));
    }
}

/// Transport seam to the full node.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Establish (or re-establish) the connection and the block
    /// subscription.
    async fn connect(&self) -> Result<(), RpcError>;

    fn is_connected(&self) -> bool;

    async fn sync_status(&self) -> Result<SyncStatus, RpcError>;

    async fn frontier(&self, address: &Address) -> Result<Option<Frontier>, RpcError>;

    async fn account_info(&self, address: &Address) -> Result<AccountInfo, RpcError>;

    async fn plasma_info(&self, address: &Address) -> Result<PlasmaInfo, RpcError>;

    async fn token_by_standard(&self, zts: &TokenStandard) -> Result<Option<Token>, RpcError>;

    async fn unreceived_blocks(
        &self,
        address: &Address,
        page_index: u32,
        page_size: u32,
    ) -> Result<UnreceivedPage, RpcError>;

    async fn block_by_hash(&self, hash: &BlockHash)
        -> Result<Option<AccountBlockInfo>, RpcError>;

    /// Page through an account's ledgered blocks, newest first.
    async fn account_blocks(
        &self,
        address: &Address,
        page_index: u32,
        page_size: u32,
    ) -> Result<AccountBlockPage, RpcError>;

    /// Page through the plasma contract's fusion entries for an address.
    async fn fusion_entries(
        &self,
        address: &Address,
        page_index: u32,
        page_size: u32,
    ) -> Result<FusionEntryList, RpcError>;

    /// Quote the plasma requirement for a drafted block.
    async fn required_pow(&self, block: &AccountBlock) -> Result<PowRequirement, RpcError>;

    /// Publish a sealed block to the ledger.
    async fn publish_block(&self, block: &AccountBlock) -> Result<(), RpcError>;

    /// Register for live account-block notifications. Each call gets an
    /// independent stream.
    fn subscribe_blocks(&self) -> mpsc::UnboundedReceiver<BlockNotification>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{FileKeyVault, KeyVault};

    fn addr(tag: u8) -> Address {
        Address(format!("z1{}", hex::encode([tag; 19])))
    }

    #[test]
    fn sync_status_tolerance() {
        let status = SyncStatus {
            state: SyncState::Syncing,
            current_height: 1000,
            target_height: 1019,
        };
        assert_eq!(status.lag(), 19);
        assert!(status.is_synced_within(SUBMIT_SYNC_TOLERANCE));
        assert!(!status.is_synced_within(RECONCILE_SYNC_TOLERANCE));

        let done = SyncStatus {
            state: SyncState::SyncDone,
            current_height: 0,
            target_height: 0,
        };
        assert!(done.is_synced_within(RECONCILE_SYNC_TOLERANCE));

        // Unknown heights are never trusted
        let unknown = SyncStatus {
            state: SyncState::Unknown,
            current_height: 0,
            target_height: 0,
        };
        assert!(!unknown.is_synced_within(SUBMIT_SYNC_TOLERANCE));
    }

    #[test]
    fn already_received_detection() {
        let err = RpcError::Remote {
            code: -32000,
            message: "block with hash ... is already received".to_string(),
        };
        assert!(err.is_already_received());

        let other = RpcError::Remote {
            code: -32000,
            message: "insufficient plasma".to_string(),
        };
        assert!(!other.is_already_received());
        assert!(!RpcError::NotConnected.is_already_received());
    }

    #[test]
    fn chain_onto_frontier_and_genesis() {
        let mut block = AccountBlock::send(
            1,
            1,
            addr(1),
            addr(2),
            100,
            TokenStandard::znn(),
        );
        block.chain_onto(None);
        assert_eq!(block.height, 1);
        assert_eq!(block.previous_hash.0, ZERO_HASH);

        let frontier = Frontier {
            height: 41,
            hash: BlockHash("ab".repeat(32)),
        };
        block.chain_onto(Some(&frontier));
        assert_eq!(block.height, 42);
        assert_eq!(block.previous_hash, frontier.hash);
    }

    #[test]
    fn contract_call_draft_carries_call_data() {
        let block = AccountBlock::contract_call(
            1,
            1,
            addr(1),
            Address::plasma_contract(),
            50,
            TokenStandard::qsr(),
            embedded_call("Fuse", &[&addr(2).0]),
        );
        assert!(!block.is_receive());
        assert_eq!(block.to_address, Address::plasma_contract());
        assert!(!block.data.is_empty());

        // Call data is part of the signed digest.
        let mut other = block.clone();
        other.data = embedded_call("Cancel", &["00"]);
        assert_ne!(block.digest(), other.digest());
    }

    #[test]
    fn receive_draft_references_send_block() {
        let from = BlockHash("cd".repeat(32));
        let block = AccountBlock::receive(1, 1, addr(3), from.clone());
        assert!(block.is_receive());
        assert_eq!(block.from_block_hash, from);
        assert_eq!(block.amount, "0");
        assert_eq!(block.address, block.to_address);
    }

    #[test]
    fn seal_is_deterministic_and_binds_nonce() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path());
        let (definition, _) = vault.create_new("pw", "test").unwrap();
        let keystore = vault.decrypt(&definition, "pw").unwrap();
        let (address, signer) = keystore.derive_account(0);

        let mut a = AccountBlock::send(1, 1, address.clone(), addr(9), 5, TokenStandard::znn());
        a.chain_onto(None);
        let mut b = a.clone();

        a.seal(&signer);
        b.seal(&signer);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.signature, b.signature);

        // A different nonce produces a different block hash.
        b.nonce = "0100000000000000".to_string();
        b.seal(&signer);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn account_info_balance_lookup() {
        let json = serde_json::json!({
            "address": addr(1).0,
            "accountHeight": 7,
            "balanceInfoMap": {
                (TokenStandard::znn().0): {
                    "token": {
                        "name": "Zenon",
                        "symbol": "ZNN",
                        "decimals": 8,
                        "tokenStandard": TokenStandard::znn().0,
                    },
                    "balance": "150000000",
                }
            }
        });
        let info: AccountInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.balance_of(&TokenStandard::znn()), 150_000_000);
        assert_eq!(info.balance_of(&TokenStandard::qsr()), 0);
    }
}
