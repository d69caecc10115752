// SPDX-License-Identifier: AGPL-3.0-or-later

//! # API Data Models
//!
//! Domain newtypes and the request/response structures used by the REST
//! API. All DTOs derive `Serialize`, `Deserialize`, and `ToSchema` for
//! automatic JSON handling and OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Primitives**: [`Address`], [`BlockHash`], [`TokenStandard`]
//! - **Wallet**: init/restore/unlock requests, account listings
//! - **Transfer**: send/receive requests, unreceived block pages
//! - **Plasma**: fusion requests and expiration responses

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Primitives
// =============================================================================

/// Network address wrapper.
///
/// Format: `z1` followed by 38 hexadecimal characters (19 bytes of
/// account material). Provides type safety for addresses throughout the
/// service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub String);

impl Address {
    /// Parse and validate an address string.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let hex_part = value
            .strip_prefix("z1")
            .ok_or_else(|| ParseError::Address(value.to_string()))?;
        if hex_part.len() != 38 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::Address(value.to_string()));
        }
        Ok(Address(value.to_string()))
    }

    /// The embedded plasma contract account.
    pub fn plasma_contract() -> Self {
        Address(format!("z1{}", "ed".repeat(19)))
    }

    /// Whether this is one of the network's embedded contract accounts
    /// this service interacts with.
    pub fn is_embedded(&self) -> bool {
        *self == Self::plasma_contract()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// Account block hash (32 bytes, hex encoded).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
pub struct BlockHash(pub String);

impl BlockHash {
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::BlockHash(value.to_string()));
        }
        Ok(BlockHash(value.to_lowercase()))
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token standard identifier (`zts...`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
pub struct TokenStandard(pub String);

impl std::fmt::Display for TokenStandard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TokenStandard {
    /// The native ZNN coin standard.
    pub fn znn() -> Self {
        TokenStandard("zts1znnxxxxxxxxxxxxx9z4ulx".to_string())
    }

    /// The native QSR coin standard.
    pub fn qsr() -> Self {
        TokenStandard("zts1qsrxxxxxxxxxxxxxmrhjll".to_string())
    }

    /// Whether this is one of the two native coins (fixed 8 decimals).
    pub fn is_native_coin(&self) -> bool {
        *self == Self::znn() || *self == Self::qsr()
    }
}

/// Decimal places used by the native ZNN and QSR coins.
pub const COIN_DECIMALS: u8 = 8;

/// Parse error for primitive newtypes.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("invalid block hash: {0}")]
    BlockHash(String),

    #[error("invalid amount: {0}")]
    Amount(String),
}

// =============================================================================
// Accounts
// =============================================================================

/// A deterministically derived address+index pair from the keystore.
///
/// Immutable once derived. Owned by the wallet session; other components
/// hold copies, never a second source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct WalletAccount {
    /// The derived address.
    pub address: Address,
    /// Derivation index within the keystore.
    pub index: u32,
}

impl std::fmt::Display for WalletAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.address, self.index)
    }
}

/// Paged account listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletAccountList {
    pub list: Vec<WalletAccount>,
    /// Total roster size, not the page size.
    pub count: usize,
}

/// Account selector: an address string or a bare account index.
///
/// The API accepts either form in `{account}` path segments.
#[derive(Debug, Clone)]
pub enum AccountSelector {
    Address(Address),
    Index(u32),
}

impl AccountSelector {
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        if let Ok(index) = value.parse::<u32>() {
            return Ok(AccountSelector::Index(index));
        }
        Address::parse(value).map(AccountSelector::Address)
    }
}

// =============================================================================
// Amounts
// =============================================================================

/// Parse a human-readable decimal amount into raw token units.
///
/// # Arguments
/// * `amount` - Amount as a string (e.g., "1.5")
/// * `decimals` - Number of decimals (8 for ZNN/QSR)
pub fn parse_amount(amount: &str, decimals: u8) -> Result<u128, ParseError> {
    let parts: Vec<&str> = amount.split('.').collect();

    if parts.len() > 2 || parts[0].is_empty() {
        return Err(ParseError::Amount(amount.to_string()));
    }

    let whole = parts[0]
        .parse::<u128>()
        .map_err(|_| ParseError::Amount(amount.to_string()))?;

    let decimal_part = if parts.len() == 2 {
        let dec_str = parts[1];
        if dec_str.is_empty() || dec_str.len() > decimals as usize {
            return Err(ParseError::Amount(amount.to_string()));
        }
        // Pad with zeros to match decimals
        let padded = format!("{:0<width$}", dec_str, width = decimals as usize);
        padded
            .parse::<u128>()
            .map_err(|_| ParseError::Amount(amount.to_string()))?
    } else {
        0u128
    };

    let multiplier = 10u128.pow(decimals as u32);
    whole
        .checked_mul(multiplier)
        .and_then(|w| w.checked_add(decimal_part))
        .ok_or_else(|| ParseError::Amount(amount.to_string()))
}

/// Format raw token units into a human-readable decimal amount.
pub fn format_amount(amount: u128, decimals: u8) -> String {
    if amount == 0 {
        return "0".to_string();
    }

    let divisor = 10u128.pow(decimals as u32);
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder == 0 {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }
}

// =============================================================================
// Wallet DTOs
// =============================================================================

/// Request to initialize a new wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitWalletRequest {
    /// Password used to encrypt the new keystore.
    pub password: String,
}

/// Response to a wallet initialization.
///
/// The mnemonic is returned exactly once; it is never persisted in
/// plaintext and cannot be retrieved again.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitWalletResponse {
    pub mnemonic: String,
}

/// Request to restore a wallet from an existing mnemonic.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RestoreWalletRequest {
    pub password: String,
    pub mnemonic: String,
}

/// Request to unlock the wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnlockWalletRequest {
    pub password: String,
}

/// Wallet session status flags.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletStatusResponse {
    pub is_initialized: bool,
    pub is_unlocked: bool,
}

/// Request to derive additional accounts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddAccountsRequest {
    /// Number of sequential accounts to derive (must be >= 1).
    pub count: u32,
}

// =============================================================================
// Transfer DTOs
// =============================================================================

/// Request to send tokens from a wallet account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendTransferRequest {
    /// Destination address.
    pub address: Address,
    /// Amount as a decimal string (e.g. "1.5").
    pub amount: String,
    /// Token standard to transfer; defaults to ZNN.
    pub token_standard: Option<TokenStandard>,
}

/// Request to receive a specific inbound block.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReceiveTransferRequest {
    pub block_hash: BlockHash,
}

/// A confirmed account block as returned after submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountBlockResponse {
    pub hash: BlockHash,
    pub address: Address,
    pub to_address: Address,
    pub amount: String,
    pub token_standard: TokenStandard,
    pub height: u64,
}

// =============================================================================
// Plasma DTOs
// =============================================================================

/// Determines the mode for generating plasma.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlasmaMode {
    /// Proof-of-Work only.
    Pow,
    /// Automatically fuse; fail if fusion cannot provide capacity.
    Fuse,
    /// Automatically fuse, falling back to Proof-of-Work.
    Both,
}

/// Request to fuse QSR from a wallet account into plasma.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FusePlasmaRequest {
    /// Beneficiary address receiving the plasma.
    pub address: Address,
    /// Amount of QSR to fuse, as a decimal string.
    pub amount: String,
}

/// Request to revoke a plasma fusion; the fused QSR is sent back.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelPlasmaRequest {
    /// Id of the fusion entry to cancel.
    pub id_hash: BlockHash,
}

/// Request to fuse plasma to an address via the community bot.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FuseBotPlasmaRequest {
    pub address: Address,
}

/// Fusion expiration as reported by the plasma bot.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BotPlasmaExpirationResponse {
    pub expiration: Option<chrono::DateTime<chrono::Utc>>,
}

// =============================================================================
// Utility DTOs
// =============================================================================

/// Request to check an address string.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateAddressRequest {
    pub address: String,
}

/// Outcome of an address validation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateAddressResponse {
    pub is_valid: bool,
    /// Whether the address belongs to an embedded contract.
    pub is_embedded: bool,
}

// =============================================================================
// Auto-receiver DTOs
// =============================================================================

/// Status flags of the auto-receive subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AutoReceiverStatusResponse {
    pub enabled: bool,
    pub connected: bool,
    /// True once the initial resync completed and live processing runs.
    pub processing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parse_accepts_valid() {
        let addr = Address::parse("z1aabbccddeeff00112233445566778899aabbcc").unwrap();
        assert_eq!(addr.to_string(), "z1aabbccddeeff00112233445566778899aabbcc");
    }

    #[test]
    fn address_parse_rejects_bad_prefix_and_length() {
        assert!(Address::parse("x1aabbccddeeff00112233445566778899aabbcc").is_err());
        assert!(Address::parse("z1aabb").is_err());
        assert!(Address::parse("z1zzbbccddeeff00112233445566778899aabbcc").is_err());
    }

    #[test]
    fn block_hash_parse_normalizes_case() {
        let hex = "AB".repeat(32);
        let hash = BlockHash::parse(&hex).unwrap();
        assert_eq!(hash.0, "ab".repeat(32));
        assert!(BlockHash::parse("1234").is_err());
    }

    #[test]
    fn account_selector_parses_index_and_address() {
        assert!(matches!(
            AccountSelector::parse("3").unwrap(),
            AccountSelector::Index(3)
        ));
        assert!(matches!(
            AccountSelector::parse("z1aabbccddeeff00112233445566778899aabbcc").unwrap(),
            AccountSelector::Address(_)
        ));
        assert!(AccountSelector::parse("not-an-account").is_err());
    }

    #[test]
    fn parse_amount_whole_and_decimal() {
        assert_eq!(parse_amount("1", COIN_DECIMALS).unwrap(), 100_000_000);
        assert_eq!(parse_amount("1.5", COIN_DECIMALS).unwrap(), 150_000_000);
        assert_eq!(parse_amount("0.00000001", COIN_DECIMALS).unwrap(), 1);
    }

    #[test]
    fn parse_amount_rejects_malformed() {
        assert!(parse_amount("1.2.3", COIN_DECIMALS).is_err());
        assert!(parse_amount("", COIN_DECIMALS).is_err());
        assert!(parse_amount("1.", COIN_DECIMALS).is_err());
        // Too many decimal places
        assert!(parse_amount("0.000000001", COIN_DECIMALS).is_err());
    }

    #[test]
    fn format_amount_round_trips() {
        assert_eq!(format_amount(100_000_000, COIN_DECIMALS), "1");
        assert_eq!(format_amount(150_000_000, COIN_DECIMALS), "1.5");
        assert_eq!(format_amount(0, COIN_DECIMALS), "0");
        assert_eq!(format_amount(1, COIN_DECIMALS), "0.00000001");
    }
}
