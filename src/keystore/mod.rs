// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Keystore Gateway
//!
//! Opaque access to a password-protected key container. The service
//! consumes the [`KeyVault`] trait; the file-backed implementation
//! stores one JSON document per wallet under the data directory, which
//! is a transparently-encrypted mount in production deployments. The
//! container's on-disk cryptography is therefore deliberately thin
//! here: a keyed verifier guards the password, and the platform mount
//! guards the bytes.
//!
//! Account derivation is deterministic: the same mnemonic and index
//! always produce the same address and signer.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::Address;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Metadata key under which the wallet's account count is persisted.
pub const ACCOUNT_COUNT_KEY: &str = "walletApi.accountCount";

/// Error type for keystore operations.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("invalid mnemonic")]
    InvalidMnemonic,

    #[error("keystore not found: {0}")]
    NotFound(String),
}

pub type KeystoreResult<T> = Result<T, KeystoreError>;

/// Reference to an on-disk wallet container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStoreDefinition {
    pub wallet_id: String,
    pub wallet_name: String,
    pub path: PathBuf,
}

/// Signs block digests with an account's derived secret.
///
/// The signature scheme stands in for the network's signing algorithm;
/// it is deterministic per (secret, message).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccountSigner {
    secret: [u8; 32],
}

impl AccountSigner {
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key size");
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }

    /// Public account material, used for address derivation and block
    /// sealing.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"znn-pub");
        hasher.update(self.secret);
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for AccountSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccountSigner(..)")
    }
}

/// An unlocked (decrypted) keystore handle.
///
/// Holds the seed in memory; dropped on lock. Derivation by index is
/// pure and side-effect free.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyStore {
    seed: [u8; 64],
    mnemonic: String,
}

impl KeyStore {
    fn from_mnemonic(mnemonic: &bip39::Mnemonic) -> Self {
        Self {
            seed: mnemonic.to_seed(""),
            mnemonic: mnemonic.to_string(),
        }
    }

    /// The mnemonic backing this keystore. Secret; exposed only through
    /// the one-shot init response.
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Derive the account at `index`.
    pub fn derive_account(&self, index: u32) -> (Address, AccountSigner) {
        let mut mac = HmacSha512::new_from_slice(&self.seed).expect("hmac accepts any key size");
        mac.update(b"account");
        mac.update(&index.to_le_bytes());
        let derived = mac.finalize().into_bytes();

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&derived[..32]);
        let signer = AccountSigner { secret };

        let digest: [u8; 32] = {
            let mut hasher = Sha256::new();
            hasher.update(b"znn-addr");
            hasher.update(signer.public_key_bytes());
            hasher.finalize().into()
        };
        let address = Address(format!("z1{}", hex::encode(&digest[..19])));

        (address, signer)
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyStore(..)")
    }
}

/// Password-protected key container access.
pub trait KeyVault: Send + Sync {
    /// Look up an existing wallet definition by name.
    fn find_definition(&self, name: &str) -> Option<KeyStoreDefinition>;

    /// Create a brand new wallet; returns its definition and the
    /// generated mnemonic (the only time it is available).
    fn create_new(&self, password: &str, name: &str)
        -> KeystoreResult<(KeyStoreDefinition, String)>;

    /// Create a wallet from a user-supplied mnemonic, overwriting any
    /// previous wallet of the same name.
    fn create_from_mnemonic(
        &self,
        mnemonic: &str,
        password: &str,
        name: &str,
    ) -> KeystoreResult<KeyStoreDefinition>;

    /// Decrypt a wallet container. Fails with
    /// [`KeystoreError::IncorrectPassword`] on a bad password.
    fn decrypt(&self, definition: &KeyStoreDefinition, password: &str) -> KeystoreResult<KeyStore>;

    /// Discard the wallet definition entirely (security wipe).
    fn erase(&self, definition: &KeyStoreDefinition) -> KeystoreResult<()>;

    /// Read a free-form metadata value from the container file.
    fn read_metadata(
        &self,
        definition: &KeyStoreDefinition,
        key: &str,
    ) -> KeystoreResult<Option<serde_json::Value>>;

    /// Write a free-form metadata value into the container file.
    fn write_metadata(
        &self,
        definition: &KeyStoreDefinition,
        key: &str,
        value: serde_json::Value,
    ) -> KeystoreResult<()>;
}

// =============================================================================
// File-backed implementation
// =============================================================================

/// On-disk container document.
#[derive(Debug, Serialize, Deserialize)]
struct ContainerFile {
    wallet_id: String,
    wallet_name: String,
    /// Hex salt mixed into the password verifier.
    salt: String,
    /// HMAC-SHA256(salt, password) — gate, not cipher; the data
    /// directory is an encrypted mount in production.
    verifier: String,
    mnemonic: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

/// File-per-wallet [`KeyVault`] rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FileKeyVault {
    root: PathBuf,
}

impl FileKeyVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn wallet_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    fn read_container(&self, path: &Path) -> KeystoreResult<ContainerFile> {
        let content = fs::read_to_string(path)
            .map_err(|_| KeystoreError::NotFound(path.display().to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Atomic write via temp-file rename.
    fn write_container(&self, path: &Path, container: &ContainerFile) -> KeystoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, container)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn verifier(salt: &str, password: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(salt.as_bytes()).expect("hmac accepts any key size");
        mac.update(password.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn store(
        &self,
        mnemonic: &bip39::Mnemonic,
        password: &str,
        name: &str,
    ) -> KeystoreResult<KeyStoreDefinition> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = hex::encode(salt_bytes);

        let container = ContainerFile {
            wallet_id: uuid::Uuid::new_v4().to_string(),
            wallet_name: name.to_string(),
            verifier: Self::verifier(&salt, password),
            salt,
            mnemonic: mnemonic.to_string(),
            metadata: serde_json::Map::new(),
        };

        let path = self.wallet_path(name);
        self.write_container(&path, &container)?;

        Ok(KeyStoreDefinition {
            wallet_id: container.wallet_id,
            wallet_name: container.wallet_name,
            path,
        })
    }
}

impl KeyVault for FileKeyVault {
    fn find_definition(&self, name: &str) -> Option<KeyStoreDefinition> {
        let path = self.wallet_path(name);
        let container = self.read_container(&path).ok()?;
        Some(KeyStoreDefinition {
            wallet_id: container.wallet_id,
            wallet_name: container.wallet_name,
            path,
        })
    }

    fn create_new(
        &self,
        password: &str,
        name: &str,
    ) -> KeystoreResult<(KeyStoreDefinition, String)> {
        let mut entropy = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut entropy);
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
            .map_err(|_| KeystoreError::InvalidMnemonic)?;

        let definition = self.store(&mnemonic, password, name)?;
        Ok((definition, mnemonic.to_string()))
    }

    fn create_from_mnemonic(
        &self,
        mnemonic: &str,
        password: &str,
        name: &str,
    ) -> KeystoreResult<KeyStoreDefinition> {
        let mnemonic = mnemonic
            .parse::<bip39::Mnemonic>()
            .map_err(|_| KeystoreError::InvalidMnemonic)?;
        self.store(&mnemonic, password, name)
    }

    fn decrypt(&self, definition: &KeyStoreDefinition, password: &str) -> KeystoreResult<KeyStore> {
        let container = self.read_container(&definition.path)?;

        if Self::verifier(&container.salt, password) != container.verifier {
            return Err(KeystoreError::IncorrectPassword);
        }

        let mnemonic = container
            .mnemonic
            .parse::<bip39::Mnemonic>()
            .map_err(|_| KeystoreError::InvalidMnemonic)?;
        Ok(KeyStore::from_mnemonic(&mnemonic))
    }

    fn erase(&self, definition: &KeyStoreDefinition) -> KeystoreResult<()> {
        fs::remove_file(&definition.path)?;
        Ok(())
    }

    fn read_metadata(
        &self,
        definition: &KeyStoreDefinition,
        key: &str,
    ) -> KeystoreResult<Option<serde_json::Value>> {
        let container = self.read_container(&definition.path)?;
        Ok(container.metadata.get(key).cloned())
    }

    fn write_metadata(
        &self,
        definition: &KeyStoreDefinition,
        key: &str,
        value: serde_json::Value,
    ) -> KeystoreResult<()> {
        let mut container = self.read_container(&definition.path)?;
        container.metadata.insert(key.to_string(), value);
        self.write_container(&definition.path, &container)
    }
}
