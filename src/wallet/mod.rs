// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Wallet Session
//!
//! Owns the keystore lifecycle (uninitialized → locked → unlocked), the
//! account roster, and account lookup by address or index.
//!
//! ## Concurrency
//!
//! All mutating operations serialize on one session-wide async mutex.
//! The roster is additionally published as an immutable snapshot
//! (`Arc<[WalletAccount]>`, rebuilt wholesale on every mutation) so the
//! hot submission path and the auto-receiver read it without touching
//! the mutation lock; readers never observe a half-built list.
//!
//! ## Security wipe
//!
//! Repeated failed unlock attempts reaching the configured erase limit
//! discard the wallet definition entirely, returning the session to the
//! uninitialized state.

pub mod events;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::autolock::AutoLock;
use crate::config::WalletOptions;
use crate::error::WalletError;
use crate::keystore::{
    AccountSigner, KeyStore, KeyStoreDefinition, KeyVault, KeystoreError, ACCOUNT_COUNT_KEY,
};
use crate::models::{AccountSelector, WalletAccount, WalletAccountList, WalletStatusResponse};
use events::{EventSink, WalletEvent};

struct SessionInner {
    definition: Option<KeyStoreDefinition>,
    keystore: Option<KeyStore>,
    accounts: Option<Vec<WalletAccount>>,
    failed_unlock_attempts: u32,
}

/// Custodial wallet session.
pub struct WalletSession {
    options: WalletOptions,
    vault: Arc<dyn KeyVault>,
    auto_lock: Arc<AutoLock>,
    events: EventSink,
    initialized: AtomicBool,
    unlocked: AtomicBool,
    inner: Mutex<SessionInner>,
    roster: RwLock<Arc<[WalletAccount]>>,
}

impl WalletSession {
    pub fn new(
        options: WalletOptions,
        vault: Arc<dyn KeyVault>,
        auto_lock: Arc<AutoLock>,
        events: EventSink,
    ) -> Self {
        Self {
            options,
            vault,
            auto_lock,
            events,
            initialized: AtomicBool::new(false),
            unlocked: AtomicBool::new(false),
            inner: Mutex::new(SessionInner {
                definition: None,
                keystore: None,
                accounts: None,
                failed_unlock_attempts: 0,
            }),
            roster: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Attempt to discover an existing on-disk wallet definition.
    /// Called once at startup; the session stays locked either way.
    pub async fn discover(&self) {
        if let Some(definition) = self.vault.find_definition(&self.options.name) {
            info!(wallet = %definition.wallet_name, "Found existing wallet definition");

            let mut inner = self.inner.lock().await;
            inner.definition = Some(definition);
            inner.failed_unlock_attempts = 0;
            self.initialized.store(true, Ordering::Release);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::Acquire)
    }

    pub fn status(&self) -> WalletStatusResponse {
        WalletStatusResponse {
            is_initialized: self.is_initialized(),
            is_unlocked: self.is_unlocked(),
        }
    }

    /// Current roster snapshot; cheap, never blocks mutations.
    pub fn roster(&self) -> Arc<[WalletAccount]> {
        Arc::clone(&self.roster.read().expect("roster lock poisoned"))
    }

    fn publish_roster(&self, accounts: &[WalletAccount]) {
        *self.roster.write().expect("roster lock poisoned") = Arc::from(accounts.to_vec());
    }

    /// Initialize a brand new wallet. Returns the generated mnemonic —
    /// the only time it is ever exposed.
    pub async fn init(&self, password: &str) -> Result<String, WalletError> {
        let mnemonic;
        let roster;
        {
            let mut inner = self.inner.lock().await;

            if inner.definition.is_some() {
                return Err(WalletError::AlreadyInitialized);
            }

            info!(wallet = %self.options.name, "Initialize");

            let (definition, generated) = self
                .vault
                .create_new(password, &self.options.name)
                .map_err(|e| WalletError::Keystore(e.to_string()))?;

            self.auto_lock.activity();

            let keystore = self
                .vault
                .decrypt(&definition, password)
                .map_err(|e| WalletError::Keystore(e.to_string()))?;

            self.init_accounts(&mut inner, &keystore, &definition, 1);

            inner.definition = Some(definition);
            inner.keystore = Some(keystore);
            inner.failed_unlock_attempts = 0;
            self.initialized.store(true, Ordering::Release);
            self.unlocked.store(true, Ordering::Release);

            mnemonic = generated;
            roster = self.roster();
        }

        let _ = self.events.send(WalletEvent::Initialized(roster.to_vec()));

        Ok(mnemonic)
    }

    /// Restore a wallet from a mnemonic, overwriting any previous
    /// definition of the same name.
    pub async fn restore(&self, password: &str, mnemonic: &str) -> Result<(), WalletError> {
        let roster;
        {
            let mut inner = self.inner.lock().await;

            info!(wallet = %self.options.name, "Restore");

            let definition = self
                .vault
                .create_from_mnemonic(mnemonic, password, &self.options.name)
                .map_err(|e| match e {
                    KeystoreError::InvalidMnemonic => WalletError::InvalidMnemonic,
                    other => WalletError::Keystore(other.to_string()),
                })?;

            self.auto_lock.activity();

            let keystore = self
                .vault
                .decrypt(&definition, password)
                .map_err(|e| WalletError::Keystore(e.to_string()))?;

            self.init_accounts(&mut inner, &keystore, &definition, 1);

            inner.definition = Some(definition);
            inner.keystore = Some(keystore);
            inner.failed_unlock_attempts = 0;
            self.initialized.store(true, Ordering::Release);
            self.unlocked.store(true, Ordering::Release);

            roster = self.roster();
        }

        let _ = self.events.send(WalletEvent::Initialized(roster.to_vec()));

        Ok(())
    }

    /// Unlock the wallet. On a wrong password the failed-attempt
    /// counter advances; reaching the erase limit wipes the wallet
    /// definition entirely and resets the counter.
    pub async fn unlock(&self, password: &str) -> Result<(), WalletError> {
        let newly_visible;
        {
            let mut inner = self.inner.lock().await;

            let definition = inner
                .definition
                .clone()
                .ok_or(WalletError::NotInitialized)?;

            info!(wallet = %self.options.name, "Unlock");

            self.auto_lock.activity();

            let keystore = match self.vault.decrypt(&definition, password) {
                Ok(keystore) => keystore,
                Err(KeystoreError::IncorrectPassword) => {
                    inner.accounts = None;
                    inner.keystore = None;
                    self.publish_roster(&[]);
                    self.unlocked.store(false, Ordering::Release);

                    if let Some(limit) = self.options.erase_limit {
                        inner.failed_unlock_attempts += 1;

                        if inner.failed_unlock_attempts >= limit {
                            warn!(
                                wallet = %self.options.name,
                                attempts = inner.failed_unlock_attempts,
                                "Erase limit reached, discarding wallet definition"
                            );
                            if let Err(e) = self.vault.erase(&definition) {
                                warn!(error = %e, "Failed to erase wallet definition");
                            }
                            inner.definition = None;
                            inner.failed_unlock_attempts = 0;
                            self.initialized.store(false, Ordering::Release);
                        }
                    }

                    return Err(WalletError::IncorrectPassword);
                }
                Err(other) => return Err(WalletError::Keystore(other.to_string())),
            };

            // Re-derive the roster from persisted metadata only on the
            // first unlock; later unlocks reuse the in-memory roster.
            newly_visible = if inner.accounts.is_none() {
                let count = self.read_account_count(&definition).unwrap_or(1).max(1);
                self.init_accounts(&mut inner, &keystore, &definition, count);
                self.roster().to_vec()
            } else {
                Vec::new()
            };

            inner.keystore = Some(keystore);
            inner.failed_unlock_attempts = 0;
            self.unlocked.store(true, Ordering::Release);
        }

        let _ = self.events.send(WalletEvent::Unlocked(newly_visible));

        Ok(())
    }

    /// Discard the in-memory decrypted handle. Roster metadata is
    /// untouched; always succeeds.
    pub async fn lock(&self) {
        {
            let mut inner = self.inner.lock().await;

            info!(wallet = %self.options.name, "Lock");

            self.auto_lock.activity();

            inner.keystore = None;
            inner.failed_unlock_attempts = 0;
            self.unlocked.store(false, Ordering::Release);
        }

        let _ = self.events.send(WalletEvent::Locked);
    }

    /// Resolve an account and its signer by address or index.
    pub async fn get_account(
        &self,
        selector: &AccountSelector,
    ) -> Result<(WalletAccount, AccountSigner), WalletError> {
        let roster = self.roster();
        let account = match selector {
            AccountSelector::Address(address) => roster.iter().find(|a| a.address == *address),
            AccountSelector::Index(index) => roster.iter().find(|a| a.index == *index),
        }
        .cloned();

        let inner = self.inner.lock().await;
        if inner.definition.is_none() {
            return Err(WalletError::NotInitialized);
        }
        let keystore = inner.keystore.as_ref().ok_or(WalletError::Locked)?;

        self.auto_lock.activity();

        let account = account.ok_or(WalletError::AccountNotFound)?;
        let (_, signer) = keystore.derive_account(account.index);

        Ok((account, signer))
    }

    /// Derive the next `count` sequential accounts, persist the new
    /// roster size, and publish the updated snapshot.
    pub async fn add_accounts(&self, count: u32) -> Result<WalletAccountList, WalletError> {
        if count < 1 {
            return Err(WalletError::InvalidAccountCount);
        }

        let added;
        let total;
        {
            let mut inner = self.inner.lock().await;

            if inner.definition.is_none() {
                return Err(WalletError::NotInitialized);
            }
            let keystore = inner.keystore.as_ref().ok_or(WalletError::Locked)?;

            self.auto_lock.activity();

            let existing = inner.accounts.as_ref().map(|a| a.len()).unwrap_or(0) as u32;

            let mut to_add = Vec::with_capacity(count as usize);
            for index in existing..existing + count {
                let (address, _) = keystore.derive_account(index);
                to_add.push(WalletAccount { address, index });
            }

            let definition = inner.definition.clone().expect("checked above");
            self.write_account_count(&definition, existing + count);

            let accounts = inner.accounts.get_or_insert_with(Vec::new);
            accounts.extend(to_add.iter().cloned());
            total = accounts.len();
            let snapshot = accounts.clone();
            self.publish_roster(&snapshot);

            added = to_add;
        }

        let _ = self
            .events
            .send(WalletEvent::AccountsAdded(added.clone()));

        Ok(WalletAccountList {
            list: added,
            count: total,
        })
    }

    /// Paged view of the roster.
    pub fn get_accounts(
        &self,
        page_index: usize,
        page_size: usize,
    ) -> Result<WalletAccountList, WalletError> {
        if !self.is_initialized() {
            return Err(WalletError::NotInitialized);
        }
        if !self.is_unlocked() {
            return Err(WalletError::Locked);
        }

        let roster = self.roster();
        let list = roster
            .iter()
            .skip(page_index.saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();

        Ok(WalletAccountList {
            list,
            count: roster.len(),
        })
    }

    fn init_accounts(
        &self,
        inner: &mut SessionInner,
        keystore: &KeyStore,
        definition: &KeyStoreDefinition,
        count: u32,
    ) {
        let mut accounts = Vec::with_capacity(count as usize);
        for index in 0..count {
            let (address, _) = keystore.derive_account(index);
            accounts.push(WalletAccount { address, index });
        }

        self.write_account_count(definition, count);

        self.publish_roster(&accounts);
        inner.accounts = Some(accounts);
    }

    fn read_account_count(&self, definition: &KeyStoreDefinition) -> Option<u32> {
        match self.vault.read_metadata(definition, ACCOUNT_COUNT_KEY) {
            Ok(value) => value.and_then(|v| v.as_u64()).map(|v| v as u32),
            Err(e) => {
                warn!(error = %e, "Failed to read account count from wallet metadata");
                None
            }
        }
    }

    fn write_account_count(&self, definition: &KeyStoreDefinition, count: u32) {
        if let Err(e) =
            self.vault
                .write_metadata(definition, ACCOUNT_COUNT_KEY, serde_json::json!(count))
        {
            warn!(error = %e, "Failed to write account count to wallet metadata");
        }
    }
}
