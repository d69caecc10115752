// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Node Gateway
//!
//! Single entry point for everything that touches the full node. Block
//! submission runs a fixed pipeline:
//!
//! 1. refuse while the node's momentum view lags too far behind
//! 2. take the per-address submission lock (one in-flight block per
//!    account chain)
//! 3. suspend the inactivity auto-lock for the duration
//! 4. chain the draft onto the account frontier
//! 5. provision fee capacity: fused plasma when policy and balance
//!    allow, throttled proof-of-work otherwise
//! 6. seal, sign and publish
//! 7. hold the address lock through a short settle delay so the node
//!    indexes the block before a successor builds on it
//!
//! Locks, permits and the auto-lock suspension are RAII guards and
//! release on every exit path.

pub mod pow;
pub mod rpc;
pub mod ws;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::autolock::AutoLock;
use crate::config::NodeOptions;
use crate::keystore::AccountSigner;
use crate::models::{Address, BlockHash, TokenStandard};
use crate::plasma::{FusionProvisioner, PlasmaError, Provision};
use pow::PowThrottle;
use rpc::{embedded_call, AccountBlock, NodeRpc, RpcError, SyncStatus, SUBMIT_SYNC_TOLERANCE};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("node is {lag} momentums behind; retry once it catches up")]
    NotSynced { lag: u64 },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Plasma(#[from] PlasmaError),

    #[error("proof-of-work generation failed: {0}")]
    Pow(String),
}

/// Serialized, throttled access to the full node.
pub struct NodeGateway {
    options: NodeOptions,
    rpc: Arc<dyn NodeRpc>,
    pow: PowThrottle,
    fusion: Arc<FusionProvisioner>,
    auto_lock: Arc<AutoLock>,
    address_locks: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: CancellationToken,
}

impl NodeGateway {
    pub fn new(
        options: NodeOptions,
        rpc: Arc<dyn NodeRpc>,
        fusion: Arc<FusionProvisioner>,
        auto_lock: Arc<AutoLock>,
        shutdown: CancellationToken,
    ) -> Self {
        let pow = PowThrottle::new(options.max_pow_slots);
        Self {
            options,
            rpc,
            pow,
            fusion,
            auto_lock,
            address_locks: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Raw RPC access for read-only queries.
    pub fn rpc(&self) -> &Arc<dyn NodeRpc> {
        &self.rpc
    }

    pub fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    /// Try to (re)connect; a failure is logged, not fatal, since every
    /// caller also handles the disconnected state.
    pub async fn connect(&self) -> bool {
        match self.rpc.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "node connection failed");
                false
            }
        }
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, GatewayError> {
        Ok(self.rpc.sync_status().await?)
    }

    /// Submit an outbound transfer from `from`.
    pub async fn send_transfer(
        &self,
        from: &Address,
        signer: &AccountSigner,
        to: Address,
        amount: u128,
        token_standard: TokenStandard,
    ) -> Result<AccountBlock, GatewayError> {
        let block = AccountBlock::send(
            self.options.chain_id,
            self.options.protocol_version,
            from.clone(),
            to,
            amount,
            token_standard,
        );
        self.submit(block, signer).await
    }

    /// Submit a block receiving the send block `from_block`.
    pub async fn receive_transfer(
        &self,
        address: &Address,
        signer: &AccountSigner,
        from_block: BlockHash,
    ) -> Result<AccountBlock, GatewayError> {
        let block = AccountBlock::receive(
            self.options.chain_id,
            self.options.protocol_version,
            address.clone(),
            from_block,
        );
        self.submit(block, signer).await
    }

    /// Fuse QSR held by `from` into plasma for `beneficiary` via the
    /// embedded plasma contract.
    pub async fn fuse_plasma(
        &self,
        from: &Address,
        signer: &AccountSigner,
        beneficiary: Address,
        amount: u128,
    ) -> Result<AccountBlock, GatewayError> {
        let block = AccountBlock::contract_call(
            self.options.chain_id,
            self.options.protocol_version,
            from.clone(),
            Address::plasma_contract(),
            amount,
            TokenStandard::qsr(),
            embedded_call("Fuse", &[&beneficiary.0]),
        );
        self.submit(block, signer).await
    }

    /// Revoke the fusion entry `id`; the contract sends the QSR back.
    pub async fn cancel_fusion(
        &self,
        from: &Address,
        signer: &AccountSigner,
        id: BlockHash,
    ) -> Result<AccountBlock, GatewayError> {
        let block = AccountBlock::contract_call(
            self.options.chain_id,
            self.options.protocol_version,
            from.clone(),
            Address::plasma_contract(),
            0,
            TokenStandard::znn(),
            embedded_call("Cancel", &[&id.0]),
        );
        self.submit(block, signer).await
    }

    async fn submit(
        &self,
        mut block: AccountBlock,
        signer: &AccountSigner,
    ) -> Result<AccountBlock, GatewayError> {
        let status = self.rpc.sync_status().await?;
        if !status.is_synced_within(SUBMIT_SYNC_TOLERANCE) {
            return Err(GatewayError::NotSynced { lag: status.lag() });
        }

        let chain_lock = self.address_lock(&block.address);
        let _chain_guard = chain_lock.lock().await;
        let _suspend = self.auto_lock.suspend_scope();

        block.chain_onto(self.rpc.frontier(&block.address).await?.as_ref());

        let quote = self.rpc.required_pow(&block).await?;
        if quote.required_difficulty == 0 {
            block.fused_plasma = quote.base_plasma;
        } else {
            match self.fusion.ensure_capacity(&block.address).await? {
                Provision::Covered => {
                    block.fused_plasma = quote.base_plasma;
                }
                Provision::FallBack => {
                    block.difficulty = quote.required_difficulty;
                    let permit = self.pow.slot().await;
                    block.nonce = pow::generate_nonce(block.digest(), block.difficulty)
                        .await
                        .map_err(|e| GatewayError::Pow(e.to_string()))?;
                    drop(permit);
                }
            }
        }

        block.seal(signer);
        self.rpc.publish_block(&block).await?;
        debug!(
            address = %block.address,
            height = block.height,
            hash = %block.hash,
            "block published"
        );

        // Keep the address lock through the settle window so the next
        // block for this account sees the updated frontier.
        tokio::select! {
            _ = tokio::time::sleep(self.options.settle_delay) => {}
            _ = self.shutdown.cancelled() => {}
        }

        Ok(block)
    }

    fn address_lock(&self, address: &Address) -> Arc<tokio::sync::Mutex<()>> {
        self.address_locks
            .lock()
            .expect("address lock map poisoned")
            .entry(address.clone())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoLockOptions, FusionOptions, PlasmaBotOptions};
    use crate::keystore::{FileKeyVault, KeyVault};
    use crate::models::PlasmaMode;
    use crate::node::rpc::{
        AccountBlockInfo, AccountBlockPage, AccountInfo, BlockNotification, Frontier,
        FusionEntryList, PlasmaInfo, PowRequirement, SyncState, Token, UnreceivedPage,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MockState {
        lag: u64,
        required_difficulty: u64,
        frontiers: HashMap<Address, Frontier>,
        published: Vec<AccountBlock>,
        in_flight: usize,
        max_in_flight: usize,
    }

    struct MockNodeRpc {
        state: Mutex<MockState>,
        publish_delay: Duration,
    }

    impl MockNodeRpc {
        fn new(lag: u64) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(MockState {
                    lag,
                    required_difficulty: 1,
                    ..MockState::default()
                }),
                publish_delay: Duration::from_millis(50),
            })
        }

        fn published(&self) -> Vec<AccountBlock> {
            self.state.lock().unwrap().published.clone()
        }

        fn max_in_flight(&self) -> usize {
            self.state.lock().unwrap().max_in_flight
        }
    }

    #[async_trait]
    impl NodeRpc for MockNodeRpc {
        async fn connect(&self) -> Result<(), RpcError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn sync_status(&self) -> Result<SyncStatus, RpcError> {
            let lag = self.state.lock().unwrap().lag;
            Ok(SyncStatus {
                state: SyncState::Syncing,
                current_height: 10_000,
                target_height: 10_000 + lag,
            })
        }

        async fn frontier(&self, address: &Address) -> Result<Option<Frontier>, RpcError> {
            Ok(self.state.lock().unwrap().frontiers.get(address).cloned())
        }

        async fn account_info(&self, _address: &Address) -> Result<AccountInfo, RpcError> {
            Err(RpcError::NotConnected)
        }

        async fn plasma_info(&self, _address: &Address) -> Result<PlasmaInfo, RpcError> {
            Ok(PlasmaInfo {
                current_plasma: 0,
                max_plasma: 0,
                qsr_amount: "0".to_string(),
            })
        }

        async fn token_by_standard(
            &self,
            _zts: &TokenStandard,
        ) -> Result<Option<Token>, RpcError> {
            Ok(None)
        }

        async fn unreceived_blocks(
            &self,
            _address: &Address,
            _page_index: u32,
            _page_size: u32,
        ) -> Result<UnreceivedPage, RpcError> {
            Err(RpcError::NotConnected)
        }

        async fn block_by_hash(
            &self,
            _hash: &BlockHash,
        ) -> Result<Option<AccountBlockInfo>, RpcError> {
            Ok(None)
        }

        async fn account_blocks(
            &self,
            _address: &Address,
            _page_index: u32,
            _page_size: u32,
        ) -> Result<AccountBlockPage, RpcError> {
            Ok(AccountBlockPage::default())
        }

        async fn fusion_entries(
            &self,
            _address: &Address,
            _page_index: u32,
            _page_size: u32,
        ) -> Result<FusionEntryList, RpcError> {
            Ok(FusionEntryList::default())
        }

        async fn required_pow(&self, _block: &AccountBlock) -> Result<PowRequirement, RpcError> {
            let difficulty = self.state.lock().unwrap().required_difficulty;
            Ok(PowRequirement {
                available_plasma: 0,
                base_plasma: 21_000,
                required_difficulty: difficulty,
            })
        }

        async fn publish_block(&self, block: &AccountBlock) -> Result<(), RpcError> {
            {
                let mut state = self.state.lock().unwrap();
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
            }
            tokio::time::sleep(self.publish_delay).await;
            let mut state = self.state.lock().unwrap();
            state.in_flight -= 1;
            state.frontiers.insert(
                block.address.clone(),
                Frontier {
                    height: block.height,
                    hash: block.hash.clone(),
                },
            );
            state.published.push(block.clone());
            Ok(())
        }

        fn subscribe_blocks(&self) -> mpsc::UnboundedReceiver<BlockNotification> {
            mpsc::unbounded_channel().1
        }
    }

    struct Fixture {
        gateway: Arc<NodeGateway>,
        rpc: Arc<MockNodeRpc>,
        auto_lock: Arc<AutoLock>,
        signer: AccountSigner,
        address: Address,
        alt_signer: AccountSigner,
        alt_address: Address,
        _dir: tempfile::TempDir,
    }

    fn fixture(lag: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path());
        let (definition, _) = vault.create_new("pw", "test").unwrap();
        let keystore = vault.decrypt(&definition, "pw").unwrap();
        let (address, signer) = keystore.derive_account(0);
        let (alt_address, alt_signer) = keystore.derive_account(1);

        let rpc = MockNodeRpc::new(lag);
        let options = NodeOptions {
            settle_delay: Duration::from_millis(10),
            ..NodeOptions::default()
        };
        let fusion = Arc::new(FusionProvisioner::new(
            FusionOptions {
                mode: PlasmaMode::Pow,
                ..FusionOptions::default()
            },
            Some(Arc::new(crate::plasma::PlasmaBotClient::new(
                PlasmaBotOptions {
                    api_url: None,
                    api_key: String::new(),
                },
            ))),
            rpc.clone() as Arc<dyn NodeRpc>,
        ));
        let auto_lock = Arc::new(AutoLock::new(AutoLockOptions::default()));
        let gateway = Arc::new(NodeGateway::new(
            options,
            rpc.clone() as Arc<dyn NodeRpc>,
            fusion,
            Arc::clone(&auto_lock),
            CancellationToken::new(),
        ));

        Fixture {
            gateway,
            rpc,
            auto_lock,
            signer,
            address,
            alt_signer,
            alt_address,
            _dir: dir,
        }
    }

    fn dest() -> Address {
        Address(format!("z1{}", "99".repeat(19)))
    }

    #[tokio::test]
    async fn send_chains_heights_and_previous_hashes() {
        let f = fixture(0);

        let first = f
            .gateway
            .send_transfer(&f.address, &f.signer, dest(), 100, TokenStandard::znn())
            .await
            .unwrap();
        assert_eq!(first.height, 1);

        let second = f
            .gateway
            .send_transfer(&f.address, &f.signer, dest(), 200, TokenStandard::znn())
            .await
            .unwrap();
        assert_eq!(second.height, 2);
        assert_eq!(second.previous_hash, first.hash);
        assert!(!second.signature.is_empty());
        assert!(!second.nonce.is_empty());
    }

    #[tokio::test]
    async fn same_address_submissions_serialize() {
        let f = fixture(0);

        let a = f.gateway.clone();
        let (addr_a, signer_a) = (f.address.clone(), f.signer.clone());
        let first = tokio::spawn(async move {
            a.send_transfer(&addr_a, &signer_a, dest(), 1, TokenStandard::znn())
                .await
        });
        let b = f.gateway.clone();
        let (addr_b, signer_b) = (f.address.clone(), f.signer.clone());
        let second = tokio::spawn(async move {
            b.send_transfer(&addr_b, &signer_b, dest(), 2, TokenStandard::znn())
                .await
        });

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(f.rpc.max_in_flight(), 1);
        let published = f.rpc.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].height, 1);
        assert_eq!(published[1].height, 2);
        assert_eq!(published[1].previous_hash, published[0].hash);
    }

    #[tokio::test]
    async fn distinct_addresses_submit_concurrently() {
        let f = fixture(0);

        let a = f.gateway.clone();
        let (addr_a, signer_a) = (f.address.clone(), f.signer.clone());
        let b = f.gateway.clone();
        let (addr_b, signer_b) = (f.alt_address.clone(), f.alt_signer.clone());

        let (first, second) = tokio::join!(
            a.send_transfer(&addr_a, &signer_a, dest(), 1, TokenStandard::znn()),
            b.send_transfer(&addr_b, &signer_b, dest(), 2, TokenStandard::znn()),
        );
        first.unwrap();
        second.unwrap();

        // Both publishes overlapped inside the mock's delay window.
        assert_eq!(f.rpc.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn submission_refused_while_node_lags() {
        let f = fixture(25);
        let err = f
            .gateway
            .send_transfer(&f.address, &f.signer, dest(), 1, TokenStandard::znn())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotSynced { lag: 25 }));
        assert!(f.rpc.published().is_empty());
    }

    #[tokio::test]
    async fn small_lag_is_tolerated() {
        let f = fixture(3);
        f.gateway
            .send_transfer(&f.address, &f.signer, dest(), 1, TokenStandard::znn())
            .await
            .unwrap();
        assert_eq!(f.rpc.published().len(), 1);
    }

    #[tokio::test]
    async fn zero_difficulty_skips_pow() {
        let f = fixture(0);
        f.rpc.state.lock().unwrap().required_difficulty = 0;

        let block = f
            .gateway
            .send_transfer(&f.address, &f.signer, dest(), 1, TokenStandard::znn())
            .await
            .unwrap();
        assert!(block.nonce.is_empty());
        assert_eq!(block.fused_plasma, 21_000);
    }

    #[tokio::test]
    async fn receive_goes_through_the_full_pipeline() {
        let f = fixture(0);
        let from = BlockHash("ab".repeat(32));

        let block = f
            .gateway
            .receive_transfer(&f.address, &f.signer, from.clone())
            .await
            .unwrap();
        assert!(block.is_receive());
        assert_eq!(block.from_block_hash, from);
        assert_eq!(block.height, 1);
        assert_eq!(f.rpc.published().len(), 1);
    }

    #[tokio::test]
    async fn fuse_targets_the_plasma_contract() {
        let f = fixture(0);

        let block = f
            .gateway
            .fuse_plasma(&f.address, &f.signer, f.alt_address.clone(), 5_000_000_000)
            .await
            .unwrap();
        assert_eq!(block.to_address, Address::plasma_contract());
        assert_eq!(block.token_standard, TokenStandard::qsr());
        assert_eq!(block.amount, "5000000000");
        assert!(!block.data.is_empty());
        assert_eq!(block.height, 1);
        assert!(!block.signature.is_empty());
        assert_eq!(f.rpc.published().len(), 1);
    }

    #[tokio::test]
    async fn cancel_fusion_sends_zero_amount_call() {
        let f = fixture(0);
        let id = BlockHash("ef".repeat(32));

        let block = f
            .gateway
            .cancel_fusion(&f.address, &f.signer, id)
            .await
            .unwrap();
        assert_eq!(block.to_address, Address::plasma_contract());
        assert_eq!(block.amount, "0");
        assert!(!block.data.is_empty());
        assert_eq!(f.rpc.published().len(), 1);

        // The cancel chains onto the account like any other send.
        let follow_up = f
            .gateway
            .send_transfer(&f.address, &f.signer, dest(), 1, TokenStandard::znn())
            .await
            .unwrap();
        assert_eq!(follow_up.height, 2);
        assert_eq!(follow_up.previous_hash, block.hash);
    }

    #[tokio::test]
    async fn auto_lock_suspension_releases_after_submit() {
        let f = fixture(0);
        f.gateway
            .send_transfer(&f.address, &f.signer, dest(), 1, TokenStandard::znn())
            .await
            .unwrap();
        assert!(!f.auto_lock.is_suspended());
    }
}
