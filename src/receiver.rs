// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Auto-Receiver
//!
//! Background reconciliation of inbound transfers. Every wallet account
//! has an unreceived backlog on chain; this loop backfills that backlog
//! whenever the account becomes visible (init, unlock, derivation,
//! reconnect) and then keeps up with live block notifications from the
//! node. Accounts queue ahead of individual blocks so a backlog is
//! always drained before notifications for the same account.
//!
//! Failure policy: a block that fails to receive is logged and dropped;
//! the next backfill pass picks it up again. "Already received"
//! rejections are expected whenever backfill and live notifications
//! overlap and are dropped silently. The loop itself never exits on an
//! error, only on shutdown.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AutoReceiverOptions;
use crate::models::{AccountSelector, Address, AutoReceiverStatusResponse, BlockHash};
use crate::node::rpc::{BlockNotification, RECONCILE_SYNC_TOLERANCE};
use crate::node::{GatewayError, NodeGateway};
use crate::wallet::events::{EventStream, WalletEvent};
use crate::wallet::WalletSession;

const BACKFILL_PAGE_SIZE: u32 = 50;

/// Work queues of the reconciliation loop.
///
/// Accounts drain before blocks: a freshly visible account's entire
/// backlog is fetched and queued before any already-queued live block
/// is processed.
#[derive(Default)]
struct ReconcileQueues {
    accounts: VecDeque<Address>,
    blocks: VecDeque<(BlockHash, Address)>,
    seen: HashSet<BlockHash>,
}

impl ReconcileQueues {
    /// Queue an account for backlog reconciliation.
    fn push_account(&mut self, address: Address) {
        if !self.accounts.contains(&address) {
            self.accounts.push_back(address);
        }
    }

    /// Queue a single block; duplicates are ignored.
    fn push_block(&mut self, hash: BlockHash, address: Address) -> bool {
        if self.seen.insert(hash.clone()) {
            self.blocks.push_back((hash, address));
            true
        } else {
            false
        }
    }

    fn pop_account(&mut self) -> Option<Address> {
        self.accounts.pop_front()
    }

    /// Next block, only once no account backfill is pending.
    fn pop_block(&mut self) -> Option<(BlockHash, Address)> {
        if !self.accounts.is_empty() {
            return None;
        }
        let entry = self.blocks.pop_front()?;
        self.seen.remove(&entry.0);
        Some(entry)
    }

    fn requeue_block_front(&mut self, hash: BlockHash, address: Address) {
        self.seen.insert(hash.clone());
        self.blocks.push_front((hash, address));
    }

    fn clear(&mut self) {
        self.accounts.clear();
        self.blocks.clear();
        self.seen.clear();
    }

    fn is_drained(&self) -> bool {
        self.accounts.is_empty() && self.blocks.is_empty()
    }
}

/// Background service receiving inbound transfers for wallet accounts.
pub struct AutoReceiver {
    options: AutoReceiverOptions,
    gateway: Arc<NodeGateway>,
    session: Arc<WalletSession>,
    connected: AtomicBool,
    processing: AtomicBool,
    /// Addresses excluded from auto-receiving.
    muted: Mutex<HashSet<Address>>,
    /// Addresses re-enabled since the last tick; their backlogs get
    /// requeued.
    restored: Mutex<Vec<Address>>,
}

impl AutoReceiver {
    pub fn new(
        options: AutoReceiverOptions,
        gateway: Arc<NodeGateway>,
        session: Arc<WalletSession>,
    ) -> Self {
        Self {
            options,
            gateway,
            session,
            connected: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            muted: Mutex::new(HashSet::new()),
            restored: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> AutoReceiverStatusResponse {
        AutoReceiverStatusResponse {
            enabled: self.options.enabled,
            connected: self.connected.load(Ordering::Acquire),
            processing: self.processing.load(Ordering::Acquire),
        }
    }

    /// Exclude an address from auto-receiving.
    pub fn unsubscribe(&self, address: Address) {
        self.muted.lock().expect("muted set poisoned").insert(address);
    }

    /// Re-include an address; its backlog is reconciled on the next
    /// tick.
    pub fn subscribe(&self, address: Address) {
        let was_muted = self
            .muted
            .lock()
            .expect("muted set poisoned")
            .remove(&address);
        if was_muted {
            self.restored
                .lock()
                .expect("restored list poisoned")
                .push(address);
        }
    }

    pub fn is_subscribed(&self, address: &Address) -> bool {
        !self.muted.lock().expect("muted set poisoned").contains(address)
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut events: EventStream,
        shutdown: CancellationToken,
    ) {
        info!(
            enabled = self.options.enabled,
            interval_secs = self.options.timer_interval.as_secs(),
            "Auto-receiver starting"
        );

        let mut queues = ReconcileQueues::default();
        let mut notifications: Option<mpsc::UnboundedReceiver<BlockNotification>> = None;
        let mut ticker = tokio::time::interval(self.options.timer_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Auto-receiver shutting down");
                    return;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event, &mut queues),
                        // Session gone; nothing left to reconcile for.
                        None => {
                            info!("wallet event stream closed");
                            return;
                        }
                    }
                }
                notification = recv_or_pending(&mut notifications) => {
                    match notification {
                        Some(n) => self.handle_notification(n, &mut queues),
                        None => {
                            debug!("notification stream closed");
                            notifications = None;
                            self.connected.store(false, Ordering::Release);
                            self.processing.store(false, Ordering::Release);
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.tick(&mut queues, &mut notifications).await;
                }
            }
        }
    }

    fn handle_event(&self, event: WalletEvent, queues: &mut ReconcileQueues) {
        match event {
            WalletEvent::Initialized(_) | WalletEvent::Unlocked(_) => {
                // Reconcile the whole visible roster from scratch.
                queues.clear();
                for account in self.session.roster().iter() {
                    if self.is_subscribed(&account.address) {
                        queues.push_account(account.address.clone());
                    }
                }
            }
            WalletEvent::AccountsAdded(accounts) => {
                for account in accounts {
                    if self.is_subscribed(&account.address) {
                        queues.push_account(account.address);
                    }
                }
            }
            WalletEvent::Locked => {
                // Queues stay; draining waits for the next unlock.
            }
        }
    }

    fn handle_notification(&self, n: BlockNotification, queues: &mut ReconcileQueues) {
        if !self.options.enabled {
            return;
        }
        let known = self
            .session
            .roster()
            .iter()
            .any(|account| account.address == n.to_address);
        if !known || !self.is_subscribed(&n.to_address) {
            return;
        }
        if queues.push_block(n.hash.clone(), n.to_address.clone()) {
            debug!(hash = %n.hash, address = %n.to_address, "inbound block queued");
        }
    }

    async fn tick(
        &self,
        queues: &mut ReconcileQueues,
        notifications: &mut Option<mpsc::UnboundedReceiver<BlockNotification>>,
    ) {
        let restored = std::mem::take(
            &mut *self.restored.lock().expect("restored list poisoned"),
        );
        for address in restored {
            queues.push_account(address);
        }

        if !self.options.enabled {
            return;
        }

        if !self.gateway.is_connected() {
            self.connected.store(false, Ordering::Release);
            self.processing.store(false, Ordering::Release);
            if !self.gateway.connect().await {
                return;
            }
        }
        if notifications.is_none() {
            // Fresh connection: resubscribe and reconcile everything we
            // can see, since notifications were lost while disconnected.
            *notifications = Some(self.gateway.rpc().subscribe_blocks());
            queues.clear();
            for account in self.session.roster().iter() {
                if self.is_subscribed(&account.address) {
                    queues.push_account(account.address.clone());
                }
            }
        }
        self.connected.store(true, Ordering::Release);

        if !self.session.is_unlocked() {
            self.processing.store(false, Ordering::Release);
            return;
        }

        match self.gateway.sync_status().await {
            Ok(status) if status.is_synced_within(RECONCILE_SYNC_TOLERANCE) => {}
            Ok(status) => {
                debug!(lag = status.lag(), "node too far behind; deferring reconciliation");
                return;
            }
            Err(e) => {
                warn!(error = %e, "sync status unavailable");
                return;
            }
        }

        self.backfill(queues).await;
        self.drain_blocks(queues).await;

        if queues.is_drained() {
            self.processing.store(true, Ordering::Release);
        }
    }

    /// Fetch the unreceived backlog of every queued account into the
    /// block queue.
    async fn backfill(&self, queues: &mut ReconcileQueues) {
        while let Some(address) = queues.pop_account() {
            let mut page_index = 0;
            loop {
                let page = match self
                    .gateway
                    .rpc()
                    .unreceived_blocks(&address, page_index, BACKFILL_PAGE_SIZE)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(address = %address, error = %e, "backfill failed");
                        return;
                    }
                };
                for block in &page.list {
                    queues.push_block(block.hash.clone(), address.clone());
                }
                if !page.more {
                    break;
                }
                page_index += 1;
            }
            debug!(address = %address, "backlog queued");
        }
    }

    /// Receive every queued block. Stops early when the wallet locks
    /// mid-drain; the queue survives for the next unlock.
    async fn drain_blocks(&self, queues: &mut ReconcileQueues) {
        while let Some((hash, address)) = queues.pop_block() {
            let selector = AccountSelector::Address(address.clone());
            let (_, signer) = match self.session.get_account(&selector).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(address = %address, error = %e, "account unavailable; pausing drain");
                    queues.requeue_block_front(hash, address);
                    return;
                }
            };

            match self
                .gateway
                .receive_transfer(&address, &signer, hash.clone())
                .await
            {
                Ok(block) => {
                    debug!(hash = %hash, receive = %block.hash, "transfer received");
                }
                Err(GatewayError::Rpc(ref e)) if e.is_already_received() => {
                    debug!(hash = %hash, "already received; dropping");
                }
                Err(e) => {
                    warn!(hash = %hash, error = %e, "receive failed; dropping");
                }
            }
        }
    }
}

async fn recv_or_pending(
    notifications: &mut Option<mpsc::UnboundedReceiver<BlockNotification>>,
) -> Option<BlockNotification> {
    match notifications {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autolock::AutoLock;
    use crate::config::{
        AutoLockOptions, FusionOptions, NodeOptions, PlasmaBotOptions, WalletOptions,
    };
    use crate::keystore::FileKeyVault;
    use crate::models::{PlasmaMode, TokenStandard};
    use crate::node::rpc::{
        AccountBlock, AccountBlockInfo, AccountBlockPage, AccountInfo, Frontier, FusionEntryList,
        NodeRpc, PlasmaInfo, PowRequirement, RpcError, SyncState, SyncStatus, Token,
        UnreceivedPage,
    };
    use crate::plasma::{FusionProvisioner, PlasmaBotClient};
    use crate::wallet::events;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    fn hash(tag: u8) -> BlockHash {
        BlockHash(hex::encode([tag; 32]))
    }

    fn addr(tag: u8) -> Address {
        Address(format!("z1{}", hex::encode([tag; 19])))
    }

    #[test]
    fn block_queue_is_idempotent() {
        let mut queues = ReconcileQueues::default();
        assert!(queues.push_block(hash(1), addr(1)));
        assert!(!queues.push_block(hash(1), addr(1)));
        assert!(queues.push_block(hash(2), addr(1)));

        assert_eq!(queues.pop_block().unwrap().0, hash(1));
        // Popped entries may be queued again later.
        assert!(queues.push_block(hash(1), addr(1)));
    }

    #[test]
    fn accounts_drain_before_blocks() {
        let mut queues = ReconcileQueues::default();
        queues.push_block(hash(1), addr(1));
        queues.push_account(addr(2));

        assert!(queues.pop_block().is_none());
        assert_eq!(queues.pop_account().unwrap(), addr(2));
        assert_eq!(queues.pop_block().unwrap().0, hash(1));
    }

    #[test]
    fn account_queue_deduplicates() {
        let mut queues = ReconcileQueues::default();
        queues.push_account(addr(1));
        queues.push_account(addr(1));
        queues.push_account(addr(2));
        assert_eq!(queues.accounts.len(), 2);
    }

    // ---------------------------------------------------------------
    // Loop integration with a mock node
    // ---------------------------------------------------------------

    #[derive(Default)]
    struct MockLedger {
        unreceived: HashMap<Address, Vec<BlockHash>>,
        received: Vec<BlockHash>,
        reject_as_received: HashSet<BlockHash>,
        frontiers: HashMap<Address, Frontier>,
    }

    struct MockNodeRpc {
        ledger: Mutex<MockLedger>,
        subscribers: Mutex<Vec<mpsc::UnboundedSender<BlockNotification>>>,
    }

    impl MockNodeRpc {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ledger: Mutex::new(MockLedger::default()),
                subscribers: Mutex::new(Vec::new()),
            })
        }

        fn notify(&self, hash: BlockHash, to_address: Address) {
            for sub in self.subscribers.lock().unwrap().iter() {
                let _ = sub.send(BlockNotification {
                    hash: hash.clone(),
                    to_address: to_address.clone(),
                });
            }
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
            Ok(SyncStatus {
                state: SyncState::SyncDone,
                current_height: 100,
                target_height: 100,
            })
        }

        async fn frontier(&self, address: &Address) -> Result<Option<Frontier>, RpcError> {
            Ok(self.ledger.lock().unwrap().frontiers.get(address).cloned())
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
            address: &Address,
            _page_index: u32,
            _page_size: u32,
        ) -> Result<UnreceivedPage, RpcError> {
            let ledger = self.ledger.lock().unwrap();
            let list = ledger
                .unreceived
                .get(address)
                .map(|hashes| {
                    hashes
                        .iter()
                        .map(|h| AccountBlockInfo {
                            hash: h.clone(),
                            address: addr(0xEE),
                            to_address: address.clone(),
                            amount: "100".to_string(),
                            token_standard: TokenStandard::znn(),
                            height: 1,
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(UnreceivedPage { list, more: false })
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
            Ok(PowRequirement {
                available_plasma: 0,
                base_plasma: 21_000,
                required_difficulty: 1,
            })
        }

        async fn publish_block(&self, block: &AccountBlock) -> Result<(), RpcError> {
            let mut ledger = self.ledger.lock().unwrap();
            if ledger.reject_as_received.contains(&block.from_block_hash) {
                return Err(RpcError::Remote {
                    code: -32000,
                    message: "block is already received".to_string(),
                });
            }
            ledger.frontiers.insert(
                block.address.clone(),
                Frontier {
                    height: block.height,
                    hash: block.hash.clone(),
                },
            );
            let from = block.from_block_hash.clone();
            if let Some(backlog) = ledger.unreceived.get_mut(&block.address) {
                backlog.retain(|h| *h != from);
            }
            ledger.received.push(from);
            Ok(())
        }

        fn subscribe_blocks(&self) -> mpsc::UnboundedReceiver<BlockNotification> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().unwrap().push(tx);
            rx
        }
    }

    struct Fixture {
        receiver: Arc<AutoReceiver>,
        session: Arc<WalletSession>,
        rpc: Arc<MockNodeRpc>,
        events: EventStream,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let options = WalletOptions {
            path: dir.path().to_path_buf(),
            name: "api".to_string(),
            erase_limit: None,
        };
        let vault = Arc::new(FileKeyVault::new(dir.path()));
        let auto_lock = Arc::new(AutoLock::new(AutoLockOptions::default()));
        let (sink, events) = events::channel();
        let session = Arc::new(WalletSession::new(options, vault, auto_lock.clone(), sink));

        let rpc = MockNodeRpc::new();
        let fusion = Arc::new(FusionProvisioner::new(
            FusionOptions {
                mode: PlasmaMode::Pow,
                ..FusionOptions::default()
            },
            Some(Arc::new(PlasmaBotClient::new(PlasmaBotOptions {
                api_url: None,
                api_key: String::new(),
            }))),
            rpc.clone() as Arc<dyn NodeRpc>,
        ));
        let gateway = Arc::new(NodeGateway::new(
            NodeOptions {
                settle_delay: Duration::from_millis(1),
                ..NodeOptions::default()
            },
            rpc.clone() as Arc<dyn NodeRpc>,
            fusion,
            auto_lock,
            CancellationToken::new(),
        ));

        let receiver = Arc::new(AutoReceiver::new(
            AutoReceiverOptions {
                enabled: true,
                timer_interval: Duration::from_millis(10),
            },
            gateway,
            session.clone(),
        ));

        Fixture {
            receiver,
            session,
            rpc,
            events,
            _dir: dir,
        }
    }

    async fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(deadline_ms);
        while tokio::time::Instant::now() < deadline {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        done()
    }

    #[tokio::test]
    async fn backlog_is_received_after_init() {
        let f = fixture();
        f.session.init("pw").await.unwrap();
        let account = f.session.roster()[0].clone();

        f.rpc
            .ledger
            .lock()
            .unwrap()
            .unreceived
            .insert(account.address.clone(), vec![hash(1), hash(2)]);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(f.receiver.clone().run(f.events, shutdown.clone()));

        let rpc = f.rpc.clone();
        assert!(wait_until(2_000, || rpc.ledger.lock().unwrap().received.len() == 2).await);
        assert!(wait_until(2_000, || f.receiver.status().processing).await);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn live_notifications_are_received_and_unknown_addresses_ignored() {
        let f = fixture();
        f.session.init("pw").await.unwrap();
        let account = f.session.roster()[0].clone();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(f.receiver.clone().run(f.events, shutdown.clone()));

        // Wait for the loop to subscribe, then push live blocks.
        let rpc = f.rpc.clone();
        assert!(wait_until(2_000, || !rpc.subscribers.lock().unwrap().is_empty()).await);
        f.rpc.notify(hash(8), addr(0xAA));
        f.rpc.notify(hash(9), account.address.clone());

        assert!(
            wait_until(2_000, || rpc.ledger.lock().unwrap().received.contains(&hash(9))).await
        );
        // The block aimed at a foreign address never gets received.
        assert!(!f.rpc.ledger.lock().unwrap().received.contains(&hash(8)));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn already_received_blocks_are_dropped_silently() {
        let f = fixture();
        f.session.init("pw").await.unwrap();
        let account = f.session.roster()[0].clone();

        {
            let mut ledger = f.rpc.ledger.lock().unwrap();
            ledger
                .unreceived
                .insert(account.address.clone(), vec![hash(1), hash(2)]);
            ledger.reject_as_received.insert(hash(1));
        }

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(f.receiver.clone().run(f.events, shutdown.clone()));

        // The rejected block is dropped; the other still lands.
        let rpc = f.rpc.clone();
        assert!(
            wait_until(2_000, || rpc
                .ledger
                .lock()
                .unwrap()
                .received
                .contains(&hash(2)))
            .await
        );
        assert!(!f.rpc.ledger.lock().unwrap().received.contains(&hash(1)));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn locked_wallet_defers_draining() {
        let f = fixture();
        f.session.init("pw").await.unwrap();
        let account = f.session.roster()[0].clone();
        f.session.lock().await;

        f.rpc
            .ledger
            .lock()
            .unwrap()
            .unreceived
            .insert(account.address.clone(), vec![hash(1)]);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(f.receiver.clone().run(f.events, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.rpc.ledger.lock().unwrap().received.is_empty());

        f.session.unlock("pw").await.unwrap();
        let rpc = f.rpc.clone();
        assert!(wait_until(2_000, || !rpc.ledger.lock().unwrap().received.is_empty()).await);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribed_address_is_skipped() {
        let f = fixture();
        f.session.init("pw").await.unwrap();
        let account = f.session.roster()[0].clone();
        f.receiver.unsubscribe(account.address.clone());

        f.rpc
            .ledger
            .lock()
            .unwrap()
            .unreceived
            .insert(account.address.clone(), vec![hash(1)]);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(f.receiver.clone().run(f.events, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.rpc.ledger.lock().unwrap().received.is_empty());

        // Resubscribing queues the backlog again.
        f.receiver.subscribe(account.address.clone());
        let rpc = f.rpc.clone();
        assert!(wait_until(2_000, || !rpc.ledger.lock().unwrap().received.is_empty()).await);

        shutdown.cancel();
        task.await.unwrap();
    }
}
