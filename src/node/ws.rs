// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC 2.0 over WebSocket - tokio-tungstenite transport.
//!
//! One connection carries both request/response calls and the push
//! subscription for new account blocks. Responses are correlated to
//! callers by request id; subscription frames fan out to every
//! registered listener. When the socket drops, all in-flight calls fail
//! fast and `is_connected` flips until the next [`WsRpcClient::connect`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::config::NodeOptions;
use crate::models::{Address, BlockHash, TokenStandard};
use crate::node::rpc::{
    AccountBlock, AccountBlockInfo, AccountBlockPage, AccountInfo, BlockNotification, Frontier,
    FusionEntryList, NodeRpc, PlasmaInfo, PowRequirement, RpcError, SyncState, SyncStatus, Token,
    UnreceivedPage,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>>;
type SubscriberList = Arc<Mutex<Vec<mpsc::UnboundedSender<BlockNotification>>>>;

/// WebSocket JSON-RPC client for the full node.
pub struct WsRpcClient {
    options: NodeOptions,
    connected: Arc<AtomicBool>,
    /// Bumped on every successful connect; tasks belonging to an
    /// earlier connection carry a stale value and must not touch state.
    generation: Arc<AtomicU64>,
    next_id: AtomicU64,
    pending: PendingMap,
    subscribers: SubscriberList,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl WsRpcClient {
    pub fn new(options: NodeOptions) -> Self {
        Self {
            options,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            outgoing: Mutex::new(None),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        let sent = {
            let outgoing = self.outgoing.lock().expect("outgoing lock poisoned");
            match outgoing.as_ref() {
                Some(sender) => sender.send(Message::Text(request.to_string())).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.pending
                .lock()
                .expect("pending map poisoned")
                .remove(&id);
            return Err(RpcError::NotConnected);
        }

        let result = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result?,
            // Sender dropped: the reader task ended with the call in flight.
            Ok(Err(_)) => return Err(RpcError::Transport("connection closed".to_string())),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending map poisoned")
                    .remove(&id);
                return Err(RpcError::Transport(format!("{method} timed out")));
            }
        };

        serde_json::from_value(result).map_err(|e| RpcError::InvalidResponse(e.to_string()))
    }

    /// Route one inbound text frame to its caller or to subscribers.
    fn route_frame(text: &str, pending: &PendingMap, subscribers: &SubscriberList) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "discarding unparseable frame");
                return;
            }
        };

        if let Some(id) = frame.get("id").and_then(Value::as_u64) {
            let outcome = match frame.get("error") {
                Some(err) => Err(RpcError::Remote {
                    code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                }),
                None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
            };
            if let Some(tx) = pending.lock().expect("pending map poisoned").remove(&id) {
                // Caller may have timed out already; nothing to do then.
                let _ = tx.send(outcome);
            }
            return;
        }

        if frame.get("method").and_then(Value::as_str) == Some("ledger.subscription") {
            let notifications = Self::parse_notifications(&frame);
            let mut list = subscribers.lock().expect("subscriber list poisoned");
            list.retain(|sub| {
                notifications
                    .iter()
                    .all(|n| sub.send(n.clone()).is_ok())
            });
        }
    }

    fn parse_notifications(frame: &Value) -> Vec<BlockNotification> {
        frame
            .get("params")
            .and_then(|p| p.get("result"))
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| serde_json::from_value(b.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn fail_pending(pending: &PendingMap) {
        let mut map = pending.lock().expect("pending map poisoned");
        for (_, tx) in map.drain() {
            let _ = tx.send(Err(RpcError::Transport("connection closed".to_string())));
        }
    }

    /// Tear down connection state when a socket task exits. No-op when
    /// `generation` is stale: a reader outliving its socket must not
    /// disturb the connection that replaced it.
    fn teardown(
        current: &AtomicU64,
        connected: &AtomicBool,
        pending: &PendingMap,
        generation: u64,
    ) {
        if current.load(Ordering::Acquire) != generation {
            debug!(generation, "stale connection task exited");
            return;
        }
        connected.store(false, Ordering::Release);
        Self::fail_pending(pending);
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncInfoWire {
    state: u8,
    current_height: u64,
    target_height: u64,
}

#[async_trait]
impl NodeRpc for WsRpcClient {
    async fn connect(&self) -> Result<(), RpcError> {
        let (ws, _) = connect_async(&self.options.node_url)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        *self.outgoing.lock().expect("outgoing lock poisoned") = Some(out_tx);

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let generation_w = Arc::clone(&self.generation);
        let connected_w = Arc::clone(&self.connected);
        let pending_w = Arc::clone(&self.pending);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
            Self::teardown(&generation_w, &connected_w, &pending_w, generation);
        });

        let generation_r = Arc::clone(&self.generation);
        let connected_r = Arc::clone(&self.connected);
        let pending = Arc::clone(&self.pending);
        let subscribers = Arc::clone(&self.subscribers);
        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                if let Message::Text(text) = msg {
                    Self::route_frame(&text, &pending, &subscribers);
                }
            }
            debug!("node connection closed");
            Self::teardown(&generation_r, &connected_r, &pending, generation);
        });

        self.connected.store(true, Ordering::Release);

        // Register the push subscription for all new account blocks.
        let _subscription: Value = self
            .call("ledger.subscribe", json!(["allAccountBlocks"]))
            .await?;
        debug!(url = %self.options.node_url, "node connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn sync_status(&self) -> Result<SyncStatus, RpcError> {
        let wire: SyncInfoWire = self.call("stats.syncInfo", json!([])).await?;
        Ok(SyncStatus {
            state: match wire.state {
                1 => SyncState::Syncing,
                2 => SyncState::SyncDone,
                _ => SyncState::Unknown,
            },
            current_height: wire.current_height,
            target_height: wire.target_height,
        })
    }

    async fn frontier(&self, address: &Address) -> Result<Option<Frontier>, RpcError> {
        self.call("ledger.getFrontierAccountBlock", json!([address.0]))
            .await
    }

    async fn account_info(&self, address: &Address) -> Result<AccountInfo, RpcError> {
        self.call("ledger.getAccountInfoByAddress", json!([address.0]))
            .await
    }

    async fn plasma_info(&self, address: &Address) -> Result<PlasmaInfo, RpcError> {
        self.call("embedded.plasma.get", json!([address.0])).await
    }

    async fn token_by_standard(&self, zts: &TokenStandard) -> Result<Option<Token>, RpcError> {
        self.call("embedded.token.getByZts", json!([zts.0])).await
    }

    async fn unreceived_blocks(
        &self,
        address: &Address,
        page_index: u32,
        page_size: u32,
    ) -> Result<UnreceivedPage, RpcError> {
        self.call(
            "ledger.getUnreceivedBlocksByAddress",
            json!([address.0, page_index, page_size]),
        )
        .await
    }

    async fn block_by_hash(
        &self,
        hash: &BlockHash,
    ) -> Result<Option<AccountBlockInfo>, RpcError> {
        self.call("ledger.getAccountBlockByHash", json!([hash.0]))
            .await
    }

    async fn account_blocks(
        &self,
        address: &Address,
        page_index: u32,
        page_size: u32,
    ) -> Result<AccountBlockPage, RpcError> {
        self.call(
            "ledger.getAccountBlocksByPage",
            json!([address.0, page_index, page_size]),
        )
        .await
    }

    async fn fusion_entries(
        &self,
        address: &Address,
        page_index: u32,
        page_size: u32,
    ) -> Result<FusionEntryList, RpcError> {
        self.call(
            "embedded.plasma.getEntriesByAddress",
            json!([address.0, page_index, page_size]),
        )
        .await
    }

    async fn required_pow(&self, block: &AccountBlock) -> Result<PowRequirement, RpcError> {
        self.call(
            "embedded.plasma.getRequiredPoWForAccountBlock",
            json!([{
                "address": block.address.0,
                "blockType": block.block_type,
                "toAddress": block.to_address.0,
                "data": block.data,
            }]),
        )
        .await
    }

    async fn publish_block(&self, block: &AccountBlock) -> Result<(), RpcError> {
        let _: Value = self
            .call("ledger.publishRawTransaction", json!([block]))
            .await?;
        Ok(())
    }

    fn subscribe_blocks(&self) -> mpsc::UnboundedReceiver<BlockNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(tx);
        rx
    }
}
