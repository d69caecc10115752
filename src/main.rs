// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{env, net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zenon_wallet_api::{
    api,
    autolock::AutoLock,
    config::{
        AutoLockOptions, AutoReceiverOptions, FusionOptions, NodeOptions, PlasmaBotOptions,
        WalletOptions,
    },
    keystore::FileKeyVault,
    node::{rpc::NodeRpc, ws::WsRpcClient, NodeGateway},
    plasma::{FusionProvisioner, PlasmaBotClient},
    receiver::AutoReceiver,
    state::AppState,
    wallet::{events, WalletSession},
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    match env::var("LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let wallet_options = WalletOptions::from_env();
    let node_options = NodeOptions::from_env();
    let shutdown = CancellationToken::new();

    // Wallet session
    let vault = Arc::new(FileKeyVault::new(&wallet_options.path));
    let auto_lock = Arc::new(AutoLock::new(AutoLockOptions::from_env()));
    let (event_sink, event_stream) = events::channel();
    let session = Arc::new(WalletSession::new(
        wallet_options,
        vault,
        Arc::clone(&auto_lock),
        event_sink,
    ));
    session.discover().await;

    // Node gateway
    let rpc: Arc<dyn NodeRpc> = Arc::new(WsRpcClient::new(node_options.clone()));
    let plasma_bot = Arc::new(PlasmaBotClient::new(PlasmaBotOptions::from_env()));
    let fusion = Arc::new(FusionProvisioner::new(
        FusionOptions::from_env(),
        Some(Arc::clone(&plasma_bot)),
        Arc::clone(&rpc),
    ));
    let gateway = Arc::new(NodeGateway::new(
        node_options,
        rpc,
        fusion,
        Arc::clone(&auto_lock),
        shutdown.clone(),
    ));
    // Initial connection attempt; the auto-receiver retries on its own
    // schedule if the node is not up yet.
    gateway.connect().await;

    // Background tasks
    let receiver = Arc::new(AutoReceiver::new(
        AutoReceiverOptions::from_env(),
        Arc::clone(&gateway),
        Arc::clone(&session),
    ));
    tokio::spawn(
        Arc::clone(&auto_lock).run(Arc::clone(&session), shutdown.clone()),
    );
    tokio::spawn(Arc::clone(&receiver).run(event_stream, shutdown.clone()));

    let state = AppState::new(session, gateway, receiver, plasma_bot);
    let app = api::router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("Failed to parse bind address");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server address");
    info!("Zenon Wallet API listening on http://{addr} (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await
        .expect("Server failed");
}
