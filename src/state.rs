// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use crate::node::NodeGateway;
use crate::plasma::PlasmaBotClient;
use crate::receiver::AutoReceiver;
use crate::wallet::WalletSession;

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<WalletSession>,
    pub gateway: Arc<NodeGateway>,
    pub receiver: Arc<AutoReceiver>,
    pub plasma_bot: Arc<PlasmaBotClient>,
}

impl AppState {
    pub fn new(
        session: Arc<WalletSession>,
        gateway: Arc<NodeGateway>,
        receiver: Arc<AutoReceiver>,
        plasma_bot: Arc<PlasmaBotClient>,
    ) -> Self {
        Self {
            session,
            gateway,
            receiver,
            plasma_bot,
        }
    }
}
