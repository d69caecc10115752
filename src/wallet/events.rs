// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wallet lifecycle events.
//!
//! The session publishes into a plain mpsc sink handed to it at
//! construction; the auto-receiver owns the receiving end. No global
//! event bus.

use tokio::sync::mpsc;

use crate::models::WalletAccount;

/// Lifecycle events emitted by the wallet session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// A wallet was initialized or restored; carries the full roster.
    Initialized(Vec<WalletAccount>),
    /// The wallet was unlocked; carries only accounts not previously
    /// published (empty on a routine re-unlock).
    Unlocked(Vec<WalletAccount>),
    /// The wallet was locked.
    Locked,
    /// New accounts were derived and appended to the roster.
    AccountsAdded(Vec<WalletAccount>),
}

/// Sending half handed to the wallet session.
pub type EventSink = mpsc::UnboundedSender<WalletEvent>;

/// Receiving half owned by the auto-receiver.
pub type EventStream = mpsc::UnboundedReceiver<WalletEvent>;

/// Create a connected sink/stream pair.
pub fn channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}
