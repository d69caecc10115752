// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Runtime Configuration
//!
//! Typed option structs loaded from the environment at startup. Every
//! component receives its own options value; nothing reads the
//! environment after boot.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for wallet keystore files | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `WALLET_NAME` | Keystore name within the data directory | `api` |
//! | `WALLET_ERASE_LIMIT` | Failed unlocks before the definition is wiped (unset = never) | unset |
//! | `NODE_URL` | Full-node WebSocket endpoint | `ws://127.0.0.1:35998` |
//! | `NODE_CHAIN_ID` | Chain identifier | `1` |
//! | `NODE_PROTOCOL_VERSION` | Protocol version | `1` |
//! | `NODE_MAX_POW_SLOTS` | Max concurrent PoW generations | `5` |
//! | `AUTO_LOCK_ENABLED` | Enable inactivity locking | `true` |
//! | `AUTO_LOCK_TIMEOUT_SECS` | Idle time before locking | `300` |
//! | `AUTO_RECEIVER_ENABLED` | Enable the auto-receive loop | `true` |
//! | `AUTO_RECEIVER_INTERVAL_SECS` | Reconciliation tick interval | `5` |
//! | `PLASMA_MODE` | `pow`, `fuse` or `both` | `pow` |
//! | `PLASMA_BOT_URL` | Plasma bot HTTP endpoint | unset (bot disabled) |
//! | `PLASMA_BOT_API_KEY` | Bearer token for the bot | empty |
//! | `PLASMA_FUSE_THRESHOLD` | Minimum fused QSR (raw units) before sending | `5000000000` |
//! | `PLASMA_FUSE_TIMEOUT_SECS` | Max time to wait for a fusion to land | `60` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::PlasmaMode;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name).ok().as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

/// Wallet keystore options.
#[derive(Debug, Clone)]
pub struct WalletOptions {
    /// Directory holding keystore files.
    pub path: PathBuf,
    /// Keystore name (one wallet per service instance).
    pub name: String,
    /// Failed unlock attempts before the definition is discarded.
    /// `None` disables the security wipe.
    pub erase_limit: Option<u32>,
}

impl WalletOptions {
    pub fn from_env() -> Self {
        Self {
            path: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "/data".to_string())),
            name: env::var("WALLET_NAME").unwrap_or_else(|_| "api".to_string()),
            erase_limit: env::var("WALLET_ERASE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// Remote full-node options.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub node_url: String,
    pub chain_id: u32,
    pub protocol_version: u32,
    /// Global cap on concurrent proof-of-work generations.
    pub max_pow_slots: usize,
    /// Hold the per-address lock this long after a successful submit so
    /// the node can index the block before the next one builds on it.
    pub settle_delay: Duration,
}

impl NodeOptions {
    pub fn from_env() -> Self {
        Self {
            node_url: env::var("NODE_URL").unwrap_or_else(|_| "ws://127.0.0.1:35998".to_string()),
            chain_id: env_or("NODE_CHAIN_ID", 1),
            protocol_version: env_or("NODE_PROTOCOL_VERSION", 1),
            max_pow_slots: env_or("NODE_MAX_POW_SLOTS", 5),
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            node_url: "ws://127.0.0.1:35998".to_string(),
            chain_id: 1,
            protocol_version: 1,
            max_pow_slots: 5,
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Inactivity auto-lock options.
#[derive(Debug, Clone)]
pub struct AutoLockOptions {
    pub enabled: bool,
    pub lock_timeout: Duration,
    pub timer_interval: Duration,
}

impl AutoLockOptions {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("AUTO_LOCK_ENABLED", true),
            lock_timeout: Duration::from_secs(env_or("AUTO_LOCK_TIMEOUT_SECS", 300)),
            timer_interval: Duration::from_secs(5),
        }
    }
}

impl Default for AutoLockOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_timeout: Duration::from_secs(300),
            timer_interval: Duration::from_secs(5),
        }
    }
}

/// Auto-receiver loop options.
#[derive(Debug, Clone)]
pub struct AutoReceiverOptions {
    pub enabled: bool,
    pub timer_interval: Duration,
}

impl AutoReceiverOptions {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("AUTO_RECEIVER_ENABLED", true),
            timer_interval: Duration::from_secs(env_or("AUTO_RECEIVER_INTERVAL_SECS", 5)),
        }
    }
}

impl Default for AutoReceiverOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timer_interval: Duration::from_secs(5),
        }
    }
}

/// Plasma bot endpoint options. `None` URL disables the bot entirely.
#[derive(Debug, Clone)]
pub struct PlasmaBotOptions {
    pub api_url: Option<String>,
    pub api_key: String,
}

impl PlasmaBotOptions {
    pub fn from_env() -> Self {
        Self {
            api_url: env::var("PLASMA_BOT_URL").ok(),
            api_key: env::var("PLASMA_BOT_API_KEY").unwrap_or_default(),
        }
    }
}

/// Fee-capacity provisioning policy.
#[derive(Debug, Clone)]
pub struct FusionOptions {
    pub mode: PlasmaMode,
    /// Minimum fused QSR (raw units) an account needs before submission
    /// skips provisioning.
    pub threshold: u128,
    /// How often to re-check the fused amount while waiting.
    pub poll_interval: Duration,
    /// Upper bound on the wait for a requested fusion to take effect.
    pub timeout: Duration,
}

impl FusionOptions {
    pub fn from_env() -> Self {
        let mode = match env::var("PLASMA_MODE").ok().as_deref() {
            Some("fuse") => PlasmaMode::Fuse,
            Some("both") => PlasmaMode::Both,
            _ => PlasmaMode::Pow,
        };
        Self {
            mode,
            threshold: env_or("PLASMA_FUSE_THRESHOLD", 5_000_000_000u128),
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(env_or("PLASMA_FUSE_TIMEOUT_SECS", 60)),
        }
    }
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            mode: PlasmaMode::Pow,
            threshold: 5_000_000_000,
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}
