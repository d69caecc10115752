// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Plasma Provisioning
//!
//! Fee capacity for block submission comes from fused QSR (plasma) or
//! from proof-of-work. [`PlasmaBotClient`] talks to the community
//! fusion bot over HTTP; [`FusionProvisioner`] implements the policy
//! that decides, per submission, whether fused plasma covers the block
//! or the caller must fall back to PoW.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{FusionOptions, PlasmaBotOptions};
use crate::models::{Address, PlasmaMode};
use crate::node::rpc::{NodeRpc, RpcError};

#[derive(Debug, thiserror::Error)]
pub enum PlasmaError {
    #[error("plasma bot is not configured")]
    BotDisabled,

    #[error("plasma bot request failed: {0}")]
    Bot(String),

    #[error("insufficient plasma and fusion could not provide it")]
    Insufficient,

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// HTTP client for the community plasma bot.
pub struct PlasmaBotClient {
    options: PlasmaBotOptions,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ExpirationWire {
    expiration: Option<DateTime<Utc>>,
}

impl PlasmaBotClient {
    pub fn new(options: PlasmaBotOptions) -> Self {
        Self {
            options,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.api_url.is_some()
    }

    fn base_url(&self) -> Result<&str, PlasmaError> {
        self.options
            .api_url
            .as_deref()
            .ok_or(PlasmaError::BotDisabled)
    }

    /// Ask the bot to fuse plasma to `address`. The fusion lands on
    /// chain asynchronously; callers poll the node to observe it.
    pub async fn fuse(&self, address: &Address) -> Result<(), PlasmaError> {
        let url = format!("{}/fuse", self.base_url()?);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.options.api_key)
            .json(&json!({ "address": address.0 }))
            .send()
            .await
            .map_err(|e| PlasmaError::Bot(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlasmaError::Bot(format!(
                "fuse request rejected: {}",
                response.status()
            )));
        }
        info!(address = %address, "fusion requested from bot");
        Ok(())
    }

    /// When the bot's fusion for `address` expires, if one exists.
    pub async fn expiration(
        &self,
        address: &Address,
    ) -> Result<Option<DateTime<Utc>>, PlasmaError> {
        let url = format!("{}/expiration/{}", self.base_url()?, address.0);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.options.api_key)
            .send()
            .await
            .map_err(|e| PlasmaError::Bot(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(PlasmaError::Bot(format!(
                "expiration request rejected: {}",
                response.status()
            )));
        }
        let wire: ExpirationWire = response
            .json()
            .await
            .map_err(|e| PlasmaError::Bot(e.to_string()))?;
        Ok(wire.expiration)
    }
}

/// Outcome of a provisioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provision {
    /// Fused plasma covers the block; skip PoW.
    Covered,
    /// Provisioning unavailable or not attempted; generate PoW.
    FallBack,
}

/// Per-submission fusion policy.
///
/// Modes: `pow` never touches the bot; `fuse` requires fusion to
/// succeed and fails the submission otherwise; `both` tries fusion and
/// falls back to PoW when it cannot provide capacity in time.
pub struct FusionProvisioner {
    options: FusionOptions,
    bot: Option<Arc<PlasmaBotClient>>,
    rpc: Arc<dyn NodeRpc>,
    /// Addresses with a fusion request in flight; avoids hammering the
    /// bot while an earlier fusion is still landing.
    requested: Mutex<HashSet<Address>>,
}

impl FusionProvisioner {
    pub fn new(
        options: FusionOptions,
        bot: Option<Arc<PlasmaBotClient>>,
        rpc: Arc<dyn NodeRpc>,
    ) -> Self {
        Self {
            options,
            bot,
            rpc,
            requested: Mutex::new(HashSet::new()),
        }
    }

    pub fn mode(&self) -> PlasmaMode {
        self.options.mode
    }

    fn strict(&self) -> bool {
        self.options.mode == PlasmaMode::Fuse
    }

    fn fused_enough(&self, fused_qsr: u128) -> bool {
        fused_qsr >= self.options.threshold
    }

    /// Decide how the block for `address` gets its fee capacity.
    pub async fn ensure_capacity(&self, address: &Address) -> Result<Provision, PlasmaError> {
        if self.options.mode == PlasmaMode::Pow {
            return Ok(Provision::FallBack);
        }

        let info = self.rpc.plasma_info(address).await?;
        if self.fused_enough(info.fused_qsr()) {
            return Ok(Provision::Covered);
        }

        let bot = match &self.bot {
            Some(bot) if bot.is_enabled() => bot,
            _ => {
                return if self.strict() {
                    Err(PlasmaError::Insufficient)
                } else {
                    debug!(address = %address, "no fusion bot; falling back to PoW");
                    Ok(Provision::FallBack)
                };
            }
        };

        let newly_requested = self
            .requested
            .lock()
            .expect("requested set poisoned")
            .insert(address.clone());
        if newly_requested {
            if let Err(e) = bot.fuse(address).await {
                self.requested
                    .lock()
                    .expect("requested set poisoned")
                    .remove(address);
                warn!(address = %address, error = %e, "fusion request failed");
                return if self.strict() {
                    Err(PlasmaError::Insufficient)
                } else {
                    Ok(Provision::FallBack)
                };
            }
        }

        // Bounded wait for the fusion to become visible on chain.
        let deadline = tokio::time::Instant::now() + self.options.timeout;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.options.poll_interval).await;
            let info = self.rpc.plasma_info(address).await?;
            if self.fused_enough(info.fused_qsr()) {
                self.requested
                    .lock()
                    .expect("requested set poisoned")
                    .remove(address);
                return Ok(Provision::Covered);
            }
        }

        // The request is no longer considered in flight: a later
        // submission must be able to ask the bot again.
        self.requested
            .lock()
            .expect("requested set poisoned")
            .remove(address);

        warn!(address = %address, "fusion did not land before the deadline");
        if self.strict() {
            Err(PlasmaError::Insufficient)
        } else {
            Ok(Provision::FallBack)
        }
    }
}
