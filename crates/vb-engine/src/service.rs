//! Per-user trading lifecycle.

use std::sync::Arc;

use tracing::info;
use vb_core::Asset;
use vb_core::error::TradingError;
use vb_core::trading::Credential;

use crate::UserId;
use crate::journal::{TradeJournal, TradeRecord};
use crate::position::{PositionStateStore, StatusSnapshot, TradingStatus};
use crate::registry::RunningUserRegistry;

/// Starts and stops users. Registry membership and the position entry are
/// created and removed together.
pub struct TradingService {
    assets: Vec<Asset>,
    registry: Arc<RunningUserRegistry>,
    positions: Arc<PositionStateStore>,
    journal: Arc<TradeJournal>,
}

impl TradingService {
    pub fn new(
        assets: Vec<Asset>,
        registry: Arc<RunningUserRegistry>,
        positions: Arc<PositionStateStore>,
        journal: Arc<TradeJournal>,
    ) -> Self {
        Self {
            assets,
            registry,
            positions,
            journal,
        }
    }

    /// Begin trading `asset` for `user_id` with a fresh, armed state.
    pub fn start_trading(
        &self,
        user_id: &str,
        asset: Asset,
        credential: Credential,
    ) -> Result<Arc<TradingStatus>, TradingError> {
        if !self.assets.contains(&asset) {
            return Err(TradingError::UnknownAsset(asset.to_string()));
        }
        self.registry.register(user_id, credential)?;
        // Drop any leftover entry so the new run never inherits flags.
        self.positions.remove(user_id);
        let status = self.positions.ensure(user_id, asset);
        info!("[service] {user_id} started trading {}", asset.display_name());
        Ok(status)
    }

    /// Stop `user_id`. Safe to call repeatedly; returns whether anything
    /// was running. In-flight orders complete without touching state.
    pub fn stop_trading(&self, user_id: &str) -> bool {
        let registered = self.registry.unregister(user_id);
        let had_state = self.positions.remove(user_id);
        if registered || had_state {
            info!("[service] {user_id} stopped trading");
        }
        registered || had_state
    }

    pub fn is_running(&self, user_id: &str) -> bool {
        self.registry.contains(user_id)
    }

    /// Credential of a running user.
    pub fn credential(&self, user_id: &str) -> Option<Credential> {
        self.registry.credential(user_id)
    }

    pub fn status(&self, user_id: &str) -> Option<StatusSnapshot> {
        if !self.registry.contains(user_id) {
            return None;
        }
        self.positions.get(user_id).map(|s| s.snapshot())
    }

    pub fn history(&self, user_id: &str) -> Vec<TradeRecord> {
        self.journal.history(user_id)
    }

    pub fn running_users(&self) -> Vec<UserId> {
        self.registry.users()
    }
}
