//! Users that are currently trading, with the credentials their orders use.

use std::sync::RwLock;

use ahash::AHashMap;
use vb_core::error::TradingError;
use vb_core::trading::Credential;

use crate::UserId;

/// Membership set of running users.
///
/// Registration is the single source of truth for "is this user active":
/// the control loop skips unregistered users and the order executor drops
/// completions for them.
#[derive(Debug, Default)]
pub struct RunningUserRegistry {
    users: RwLock<AHashMap<UserId, Credential>>,
}

impl RunningUserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user_id`. Fails if the user is already registered.
    pub fn register(&self, user_id: &str, credential: Credential) -> Result<(), TradingError> {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        if users.contains_key(user_id) {
            return Err(TradingError::AlreadyRunning(user_id.to_string()));
        }
        users.insert(user_id.to_string(), credential);
        Ok(())
    }

    /// Remove `user_id`. Returns whether it was registered.
    pub fn unregister(&self, user_id: &str) -> bool {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id)
            .is_some()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.read().unwrap_or_else(|e| e.into_inner()).contains_key(user_id)
    }

    pub fn credential(&self, user_id: &str) -> Option<Credential> {
        self.users.read().unwrap_or_else(|e| e.into_inner()).get(user_id).cloned()
    }

    /// Registered user ids, sorted.
    pub fn users(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.users.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
