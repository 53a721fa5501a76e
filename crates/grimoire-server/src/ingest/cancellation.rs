//! Cancellation tokens for in-flight syncs
//!
//! Each running sync registers a [`CancellationToken`]; the downloader polls it
//! between chunks. Cancelling through the registry is the "remove in-flight work"
//! step of a cancel: it succeeds only when a live token exists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        // A poisoned map is still consistent; tokens are inserted and removed whole.
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a fresh token for `sync_id`, replacing any previous one
    pub fn register(&self, sync_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(sync_id, token.clone());
        token
    }

    /// Token for `sync_id`, registering one if none exists
    pub fn token(&self, sync_id: Uuid) -> CancellationToken {
        self.lock().entry(sync_id).or_default().clone()
    }

    /// Cancel the in-flight work of `sync_id`
    ///
    /// Returns `true` when a live token was found and cancelled.
    pub fn cancel(&self, sync_id: Uuid) -> bool {
        match self.lock().remove(&sync_id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            },
            _ => false,
        }
    }

    /// Drop the token once the download phase is over
    pub fn release(&self, sync_id: Uuid) {
        self.lock().remove(&sync_id);
    }

    pub fn is_registered(&self, sync_id: Uuid) -> bool {
        self.lock().contains_key(&sync_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_live_token() {
        let registry = CancellationRegistry::new();
        let id = Uuid::new_v4();
        let token = registry.register(id);

        assert!(registry.cancel(id));
        assert!(token.is_cancelled());
        assert!(!registry.is_registered(id));
    }

    #[test]
    fn test_cancel_unknown_sync_reports_nothing_removed() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel(Uuid::new_v4()));
    }

    #[test]
    fn test_release_then_cancel() {
        let registry = CancellationRegistry::new();
        let id = Uuid::new_v4();
        let token = registry.register(id);
        registry.release(id);

        assert!(!registry.cancel(id));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_token_reuses_registered() {
        let registry = CancellationRegistry::new();
        let id = Uuid::new_v4();
        let registered = registry.register(id);
        let fetched = registry.token(id);

        registry.cancel(id);
        assert!(registered.is_cancelled());
        assert!(fetched.is_cancelled());
    }
}
