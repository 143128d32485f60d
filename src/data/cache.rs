//! In-memory caches
//!
//! These caches are volatile and cleared on restart.
//! Uses Moka for high-performance concurrent caching.

use moka::future::Cache;
use std::time::Duration;

// =============================================================================
// Active Viewer Cache
// =============================================================================

/// Tracks which users are currently looking at which conversation
///
/// Each viewing heartbeat keeps an entry alive for the configured TTL; a
/// user whose heartbeat lapses is treated as not viewing and receives
/// ordinary new-message notifications again.
#[derive(Clone)]
pub struct ViewerCache {
    /// (conversation id, user id) -> ()
    viewers: Cache<(String, String), ()>,
}

impl ViewerCache {
    /// Create new viewer cache
    ///
    /// # Arguments
    /// * `ttl` - How long one heartbeat marks a user as viewing
    pub fn new(ttl: Duration) -> Self {
        let viewers = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();

        Self { viewers }
    }

    /// Record a viewing heartbeat
    pub async fn touch(&self, conversation_id: &str, user_id: &str) {
        self.viewers
            .insert((conversation_id.to_string(), user_id.to_string()), ())
            .await;
    }

    /// Whether the user sent a heartbeat within the TTL
    pub async fn is_viewing(&self, conversation_id: &str, user_id: &str) -> bool {
        self.viewers
            .contains_key(&(conversation_id.to_string(), user_id.to_string()))
    }

    /// Stop treating the user as a viewer (e.g. after leaving)
    pub async fn forget(&self, conversation_id: &str, user_id: &str) {
        self.viewers
            .invalidate(&(conversation_id.to_string(), user_id.to_string()))
            .await;
    }
}
