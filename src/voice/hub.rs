//! Captured audio fan-out
//!
//! The capture callback hands every chunk to [`AudioHub::dispatch`], which
//! delivers it to each registered subscriber. Delivery works on a snapshot of
//! the subscriber list taken under a short lock, so subscribers can come and go
//! while a chunk is in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::AudioChunk;
use crate::Result;

/// Audio consumer registered with the hub
///
/// Runs on the capture thread: must return quickly and never block.
pub type Subscriber = Arc<dyn Fn(AudioChunk) -> Result<()> + Send + Sync>;

/// Opaque handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Entry {
    token: SubscriptionToken,
    callback: Subscriber,
    /// Cleared on unsubscribe; held during delivery so unsubscribe waits for
    /// an in-flight callback to finish
    active: Arc<Mutex<bool>>,
}

/// Fan-out point for captured audio
pub struct AudioHub {
    subscribers: Mutex<Vec<Entry>>,
    next_token: AtomicU64,
}

impl Default for AudioHub {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHub {
    /// Create a hub with no subscribers
    #[must_use]
    pub const fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register an audio consumer
    pub fn subscribe(&self, callback: Subscriber) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let entry = Entry {
            token,
            callback,
            active: Arc::new(Mutex::new(true)),
        };

        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }

        tracing::debug!(token = token.0, "audio subscriber added");
        token
    }

    /// Remove a consumer; unknown tokens are ignored
    ///
    /// Once this returns the consumer receives no further chunks. A callback
    /// must not unsubscribe itself.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let removed = {
            let mut subs = match self.subscribers.lock() {
                Ok(subs) => subs,
                Err(poisoned) => poisoned.into_inner(),
            };
            subs.iter()
                .position(|e| e.token == token)
                .map(|idx| subs.remove(idx))
        };

        if let Some(entry) = removed {
            match entry.active.lock() {
                Ok(mut active) => *active = false,
                Err(poisoned) => *poisoned.into_inner() = false,
            }
            tracing::debug!(token = token.0, "audio subscriber removed");
        }
    }

    /// Number of registered consumers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }

    /// Deliver one chunk to every current subscriber
    ///
    /// A failing subscriber is logged and skipped.
    pub fn dispatch(&self, chunk: &AudioChunk) {
        let snapshot: Vec<(SubscriptionToken, Subscriber, Arc<Mutex<bool>>)> =
            match self.subscribers.lock() {
                Ok(subs) => subs
                    .iter()
                    .map(|e| (e.token, Arc::clone(&e.callback), Arc::clone(&e.active)))
                    .collect(),
                Err(_) => return,
            };

        for (token, callback, gate) in snapshot {
            let Ok(active) = gate.lock() else {
                continue;
            };
            if !*active {
                continue;
            }
            if let Err(e) = callback(Arc::clone(chunk)) {
                tracing::warn!(token = token.0, error = %e, "audio subscriber failed");
            }
        }
    }
}
