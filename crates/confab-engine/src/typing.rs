//! Typist side of the typing indicator protocol.
//!
//! A burst of keystrokes produces exactly two writes: `is_typing = true`
//! when the burst starts and `is_typing = false` once the typist pauses
//! for the debounce duration. Every keystroke in between only pushes the
//! timer back. Viewers mirror the committed flag and never age it out —
//! if a typist disconnects mid-burst the trailing `false` is never
//! written and the indicator sticks until the typist's next burst
//! settles it. Known gap; a heartbeat or TTL sweep would close it.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use confab_store::RecordStore;
use confab_types::{Record, TypingSignal};

use crate::error::Result;

/// Pause after the last keystroke before the flag clears.
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_millis(2000);

/// One live burst. The generation guards against a stale timer that was
/// already past its sleep when the burst got extended.
struct Burst {
    generation: u64,
    timer: JoinHandle<()>,
}

struct TypingInner {
    store: Arc<dyn RecordStore>,
    debounce: Duration,
    bursts: Mutex<HashMap<(Uuid, Uuid), Burst>>,
    // Every flag write passes through this gate, and the writers that
    // settle a burst re-check the map after acquiring it. Together that
    // keeps a trailing `false` from landing on top of a newer burst's
    // opening `true`.
    write_gate: tokio::sync::Mutex<()>,
}

/// Clone-to-share tracker for every typing burst a session produces,
/// keyed by `(typist, partner)`.
#[derive(Clone)]
pub struct TypingTracker {
    inner: Arc<TypingInner>,
}

impl TypingTracker {
    pub fn new(store: Arc<dyn RecordStore>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(TypingInner {
                store,
                debounce,
                bursts: Mutex::new(HashMap::new()),
                write_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Record a keystroke from `user_id` composing to `chat_with_id`.
    /// Writes the flag only when this keystroke opens a new burst.
    pub async fn notify(&self, user_id: Uuid, chat_with_id: Uuid) -> Result<()> {
        let key = (user_id, chat_with_id);

        {
            let mut bursts = self.lock();
            match bursts.entry(key) {
                Entry::Occupied(mut slot) => {
                    let burst = slot.get_mut();
                    burst.timer.abort();
                    burst.generation += 1;
                    burst.timer = self.spawn_expiry(key, burst.generation);
                    trace!(user_id = %key.0, chat_with_id = %key.1, "typing burst extended");
                    return Ok(());
                }
                // Registered before the opening write commits, so a
                // keystroke racing us folds into this burst instead of
                // writing a second `true`.
                Entry::Vacant(slot) => {
                    slot.insert(Burst {
                        generation: 0,
                        timer: self.spawn_expiry(key, 0),
                    });
                }
            }
        }

        let written = {
            let _gate = self.inner.write_gate.lock().await;
            self.write_flag(user_id, chat_with_id, true).await
        };
        if let Err(err) = written {
            // Unregister so the next keystroke retries the opening write;
            // anything folded in while it was in flight rides that retry.
            if let Some(burst) = self.lock().remove(&key) {
                burst.timer.abort();
            }
            return Err(err);
        }
        debug!(%user_id, %chat_with_id, "typing burst started");
        Ok(())
    }

    /// Cancel any pending timer and immediately write `false`. The send
    /// path calls this so a delivered message never leaves a dangling
    /// indicator behind it.
    pub async fn clear(&self, user_id: Uuid, chat_with_id: Uuid) -> Result<()> {
        self.cancel(user_id, chat_with_id);
        let _gate = self.inner.write_gate.lock().await;
        if self.burst_live(&(user_id, chat_with_id)) {
            // A keystroke reopened the pair while we waited for the gate;
            // the fresh burst owns the flag now.
            return Ok(());
        }
        self.write_flag(user_id, chat_with_id, false).await
    }

    /// Abort the debounce timer without touching the store. Synchronous so
    /// drop paths can use it; returns whether a burst was live.
    pub fn cancel(&self, user_id: Uuid, chat_with_id: Uuid) -> bool {
        match self.lock().remove(&(user_id, chat_with_id)) {
            Some(burst) => {
                burst.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every live burst and return the pairs that were active.
    /// Sign-off clears each one so no indicator outlives the session.
    pub fn cancel_all(&self) -> Vec<(Uuid, Uuid)> {
        let mut bursts = self.lock();
        let keys: Vec<_> = bursts.keys().copied().collect();
        for (_, burst) in bursts.drain() {
            burst.timer.abort();
        }
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(Uuid, Uuid), Burst>> {
        self.inner.bursts.lock().expect("burst lock poisoned")
    }

    fn burst_live(&self, key: &(Uuid, Uuid)) -> bool {
        self.lock().contains_key(key)
    }

    fn spawn_expiry(&self, key: (Uuid, Uuid), generation: u64) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tracker.inner.debounce).await;
            tracker.expire(key, generation).await;
        })
    }

    /// Trailing edge of a burst. Writes `false` unless the burst was
    /// extended or cancelled while the timer slept.
    async fn expire(&self, key: (Uuid, Uuid), generation: u64) {
        {
            let mut bursts = self.lock();
            match bursts.get(&key) {
                Some(burst) if burst.generation == generation => {
                    bursts.remove(&key);
                }
                _ => return,
            }
        }
        // The gate orders this write against any opening write. A
        // keystroke re-registering the pair is either visible here, and
        // we back off, or its `true` queues behind our `false`; the
        // newer burst's flag survives both ways.
        let _gate = self.inner.write_gate.lock().await;
        if self.burst_live(&key) {
            trace!(user_id = %key.0, chat_with_id = %key.1, "typing burst reopened before expiry settled");
            return;
        }
        trace!(user_id = %key.0, chat_with_id = %key.1, "typing burst expired");
        if let Err(err) = self.write_flag(key.0, key.1, false).await {
            // The flag stays stale until the next burst settles; nothing
            // else to do from a timer.
            warn!(user_id = %key.0, chat_with_id = %key.1, "failed to clear typing flag: {err}");
        }
    }

    async fn write_flag(&self, user_id: Uuid, chat_with_id: Uuid, is_typing: bool) -> Result<()> {
        self.inner
            .store
            .upsert(Record::Typing(TypingSignal {
                user_id,
                chat_with_id,
                is_typing,
                updated_at: Utc::now(),
            }))
            .await?;
        Ok(())
    }
}
