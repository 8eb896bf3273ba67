//! Online flags and last-seen stamps.
//!
//! Presence writes are best-effort signals from the session lifecycle,
//! not a liveness protocol: an abrupt disconnect leaves `is_online = true`
//! standing until something corrects it. There is no heartbeat or TTL
//! sweep here.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use confab_store::{Filter, Patch, RecordStore};
use confab_types::{Profile, RecordKind, field};

use crate::dispatcher::{Dispatcher, SubscriptionHandle};
use crate::error::{ChatError, Result};

/// Writes and watches the presence fields on profile rows.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn RecordStore>,
    dispatcher: Dispatcher,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn RecordStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Flip the account's online flag and stamp `last_seen = now`. Both
    /// edges write the stamp, so `last_seen` always dates the latest
    /// transition.
    pub async fn set_online(&self, user_id: Uuid, online: bool) -> Result<()> {
        let updated = self
            .store
            .update(
                RecordKind::Profile,
                Filter::eq(field::ID, user_id),
                Patch::new()
                    .set(field::IS_ONLINE, online)
                    .set(field::LAST_SEEN, Utc::now()),
            )
            .await?;
        if updated.is_empty() {
            return Err(ChatError::NotFound("user"));
        }
        debug!(%user_id, online, "presence updated");
        Ok(())
    }

    /// Watch the given accounts. Every committed profile change for one of
    /// them is delivered in commit order; an empty set matches nothing.
    pub fn watch(&self, account_ids: &[Uuid]) -> PresenceWatch {
        let watched = Filter::any_of(
            account_ids
                .iter()
                .map(|id| Filter::eq(field::ID, *id))
                .collect(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .dispatcher
            .attach(RecordKind::Profile, watched, move |event| {
                if let Some(profile) = event.record.as_profile() {
                    let _ = tx.send(profile.clone());
                }
            });
        PresenceWatch {
            dispatcher: self.dispatcher.clone(),
            handle,
            rx,
        }
    }
}

/// Live stream of profile changes for a watched set of accounts. Dropping
/// the watch detaches its subscription.
pub struct PresenceWatch {
    dispatcher: Dispatcher,
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<Profile>,
}

impl PresenceWatch {
    /// Next committed profile state for a watched account. `None` once the
    /// dispatcher shuts down.
    pub async fn next_change(&mut self) -> Option<Profile> {
        self.rx.recv().await
    }
}

impl Drop for PresenceWatch {
    fn drop(&mut self) {
        self.dispatcher.detach(self.handle);
    }
}
