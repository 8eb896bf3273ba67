//! One signed-in client session.
//!
//! Auth happens elsewhere; a session starts from an already-verified
//! [`Identity`]. The client owns the dispatcher pump over the store's
//! change feed and hands out the friend graph, presence and conversation
//! views that ride on it. Sign-off releases everything the session
//! acquired.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use confab_store::{Filter, RecordStore};
use confab_types::{FriendRequest, Profile, Record, RecordKind, field};

use crate::conversation::Conversation;
use crate::dispatcher::Dispatcher;
use crate::error::{ChatError, Result};
use crate::friends::{FriendGraph, PendingRequest, RequestDecision, RequestWatch};
use crate::presence::{PresenceTracker, PresenceWatch};
use crate::typing::{DEFAULT_TYPING_DEBOUNCE, TypingTracker};

/// The signed-in account, as handed over by the auth layer.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

/// Session tunables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Pause after the last keystroke before the typing flag clears.
    pub typing_debounce: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
        }
    }
}

/// A live session for one account against a shared backing store.
pub struct ChatClient {
    store: Arc<dyn RecordStore>,
    dispatcher: Dispatcher,
    typing: TypingTracker,
    presence: PresenceTracker,
    friends: FriendGraph,
    identity: Identity,
}

impl ChatClient {
    /// Start a session: spin the dispatcher up over the store's change
    /// feed and mark the account online.
    pub async fn sign_on(
        store: Arc<dyn RecordStore>,
        identity: Identity,
        config: ClientConfig,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::spawn(store.changes());
        let typing = TypingTracker::new(store.clone(), config.typing_debounce);
        let presence = PresenceTracker::new(store.clone(), dispatcher.clone());
        let friends = FriendGraph::new(store.clone(), dispatcher.clone(), identity.user_id);

        presence.set_online(identity.user_id, true).await?;
        info!(user_id = %identity.user_id, username = %identity.username, "signed on");

        Ok(Self {
            store,
            dispatcher,
            typing,
            presence,
            friends,
            identity,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Direct access to presence, for anything beyond the sign-on and
    /// sign-off transitions the session drives itself.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// The signed-in account's own profile row, as currently committed.
    pub async fn profile(&self) -> Result<Profile> {
        let rows = self
            .store
            .select(
                RecordKind::Profile,
                Filter::eq(field::ID, self.identity.user_id),
                None,
            )
            .await?;
        rows.into_iter()
            .filter_map(Record::into_profile)
            .next()
            .ok_or(ChatError::NotFound("user"))
    }

    /// Send a friend request to the account holding `username`.
    pub async fn send_friend_request(&self, username: &str) -> Result<FriendRequest> {
        self.friends.send_request(username).await
    }

    /// Accept or reject a pending request addressed to this account.
    pub async fn respond_to_request(
        &self,
        request_id: Uuid,
        decision: RequestDecision,
    ) -> Result<FriendRequest> {
        self.friends.respond(request_id, decision).await
    }

    /// Pending requests addressed to this account, oldest first.
    pub async fn pending_requests(&self) -> Result<Vec<PendingRequest>> {
        self.friends.pending_requests().await
    }

    /// Current friends, derived from accepted requests.
    pub async fn list_friends(&self) -> Result<Vec<Profile>> {
        self.friends.friends().await
    }

    /// Live stream of request rows addressed to this account.
    pub fn watch_requests(&self) -> RequestWatch {
        self.friends.watch()
    }

    /// Live stream of profile changes for the given accounts.
    pub fn watch_presence(&self, account_ids: &[Uuid]) -> PresenceWatch {
        self.presence.watch(account_ids)
    }

    /// Open the conversation with `partner_id`: history, live delivery,
    /// read receipts and the partner's typing indicator.
    pub async fn open_conversation(&self, partner_id: Uuid) -> Result<Conversation> {
        Conversation::open(
            self.store.clone(),
            self.dispatcher.clone(),
            self.typing.clone(),
            self.identity.user_id,
            partner_id,
        )
        .await
    }

    /// End the session: settle any live typing bursts, mark the account
    /// offline, stop the dispatcher. Close conversations first; a view
    /// left open merely stops receiving events once the pump is gone.
    pub async fn sign_off(self) -> Result<()> {
        for (user_id, chat_with_id) in self.typing.cancel_all() {
            if let Err(err) = self.typing.clear(user_id, chat_with_id).await {
                warn!(%user_id, %chat_with_id, "typing flag left set at sign-off: {err}");
            }
        }
        // The offline write can fail; the dispatcher still stops so the
        // session never leaks its pump.
        let offline = self.presence.set_online(self.identity.user_id, false).await;
        self.dispatcher.shutdown();
        info!(user_id = %self.identity.user_id, "signed off");
        offline
    }
}
