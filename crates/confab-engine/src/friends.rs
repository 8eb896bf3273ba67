//! Friend-request lifecycle and the friendship relation derived from it.
//!
//! Friendship is never stored as its own row. Two accounts are friends
//! exactly when an accepted request exists between them, so request
//! status stays the single source of truth and accept can never leave a
//! half-written edge behind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use confab_store::{Filter, Order, Patch, RecordStore, StoreError};
use confab_types::{FriendRequest, Profile, Record, RecordKind, RequestStatus, field};

use crate::dispatcher::{Dispatcher, SubscriptionHandle};
use crate::error::{ChatError, Result};

/// The two answers a pending request can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Accept,
    Reject,
}

impl RequestDecision {
    fn status(self) -> RequestStatus {
        match self {
            Self::Accept => RequestStatus::Accepted,
            Self::Reject => RequestStatus::Rejected,
        }
    }
}

/// A pending request joined with the sender's profile, ready to render.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: FriendRequest,
    pub sender: Profile,
}

/// Requests between `a` and `b` in either direction, any status.
fn pair_filter(a: Uuid, b: Uuid) -> Filter {
    let ab = Filter::eq(field::SENDER_ID, a).and(Filter::eq(field::RECEIVER_ID, b));
    let ba = Filter::eq(field::SENDER_ID, b).and(Filter::eq(field::RECEIVER_ID, a));
    ab.or(ba)
}

/// Friend operations scoped to one signed-in account.
#[derive(Clone)]
pub struct FriendGraph {
    store: Arc<dyn RecordStore>,
    dispatcher: Dispatcher,
    user_id: Uuid,
}

impl FriendGraph {
    pub fn new(store: Arc<dyn RecordStore>, dispatcher: Dispatcher, user_id: Uuid) -> Self {
        Self {
            store,
            dispatcher,
            user_id,
        }
    }

    /// Send a friend request to the account holding `target_username`.
    pub async fn send_request(&self, target_username: &str) -> Result<FriendRequest> {
        let username = target_username.trim();
        let target = self
            .profile_by_username(username)
            .await?
            .ok_or(ChatError::NotFound("user"))?;

        if target.id == self.user_id {
            return Err(ChatError::SelfRequest);
        }

        // One request per unordered pair, ever, in any status: the kept
        // row is the history as well as the current state.
        let existing = self
            .store
            .select(
                RecordKind::FriendRequest,
                pair_filter(self.user_id, target.id),
                None,
            )
            .await?;
        if !existing.is_empty() {
            debug!(target_id = %target.id, "friend request already on file");
            return Err(ChatError::DuplicateRequest);
        }

        let committed = self
            .store
            .insert(Record::FriendRequest(FriendRequest {
                id: Uuid::new_v4(),
                sender_id: self.user_id,
                receiver_id: target.id,
                status: RequestStatus::Pending,
                // Placeholder; the store assigns the commit stamp.
                created_at: Utc::now(),
            }))
            .await?;
        let Some(request) = committed.into_friend_request() else {
            return Err(StoreError::Backend("insert echoed a different record kind".into()).into());
        };
        info!(request_id = %request.id, receiver_id = %target.id, "friend request sent");
        Ok(request)
    }

    /// Answer a pending request addressed to this account.
    pub async fn respond(
        &self,
        request_id: Uuid,
        decision: RequestDecision,
    ) -> Result<FriendRequest> {
        let rows = self
            .store
            .select(
                RecordKind::FriendRequest,
                Filter::eq(field::ID, request_id),
                None,
            )
            .await?;
        let request = rows
            .into_iter()
            .filter_map(Record::into_friend_request)
            .next()
            .ok_or(ChatError::NotFound("friend request"))?;

        // Only the receiver answers. A request addressed to someone else
        // is not visible from this account, so it reads as missing rather
        // than forbidden.
        if request.receiver_id != self.user_id {
            return Err(ChatError::NotFound("friend request"));
        }
        if request.status != RequestStatus::Pending {
            return Err(ChatError::InvalidState);
        }

        let status = decision.status();
        // The write re-checks pending, so a second session answering the
        // same request concurrently cannot overwrite a terminal state.
        let updated = self
            .store
            .update(
                RecordKind::FriendRequest,
                Filter::eq(field::ID, request_id)
                    .and(Filter::eq(field::STATUS, RequestStatus::Pending)),
                Patch::new().set(field::STATUS, status),
            )
            .await?;
        let Some(committed) = updated
            .into_iter()
            .filter_map(Record::into_friend_request)
            .next()
        else {
            // Left pending between our read and our write.
            return Err(ChatError::InvalidState);
        };
        info!(request_id = %request_id, status = status.as_str(), "friend request answered");
        Ok(committed)
    }

    /// Pending requests addressed to this account, oldest first, each
    /// joined with its sender's profile.
    pub async fn pending_requests(&self) -> Result<Vec<PendingRequest>> {
        let pending = Filter::eq(field::RECEIVER_ID, self.user_id)
            .and(Filter::eq(field::STATUS, RequestStatus::Pending));
        let rows = self
            .store
            .select(
                RecordKind::FriendRequest,
                pending,
                Some(Order::Asc(field::CREATED_AT)),
            )
            .await?;
        let requests: Vec<FriendRequest> = rows
            .into_iter()
            .filter_map(Record::into_friend_request)
            .collect();

        let sender_ids: Vec<Uuid> = requests.iter().map(|r| r.sender_id).collect();
        let mut senders = self.profiles_by_ids(&sender_ids).await?;

        let mut joined = Vec::with_capacity(requests.len());
        for request in requests {
            match senders.remove(&request.sender_id) {
                Some(sender) => joined.push(PendingRequest { request, sender }),
                // An orphaned request must not take the whole list down.
                None => warn!(request_id = %request.id, "request sender has no profile, skipping"),
            }
        }
        Ok(joined)
    }

    /// Everyone connected to this account through an accepted request, in
    /// the order those requests were created.
    pub async fn friends(&self) -> Result<Vec<Profile>> {
        let involves_me = Filter::eq(field::SENDER_ID, self.user_id)
            .or(Filter::eq(field::RECEIVER_ID, self.user_id));
        let accepted = involves_me.and(Filter::eq(field::STATUS, RequestStatus::Accepted));
        let rows = self
            .store
            .select(
                RecordKind::FriendRequest,
                accepted,
                Some(Order::Asc(field::CREATED_AT)),
            )
            .await?;
        let friend_ids: Vec<Uuid> = rows
            .into_iter()
            .filter_map(Record::into_friend_request)
            .map(|request| request.other_party(self.user_id))
            .collect();

        let mut profiles = self.profiles_by_ids(&friend_ids).await?;
        Ok(friend_ids
            .iter()
            .filter_map(|id| profiles.remove(id))
            .collect())
    }

    /// Live view of requests addressed to this account. Each committed
    /// change — a new pending request or a status transition — delivers
    /// the row as committed; callers re-list on whichever events they
    /// care about.
    pub fn watch(&self) -> RequestWatch {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.dispatcher.attach(
            RecordKind::FriendRequest,
            Filter::eq(field::RECEIVER_ID, self.user_id),
            move |event| {
                if let Some(request) = event.record.as_friend_request() {
                    let _ = tx.send(request.clone());
                }
            },
        );
        RequestWatch {
            dispatcher: self.dispatcher.clone(),
            handle,
            rx,
        }
    }

    async fn profile_by_username(&self, username: &str) -> Result<Option<Profile>> {
        let rows = self
            .store
            .select(
                RecordKind::Profile,
                Filter::eq(field::USERNAME, username),
                None,
            )
            .await?;
        Ok(rows.into_iter().filter_map(Record::into_profile).next())
    }

    async fn profiles_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Profile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let any = Filter::any_of(ids.iter().map(|id| Filter::eq(field::ID, *id)).collect());
        let rows = self.store.select(RecordKind::Profile, any, None).await?;
        Ok(rows
            .into_iter()
            .filter_map(Record::into_profile)
            .map(|profile| (profile.id, profile))
            .collect())
    }
}

/// Live stream of request rows addressed to one account. Dropping the
/// watch detaches its subscription.
pub struct RequestWatch {
    dispatcher: Dispatcher,
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<FriendRequest>,
}

impl RequestWatch {
    /// Next committed request row. `None` once the dispatcher shuts down.
    pub async fn next_change(&mut self) -> Option<FriendRequest> {
        self.rx.recv().await
    }
}

impl Drop for RequestWatch {
    fn drop(&mut self) {
        self.dispatcher.detach(self.handle);
    }
}
