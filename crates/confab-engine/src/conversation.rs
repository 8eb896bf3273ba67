//! One open two-party conversation view.
//!
//! A view owns the ordered message history for its pair, live delivery of
//! new messages (the local user's own echoes included), read receipts and
//! the partner's typing indicator. Everything it shows arrived through
//! the store: a send only inserts, and the view catches the committed row
//! on the change feed like any other. What the sender sees is therefore
//! exactly what was committed, with no optimistic copy to reconcile.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use confab_store::{Filter, Order, Patch, RecordStore};
use confab_types::{ChangeEvent, ChangeOp, Message, Profile, Record, RecordKind, field};

use crate::dispatcher::{Dispatcher, SubscriptionHandle};
use crate::error::{ChatError, Result};
use crate::typing::TypingTracker;

/// Messages flowing `sender -> receiver`.
fn direction(sender: Uuid, receiver: Uuid) -> Filter {
    Filter::eq(field::SENDER_ID, sender).and(Filter::eq(field::RECEIVER_ID, receiver))
}

/// History plus the id set that keeps it duplicate-free. The history load
/// and the live feed overlap on purpose; whichever source hands us a row
/// second loses here.
struct HistoryState {
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
}

impl HistoryState {
    fn absorb(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

fn message_handler(
    state: Arc<Mutex<HistoryState>>,
    live_tx: mpsc::UnboundedSender<Message>,
) -> impl Fn(&ChangeEvent) + Send + Sync + 'static {
    move |event| {
        // Read-receipt updates change a flag on rows the view already
        // holds; only inserts extend history.
        if event.op != ChangeOp::Insert {
            return;
        }
        let Some(message) = event.record.as_message() else {
            return;
        };
        let mut state = state.lock().expect("history lock poisoned");
        if state.absorb(message.clone()) {
            let _ = live_tx.send(message.clone());
        }
    }
}

/// An open conversation between the signed-in account and one partner.
pub struct Conversation {
    store: Arc<dyn RecordStore>,
    dispatcher: Dispatcher,
    typing: TypingTracker,
    self_id: Uuid,
    partner: Profile,
    state: Arc<Mutex<HistoryState>>,
    live_rx: mpsc::UnboundedReceiver<Message>,
    typing_rx: watch::Receiver<bool>,
    handles: Vec<SubscriptionHandle>,
}

impl Conversation {
    pub(crate) async fn open(
        store: Arc<dyn RecordStore>,
        dispatcher: Dispatcher,
        typing: TypingTracker,
        self_id: Uuid,
        partner_id: Uuid,
    ) -> Result<Self> {
        let partner = fetch_profile(store.as_ref(), partner_id)
            .await?
            .ok_or(ChatError::NotFound("user"))?;

        let state = Arc::new(Mutex::new(HistoryState {
            messages: Vec::new(),
            seen: HashSet::new(),
        }));
        let (live_tx, live_rx) = mpsc::unbounded_channel();
        let (typing_tx, typing_rx) = watch::channel(false);

        // Listeners go up before the history read so a message committing
        // in between is delivered rather than lost; `absorb` drops the
        // overlap when both sources hand over the same row.
        let incoming = dispatcher.attach(
            RecordKind::Message,
            direction(partner_id, self_id),
            message_handler(state.clone(), live_tx.clone()),
        );
        let outgoing = dispatcher.attach(
            RecordKind::Message,
            direction(self_id, partner_id),
            message_handler(state.clone(), live_tx),
        );
        let typing_watch = dispatcher.attach(
            RecordKind::Typing,
            Filter::eq(field::USER_ID, partner_id)
                .and(Filter::eq(field::CHAT_WITH_ID, self_id)),
            move |event| {
                if let Some(signal) = event.record.as_typing() {
                    let _ = typing_tx.send(signal.is_typing);
                }
            },
        );

        // Built before the fallible loads so an early error drops the view
        // and detaches everything attached above.
        let conversation = Self {
            store,
            dispatcher,
            typing,
            self_id,
            partner,
            state,
            live_rx,
            typing_rx,
            handles: vec![incoming, outgoing, typing_watch],
        };

        conversation.load_history().await?;
        conversation.mark_delivered().await?;
        debug!(partner_id = %conversation.partner.id, "conversation opened");
        Ok(conversation)
    }

    async fn load_history(&self) -> Result<()> {
        let pair =
            direction(self.self_id, self.partner.id).or(direction(self.partner.id, self.self_id));
        let rows = self
            .store
            .select(
                RecordKind::Message,
                pair,
                Some(Order::Asc(field::CREATED_AT)),
            )
            .await?;

        let mut state = self.state.lock().expect("history lock poisoned");
        for row in rows {
            if let Some(message) = row.into_message() {
                state.absorb(message);
            }
        }
        // Live arrivals may have landed before the load; one ordered pass
        // mends the seam. The sort is stable, so equal stamps keep their
        // arrival order.
        state.messages.sort_by_key(|message| message.created_at);
        debug!(count = state.messages.len(), "history loaded");
        Ok(())
    }

    /// Flip every unread message from the partner to read. Idempotent;
    /// opening the view does this once so unread marks clear the moment
    /// the conversation is on screen.
    pub async fn mark_delivered(&self) -> Result<usize> {
        let unread = direction(self.partner.id, self.self_id)
            .and(Filter::eq(field::IS_READ, false));
        let flipped = self
            .store
            .update(
                RecordKind::Message,
                unread,
                Patch::new().set(field::IS_READ, true),
            )
            .await?;
        if !flipped.is_empty() {
            debug!(count = flipped.len(), "marked messages read");
        }
        Ok(flipped.len())
    }

    /// Send `text` to the partner. Trims first; an empty result commits
    /// nothing. An error always means no message was committed; once the
    /// insert lands the send succeeds, and the typing flag is settled
    /// afterwards best-effort.
    pub async fn send(&self, text: &str) -> Result<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        self.store
            .insert(Record::Message(Message {
                id: Uuid::new_v4(),
                sender_id: self.self_id,
                receiver_id: self.partner.id,
                content: trimmed.to_string(),
                is_read: false,
                // Placeholder; the store assigns the commit stamp.
                created_at: Utc::now(),
            }))
            .await?;

        // The message is committed from here on; a failed clear must not
        // turn into a send error, or the caller would retry a message
        // that was delivered.
        if let Err(err) = self.typing.clear(self.self_id, self.partner.id).await {
            warn!(
                user_id = %self.self_id,
                chat_with_id = %self.partner.id,
                "typing flag left set after send: {err}"
            );
        }
        Ok(())
    }

    /// Record a keystroke for the partner's typing indicator.
    pub async fn notify_typing(&self) -> Result<()> {
        self.typing.notify(self.self_id, self.partner.id).await
    }

    /// Next live message for this pair — own echoes included — in commit
    /// order, duplicates already dropped. `None` once the dispatcher
    /// shuts down.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.live_rx.recv().await
    }

    /// Ordered snapshot of everything observed so far.
    pub fn history(&self) -> Vec<Message> {
        self.state
            .lock()
            .expect("history lock poisoned")
            .messages
            .clone()
    }

    pub fn partner(&self) -> &Profile {
        &self.partner
    }

    /// Latest committed typing flag for the partner. Trusted as-is:
    /// clearing it is the typist's debounce's job, never the viewer's.
    pub fn partner_typing(&self) -> bool {
        *self.typing_rx.borrow()
    }

    /// Watch channel mirroring the partner's typing flag.
    pub fn typing_signal(&self) -> watch::Receiver<bool> {
        self.typing_rx.clone()
    }

    /// Release the view's subscriptions and settle its typing state. A
    /// burst still in flight gets its trailing `false` written now rather
    /// than never.
    pub async fn close(mut self) -> Result<()> {
        for handle in self.handles.drain(..) {
            self.dispatcher.detach(handle);
        }
        if self.typing.cancel(self.self_id, self.partner.id) {
            self.typing.clear(self.self_id, self.partner.id).await?;
        }
        debug!(partner_id = %self.partner.id, "conversation closed");
        Ok(())
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.dispatcher.detach(handle);
        }
        // No async here, so a live burst only gets its timer aborted; the
        // flag settles on `close`, the next burst, or not at all.
        self.typing.cancel(self.self_id, self.partner.id);
    }
}

async fn fetch_profile(store: &dyn RecordStore, id: Uuid) -> Result<Option<Profile>> {
    let rows = store
        .select(RecordKind::Profile, Filter::eq(field::ID, id), None)
        .await?;
    Ok(rows.into_iter().filter_map(Record::into_profile).next())
}
