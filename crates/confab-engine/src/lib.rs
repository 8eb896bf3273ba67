//! Realtime synchronization engine for two-party direct messaging.
//!
//! The engine sits between a UI and a subscribable record store
//! ([`confab_store::RecordStore`]) and keeps client-side views live:
//!
//! - [`FriendGraph`] — the friend-request lifecycle and the friendship
//!   relation derived from accepted requests;
//! - [`Conversation`] — ordered message history, live delivery, read
//!   receipts and the partner's typing indicator for one open chat;
//! - [`TypingTracker`] — the debounced typist side of the typing
//!   protocol;
//! - [`PresenceTracker`] — online flags and last-seen stamps;
//! - [`Dispatcher`] — the per-session pump that routes the store's
//!   change feed to attached subscriptions.
//!
//! [`ChatClient`] bundles all of it into one signed-in session. State
//! only ever enters a view through the store's committed-change echoes,
//! so every client renders exactly what the store holds.

pub mod client;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod friends;
pub mod presence;
pub mod typing;

pub use client::{ChatClient, ClientConfig, Identity};
pub use conversation::Conversation;
pub use dispatcher::{Dispatcher, SubscriptionHandle};
pub use error::{ChatError, Result};
pub use friends::{FriendGraph, PendingRequest, RequestDecision, RequestWatch};
pub use presence::{PresenceTracker, PresenceWatch};
pub use typing::{DEFAULT_TYPING_DEBOUNCE, TypingTracker};
