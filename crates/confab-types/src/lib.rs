//! Shared data model for the confab messaging engine.
//!
//! Four record kinds live in the backing store: profiles, friend requests,
//! direct messages and typing signals. This crate defines those rows, the
//! [`Record`] envelope that carries any of them, and the [`ChangeEvent`]
//! the store echoes after every committed write.

pub mod events;
pub mod models;
pub mod record;

pub use events::{ChangeEvent, ChangeOp};
pub use models::{FriendRequest, Message, Profile, RequestStatus, TypingSignal};
pub use record::{FieldValue, Record, RecordKind, field};
