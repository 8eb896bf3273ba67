use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FriendRequest, Message, Profile, RequestStatus, TypingSignal};

/// The four record kinds the backing store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Profile,
    FriendRequest,
    Message,
    Typing,
}

/// Field names filters and patches are written against. One flat namespace
/// for all four kinds; a name a kind does not have simply never matches.
pub mod field {
    pub const ID: &str = "id";
    pub const USERNAME: &str = "username";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const STATUS: &str = "status";
    pub const IS_ONLINE: &str = "is_online";
    pub const LAST_SEEN: &str = "last_seen";
    pub const SENDER_ID: &str = "sender_id";
    pub const RECEIVER_ID: &str = "receiver_id";
    pub const CONTENT: &str = "content";
    pub const IS_READ: &str = "is_read";
    pub const CREATED_AT: &str = "created_at";
    pub const USER_ID: &str = "user_id";
    pub const CHAT_WITH_ID: &str = "chat_with_id";
    pub const IS_TYPING: &str = "is_typing";
    pub const UPDATED_AT: &str = "updated_at";
}

/// A single field's value as filters, patches and sort keys see it.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Id(Uuid),
    Text(String),
    Flag(bool),
    Time(DateTime<Utc>),
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        Self::Id(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl From<RequestStatus> for FieldValue {
    fn from(v: RequestStatus) -> Self {
        Self::Text(v.as_str().to_string())
    }
}

/// One row of any kind. Tagged so a serialized change event names the kind
/// next to the row, the way the store's wire protocol carries them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "row", rename_all = "snake_case")]
pub enum Record {
    Profile(Profile),
    FriendRequest(FriendRequest),
    Message(Message),
    Typing(TypingSignal),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Profile(_) => RecordKind::Profile,
            Self::FriendRequest(_) => RecordKind::FriendRequest,
            Self::Message(_) => RecordKind::Message,
            Self::Typing(_) => RecordKind::Typing,
        }
    }

    /// Generic field projection; filter evaluation and sorting run on this.
    /// `None` means the kind has no such field.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        match self {
            Self::Profile(p) => match name {
                field::ID => Some(p.id.into()),
                field::USERNAME => Some(p.username.clone().into()),
                field::DISPLAY_NAME => Some(p.display_name.clone().into()),
                field::STATUS => Some(p.status.clone().into()),
                field::IS_ONLINE => Some(p.is_online.into()),
                field::LAST_SEEN => Some(p.last_seen.into()),
                _ => None,
            },
            Self::FriendRequest(r) => match name {
                field::ID => Some(r.id.into()),
                field::SENDER_ID => Some(r.sender_id.into()),
                field::RECEIVER_ID => Some(r.receiver_id.into()),
                field::STATUS => Some(r.status.into()),
                field::CREATED_AT => Some(r.created_at.into()),
                _ => None,
            },
            Self::Message(m) => match name {
                field::ID => Some(m.id.into()),
                field::SENDER_ID => Some(m.sender_id.into()),
                field::RECEIVER_ID => Some(m.receiver_id.into()),
                field::CONTENT => Some(m.content.clone().into()),
                field::IS_READ => Some(m.is_read.into()),
                field::CREATED_AT => Some(m.created_at.into()),
                _ => None,
            },
            Self::Typing(t) => match name {
                field::USER_ID => Some(t.user_id.into()),
                field::CHAT_WITH_ID => Some(t.chat_with_id.into()),
                field::IS_TYPING => Some(t.is_typing.into()),
                field::UPDATED_AT => Some(t.updated_at.into()),
                _ => None,
            },
        }
    }

    pub fn as_profile(&self) -> Option<&Profile> {
        match self {
            Self::Profile(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_friend_request(&self) -> Option<&FriendRequest> {
        match self {
            Self::FriendRequest(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_typing(&self) -> Option<&TypingSignal> {
        match self {
            Self::Typing(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_profile(self) -> Option<Profile> {
        match self {
            Self::Profile(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_friend_request(self) -> Option<FriendRequest> {
        match self {
            Self::FriendRequest(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_typing(self) -> Option<TypingSignal> {
        match self {
            Self::Typing(t) => Some(t),
            _ => None,
        }
    }
}
