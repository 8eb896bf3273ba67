use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered account as the rest of the system sees it. Rows are created
/// by the auth layer at signup; the engine itself only ever writes
/// `is_online` and `last_seen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    /// Unique handle used to address friend requests.
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// Free-form status line, owned by the account holder.
    pub status: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Lifecycle of a friend request. `Pending` is the only state that can
/// still transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Accepted and rejected requests never transition again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A friend request row. Written once by the sender, answered at most once
/// by the receiver. Answered rows are kept: their existence is what stops a
/// pair of accounts from ever holding a second request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl FriendRequest {
    /// The other participant, from `me`'s point of view.
    pub fn other_party(&self, me: Uuid) -> Uuid {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// A direct message. Immutable once committed except for `is_read`, which
/// only the receiver flips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub is_read: bool,
    /// Store-assigned commit stamp; the authoritative ordering key.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this message belongs to the conversation between `a` and `b`.
    pub fn between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

/// Ephemeral "`user_id` is typing to `chat_with_id`" flag, keyed by that
/// pair. The typist's own debounce timer is the only thing that clears it;
/// viewers mirror the committed value and never age it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub user_id: Uuid,
    pub chat_with_id: Uuid,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}
