use confab_store::StoreError;
use thiserror::Error;

/// Engine-level failures. Every variant is recoverable at the call site
/// and renders a message fit to show directly to the user; callers keep
/// their input (the composed text, the request form) so the operation can
/// simply be retried.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A lookup missed; the payload names what was being looked for.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Friend requests cannot target the sender's own account.
    #[error("you cannot send a friend request to yourself")]
    SelfRequest,

    /// Some request already exists between the pair, whatever its status.
    #[error("a friend request already exists between you")]
    DuplicateRequest,

    /// The request left the pending state earlier; terminal states never
    /// transition again.
    #[error("this friend request has already been answered")]
    InvalidState,

    /// Message text was empty after trimming.
    #[error("message text is empty")]
    EmptyMessage,

    /// Underlying store failure, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatError>();
    }

    #[test]
    fn every_variant_renders_a_distinct_message() {
        let messages = [
            ChatError::NotFound("user").to_string(),
            ChatError::SelfRequest.to_string(),
            ChatError::DuplicateRequest.to_string(),
            ChatError::InvalidState.to_string(),
            ChatError::EmptyMessage.to_string(),
            ChatError::Store(StoreError::Backend("offline".into())).to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn store_errors_convert_with_question_mark() {
        fn fails() -> Result<()> {
            Err(StoreError::Backend("gone".into()))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(ChatError::Store(_))));
    }
}
