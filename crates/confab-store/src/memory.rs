//! In-memory reference implementation of the store contract.
//!
//! Backs the whole test suite and any single-process deployment. Cloning a
//! [`MemoryStore`] shares the underlying tables and change feed, so several
//! client sessions in one process observe each other exactly the way they
//! would through a shared backend service.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use confab_types::{ChangeEvent, FieldValue, Profile, Record, RecordKind, RequestStatus, field};

use crate::{Filter, Order, Patch, RecordStore, StoreError};

/// Change feed depth. A subscriber that falls further behind than this
/// observes a lag and resumes with newer events.
const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Default)]
struct Tables {
    profiles: Vec<Record>,
    requests: Vec<Record>,
    messages: Vec<Record>,
    typing: Vec<Record>,
    fail_next: Option<String>,
}

impl Tables {
    fn rows(&self, kind: RecordKind) -> &Vec<Record> {
        match kind {
            RecordKind::Profile => &self.profiles,
            RecordKind::FriendRequest => &self.requests,
            RecordKind::Message => &self.messages,
            RecordKind::Typing => &self.typing,
        }
    }

    fn rows_mut(&mut self, kind: RecordKind) -> &mut Vec<Record> {
        match kind {
            RecordKind::Profile => &mut self.profiles,
            RecordKind::FriendRequest => &mut self.requests,
            RecordKind::Message => &mut self.messages,
            RecordKind::Typing => &mut self.typing,
        }
    }

    fn take_fail(&mut self) -> Result<(), StoreError> {
        match self.fail_next.take() {
            Some(reason) => Err(StoreError::Backend(reason)),
            None => Ok(()),
        }
    }

    /// Replace the row sharing `record`'s natural key, if any: the
    /// `(user_id, chat_with_id)` pair for typing signals, `id` otherwise.
    fn replace(&mut self, record: &Record) -> bool {
        if let Record::Typing(signal) = record {
            for slot in self.typing.iter_mut() {
                let same_pair = matches!(
                    slot.as_typing(),
                    Some(existing) if existing.user_id == signal.user_id
                        && existing.chat_with_id == signal.chat_with_id
                );
                if same_pair {
                    *slot = record.clone();
                    return true;
                }
            }
            return false;
        }

        let id = record.field(field::ID);
        for slot in self.rows_mut(record.kind()).iter_mut() {
            if id.is_some() && slot.field(field::ID) == id {
                *slot = record.clone();
                return true;
            }
        }
        false
    }
}

/// In-memory [`RecordStore`] with a live change feed.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
    changes_tx: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Tables::default())),
            changes_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().expect("store lock poisoned")
    }

    /// Fixture hook: insert a row verbatim. Ids and timestamps are kept as
    /// given and no uniqueness rules run, but the insert is still echoed on
    /// the change feed.
    pub fn seed(&self, record: Record) -> Record {
        let mut tables = self.lock();
        tables.rows_mut(record.kind()).push(record.clone());
        let _ = self.changes_tx.send(ChangeEvent::inserted(record.clone()));
        record
    }

    /// Fixture hook: a signed-up account with fresh id and quiet defaults.
    pub fn seed_profile(&self, username: &str, display_name: &str) -> Profile {
        let profile = Profile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: display_name.to_string(),
            avatar_url: None,
            status: String::new(),
            is_online: false,
            last_seen: Utc::now(),
        };
        self.seed(Record::Profile(profile.clone()));
        profile
    }

    /// Test hook: put an event on the change feed without committing
    /// anything. Lets tests exercise the duplicate-delivery tolerance
    /// subscribers are required to have.
    pub fn emit(&self, event: ChangeEvent) {
        let _ = self.changes_tx.send(event);
    }

    /// Test hook: make the next store call fail with
    /// [`StoreError::Backend`].
    pub fn fail_next(&self, reason: &str) {
        self.lock().fail_next = Some(reason.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, mut record: Record) -> Result<Record, StoreError> {
        let mut tables = self.lock();
        tables.take_fail()?;

        stamp_commit(&mut record);
        if let Record::Profile(profile) = &record {
            let taken = tables.profiles.iter().any(|row| {
                row.as_profile()
                    .is_some_and(|existing| existing.username == profile.username)
            });
            if taken {
                return Err(StoreError::Conflict(format!(
                    "username '{}' is taken",
                    profile.username
                )));
            }
        }

        tables.rows_mut(record.kind()).push(record.clone());
        debug!(kind = ?record.kind(), "committed insert");
        // Sent under the lock so feed order matches commit order.
        let _ = self.changes_tx.send(ChangeEvent::inserted(record.clone()));
        Ok(record)
    }

    async fn upsert(&self, mut record: Record) -> Result<Record, StoreError> {
        let mut tables = self.lock();
        tables.take_fail()?;

        stamp_commit(&mut record);
        let event = if tables.replace(&record) {
            ChangeEvent::updated(record.clone())
        } else {
            tables.rows_mut(record.kind()).push(record.clone());
            ChangeEvent::inserted(record.clone())
        };
        debug!(kind = ?record.kind(), op = ?event.op, "committed upsert");
        let _ = self.changes_tx.send(event);
        Ok(record)
    }

    async fn update(
        &self,
        kind: RecordKind,
        filter: Filter,
        patch: Patch,
    ) -> Result<Vec<Record>, StoreError> {
        let mut tables = self.lock();
        tables.take_fail()?;

        // Staged on clones first: a patch that errors commits nothing,
        // keeping the call atomic.
        let mut staged = Vec::new();
        for (index, slot) in tables.rows(kind).iter().enumerate() {
            if !filter.matches(slot) {
                continue;
            }
            let mut row = slot.clone();
            apply_patch(&mut row, &patch)?;
            staged.push((index, row));
        }

        let mut committed = Vec::with_capacity(staged.len());
        for (index, row) in staged {
            tables.rows_mut(kind)[index] = row.clone();
            committed.push(row);
        }

        if !committed.is_empty() {
            debug!(kind = ?kind, rows = committed.len(), "committed update");
        }
        for record in &committed {
            let _ = self.changes_tx.send(ChangeEvent::updated(record.clone()));
        }
        Ok(committed)
    }

    async fn select(
        &self,
        kind: RecordKind,
        filter: Filter,
        order: Option<Order>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut tables = self.lock();
        tables.take_fail()?;

        let mut rows: Vec<Record> = tables
            .rows(kind)
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        if let Some(order) = order {
            sort_rows(&mut rows, order);
        }
        Ok(rows)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes_tx.subscribe()
    }
}

/// Overwrite the caller's placeholder timestamp with the commit stamp.
/// Profiles keep theirs; their times are session state, not commit order.
fn stamp_commit(record: &mut Record) {
    let now = Utc::now();
    match record {
        Record::Profile(_) => {}
        Record::FriendRequest(request) => request.created_at = now,
        Record::Message(message) => message.created_at = now,
        Record::Typing(signal) => signal.updated_at = now,
    }
}

fn apply_patch(record: &mut Record, patch: &Patch) -> Result<(), StoreError> {
    for (name, value) in patch.fields() {
        apply_field(record, name, value)?;
    }
    Ok(())
}

fn apply_field(
    record: &mut Record,
    name: &'static str,
    value: &FieldValue,
) -> Result<(), StoreError> {
    let kind = record.kind();
    match record {
        Record::Profile(profile) => match (name, value) {
            (field::DISPLAY_NAME, FieldValue::Text(v)) => profile.display_name = v.clone(),
            (field::STATUS, FieldValue::Text(v)) => profile.status = v.clone(),
            (field::IS_ONLINE, FieldValue::Flag(v)) => profile.is_online = *v,
            (field::LAST_SEEN, FieldValue::Time(v)) => profile.last_seen = *v,
            _ => return Err(StoreError::UnknownField { kind, field: name }),
        },
        Record::FriendRequest(request) => match (name, value) {
            (field::STATUS, FieldValue::Text(v)) => {
                request.status = RequestStatus::parse(v)
                    .ok_or_else(|| StoreError::Backend(format!("invalid request status '{v}'")))?;
            }
            _ => return Err(StoreError::UnknownField { kind, field: name }),
        },
        Record::Message(message) => match (name, value) {
            (field::IS_READ, FieldValue::Flag(v)) => message.is_read = *v,
            _ => return Err(StoreError::UnknownField { kind, field: name }),
        },
        Record::Typing(signal) => match (name, value) {
            (field::IS_TYPING, FieldValue::Flag(v)) => signal.is_typing = *v,
            (field::UPDATED_AT, FieldValue::Time(v)) => signal.updated_at = *v,
            _ => return Err(StoreError::UnknownField { kind, field: name }),
        },
    }
    Ok(())
}

fn sort_rows(rows: &mut [Record], order: Order) {
    let (name, descending) = match order {
        Order::Asc(name) => (name, false),
        Order::Desc(name) => (name, true),
    };
    // Stable sort, so equal keys keep commit order.
    rows.sort_by(|a, b| {
        let ordering = compare_values(a.field(name), b.field(name));
        if descending { ordering.reverse() } else { ordering }
    });
}

fn compare_values(a: Option<FieldValue>, b: Option<FieldValue>) -> Ordering {
    match (a, b) {
        (Some(FieldValue::Time(a)), Some(FieldValue::Time(b))) => a.cmp(&b),
        (Some(FieldValue::Text(a)), Some(FieldValue::Text(b))) => a.cmp(&b),
        (Some(FieldValue::Id(a)), Some(FieldValue::Id(b))) => a.cmp(&b),
        (Some(FieldValue::Flag(a)), Some(FieldValue::Flag(b))) => a.cmp(&b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use confab_types::{ChangeOp, Message, TypingSignal};

    use super::*;

    fn draft_message(sender_id: Uuid, receiver_id: Uuid, content: &str) -> Record {
        Record::Message(Message {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content: content.to_string(),
            is_read: false,
            created_at: Utc::now() - Duration::days(1),
        })
    }

    fn typing_signal(user_id: Uuid, chat_with_id: Uuid, is_typing: bool) -> Record {
        Record::Typing(TypingSignal {
            user_id,
            chat_with_id,
            is_typing,
            updated_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn insert_stamps_commit_time_and_echoes() {
        let store = MemoryStore::new();
        let mut feed = store.changes();

        let before = Utc::now() - Duration::seconds(1);
        let committed = store
            .insert(draft_message(Uuid::new_v4(), Uuid::new_v4(), "hello"))
            .await
            .unwrap();

        let message = committed.as_message().unwrap();
        assert!(message.created_at > before, "placeholder stamp must be replaced");

        let event = feed.recv().await.unwrap();
        assert_eq!(event.op, ChangeOp::Insert);
        assert_eq!(event.record, committed);
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let store = MemoryStore::new();
        store.seed_profile("ana", "Ana");

        let clash = Record::Profile(Profile {
            id: Uuid::new_v4(),
            username: "ana".into(),
            display_name: "Other Ana".into(),
            avatar_url: None,
            status: String::new(),
            is_online: false,
            last_seen: Utc::now(),
        });
        let err = store.insert(clash).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn select_filters_and_orders_by_field() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Utc::now();

        // Seeded newest-first; ascending select must reorder them.
        for (content, offset) in [("third", 3), ("first", 1), ("second", 2)] {
            store.seed(Record::Message(Message {
                id: Uuid::new_v4(),
                sender_id: a,
                receiver_id: b,
                content: content.into(),
                is_read: false,
                created_at: base + Duration::seconds(offset),
            }));
        }
        store.seed(draft_message(b, Uuid::new_v4(), "elsewhere"));

        let rows = store
            .select(
                RecordKind::Message,
                Filter::eq(field::SENDER_ID, a),
                Some(Order::Asc(field::CREATED_AT)),
            )
            .await
            .unwrap();

        let contents: Vec<_> = rows
            .iter()
            .map(|r| r.as_message().unwrap().content.as_str())
            .collect();
        assert_eq!(contents, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn update_patches_matching_rows_and_echoes_each() {
        let store = MemoryStore::new();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        store.seed(draft_message(sender, receiver, "one"));
        store.seed(draft_message(sender, receiver, "two"));
        store.seed(draft_message(receiver, sender, "reply"));
        let mut feed = store.changes();

        let committed = store
            .update(
                RecordKind::Message,
                Filter::eq(field::RECEIVER_ID, receiver)
                    .and(Filter::eq(field::IS_READ, false)),
                Patch::new().set(field::IS_READ, true),
            )
            .await
            .unwrap();
        assert_eq!(committed.len(), 2);

        for _ in 0..2 {
            let event = feed.recv().await.unwrap();
            assert_eq!(event.op, ChangeOp::Update);
            assert!(event.record.as_message().unwrap().is_read);
        }

        let unread = store
            .select(
                RecordKind::Message,
                Filter::eq(field::RECEIVER_ID, receiver)
                    .and(Filter::eq(field::IS_READ, false)),
                None,
            )
            .await
            .unwrap();
        assert!(unread.is_empty());
    }

    #[tokio::test]
    async fn matching_nothing_is_not_an_error() {
        let store = MemoryStore::new();
        let committed = store
            .update(
                RecordKind::Message,
                Filter::eq(field::ID, Uuid::new_v4()),
                Patch::new().set(field::IS_READ, true),
            )
            .await
            .unwrap();
        assert!(committed.is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_typing_row_by_pair() {
        let store = MemoryStore::new();
        let typist = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let mut feed = store.changes();

        store.upsert(typing_signal(typist, viewer, true)).await.unwrap();
        store.upsert(typing_signal(typist, viewer, false)).await.unwrap();
        // A different pair gets its own row.
        store.upsert(typing_signal(viewer, typist, true)).await.unwrap();

        assert_eq!(feed.recv().await.unwrap().op, ChangeOp::Insert);
        assert_eq!(feed.recv().await.unwrap().op, ChangeOp::Update);
        assert_eq!(feed.recv().await.unwrap().op, ChangeOp::Insert);

        let rows = store
            .select(
                RecordKind::Typing,
                Filter::eq(field::USER_ID, typist),
                None,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].as_typing().unwrap().is_typing);
    }

    #[tokio::test]
    async fn fail_next_fails_exactly_one_call() {
        let store = MemoryStore::new();
        store.fail_next("backend unreachable");

        let err = store
            .insert(draft_message(Uuid::new_v4(), Uuid::new_v4(), "lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(err.to_string().contains("backend unreachable"));

        // Nothing was committed, and the next call succeeds.
        let rows = store
            .select(RecordKind::Message, Filter::All, None)
            .await
            .unwrap();
        assert!(rows.is_empty());
        store
            .insert(draft_message(Uuid::new_v4(), Uuid::new_v4(), "retry"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn patching_a_foreign_field_errors() {
        let store = MemoryStore::new();
        store.seed(draft_message(Uuid::new_v4(), Uuid::new_v4(), "hm"));

        let err = store
            .update(
                RecordKind::Message,
                Filter::All,
                Patch::new().set(field::IS_TYPING, true),
            )
            .await
            .unwrap_err();
        match err {
            StoreError::UnknownField { kind, field: name } => {
                assert_eq!(kind, RecordKind::Message);
                assert_eq!(name, field::IS_TYPING);
            }
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_bad_patch_commits_nothing() {
        let store = MemoryStore::new();
        store.seed(typing_signal(Uuid::new_v4(), Uuid::new_v4(), false));
        let mut feed = store.changes();

        // The first assignment is valid for typing rows, the second is not;
        // the whole patch must be rolled back together.
        let err = store
            .update(
                RecordKind::Typing,
                Filter::All,
                Patch::new()
                    .set(field::IS_TYPING, true)
                    .set(field::CONTENT, "stray"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));

        let rows = store
            .select(RecordKind::Typing, Filter::All, None)
            .await
            .unwrap();
        assert!(!rows[0].as_typing().unwrap().is_typing);
        assert!(feed.try_recv().is_err(), "a failed update must not echo");
    }

    #[tokio::test]
    async fn emit_redelivers_without_committing() {
        let store = MemoryStore::new();
        let mut feed = store.changes();

        let phantom = draft_message(Uuid::new_v4(), Uuid::new_v4(), "ghost");
        store.emit(ChangeEvent::inserted(phantom.clone()));

        assert_eq!(feed.recv().await.unwrap().record, phantom);
        let rows = store
            .select(RecordKind::Message, Filter::All, None)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
