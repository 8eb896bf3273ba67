//! Backing-store contract for the confab engine.
//!
//! The engine never talks to a concrete backend; it runs against
//! [`RecordStore`], a small subscribable row-store interface: insert,
//! keyed upsert, filtered bulk update, filtered ordered select, and a
//! change feed that echoes every committed write — including the writer's
//! own. [`MemoryStore`] is the in-process reference implementation the
//! test suite runs on; a production deployment plugs a realtime database
//! client in behind the same trait.

pub mod error;
pub mod filter;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use confab_types::{ChangeEvent, FieldValue, Record, RecordKind};

pub use error::StoreError;
pub use filter::Filter;
pub use memory::MemoryStore;

/// Field assignments applied by [`RecordStore::update`]. Built fluently:
/// `Patch::new().set(field::IS_READ, true)`.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    fields: Vec<(&'static str, FieldValue)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &'static str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((field, value.into()));
        self
    }

    pub fn fields(&self) -> &[(&'static str, FieldValue)] {
        &self.fields
    }
}

/// Sort direction for [`RecordStore::select`]. Ties keep commit order.
#[derive(Debug, Clone, Copy)]
pub enum Order {
    Asc(&'static str),
    Desc(&'static str),
}

/// A durable, subscribable record store.
///
/// Contract every implementation honors:
///
/// - Writes are atomic per call and visible to later reads.
/// - Every committed insert and update is echoed on the change feed, in
///   commit order, to every subscriber — the writer included.
/// - `insert` assigns the commit stamp (`created_at` on requests and
///   messages, `updated_at` on typing signals); the caller's value is a
///   placeholder.
/// - Profile usernames are unique; a colliding insert fails with
///   [`StoreError::Conflict`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Commit a new row and return it as stored.
    async fn insert(&self, record: Record) -> Result<Record, StoreError>;

    /// Insert, or replace the row with the same natural key: `id` for most
    /// kinds, the `(user_id, chat_with_id)` pair for typing signals.
    async fn upsert(&self, record: Record) -> Result<Record, StoreError>;

    /// Apply `patch` to every row of `kind` matching `filter`; returns the
    /// rows as committed. Matching nothing is not an error.
    async fn update(
        &self,
        kind: RecordKind,
        filter: Filter,
        patch: Patch,
    ) -> Result<Vec<Record>, StoreError>;

    /// Read every row of `kind` matching `filter`, sorted when `order` is
    /// given.
    async fn select(
        &self,
        kind: RecordKind,
        filter: Filter,
        order: Option<Order>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Subscribe to the change feed from this point on. A receiver that
    /// falls too far behind observes a lag and resumes with newer events.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}
