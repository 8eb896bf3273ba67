use serde::{Deserialize, Serialize};

use crate::record::{Record, RecordKind};

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
}

/// A committed row change, echoed by the store to every subscriber —
/// including the session that performed the write. All observed state
/// enters a view through these events; there is no optimistic local path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub record: Record,
}

impl ChangeEvent {
    pub fn inserted(record: Record) -> Self {
        Self {
            op: ChangeOp::Insert,
            record,
        }
    }

    pub fn updated(record: Record) -> Self {
        Self {
            op: ChangeOp::Update,
            record,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.record.kind()
    }
}
