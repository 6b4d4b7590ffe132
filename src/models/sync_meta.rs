use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::clock::Millis;

/// Local sync state of a row.
///
/// `Dirty` covers both "never pushed" and "modified since the last push".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Dirty,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Dirty => write!(f, "dirty"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "synced" => Ok(SyncStatus::Synced),
            "dirty" => Ok(SyncStatus::Dirty),
            _ => Err(format!(
                "Invalid sync status '{}'. Valid options: synced, dirty",
                s
            )),
        }
    }
}

/// Metadata shared by every synchronizable row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub id: Uuid,
    pub owner_id: String,
    pub created_at: Millis,
    pub updated_at: Millis,
    pub deleted_at: Option<Millis>,
    pub sync_status: SyncStatus,
}

impl SyncMeta {
    /// Fresh metadata with a client-generated id. Timestamps are stamped on insert.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            sync_status: SyncStatus::Dirty,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.sync_status == SyncStatus::Dirty
    }

    /// Marks a local write: dirty, with `updated_at` moved to `now`.
    ///
    /// `updated_at` strictly increases on every write, even when the clock
    /// has not moved, so the push acknowledgement can tell the versions apart.
    pub fn touch(&mut self, now: Millis) {
        self.sync_status = SyncStatus::Dirty;
        self.updated_at = now.max(self.updated_at + 1);
    }

    /// Soft-deletes the row. An existing tombstone is never moved or cleared.
    pub fn tombstone(&mut self, now: Millis) {
        self.touch(now);
        if self.deleted_at.is_none() {
            self.deleted_at = Some(now);
        }
    }
}
