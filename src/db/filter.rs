use uuid::Uuid;

use crate::models::SyncStatus;

/// Which rows to return with respect to soft deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tombstones {
    /// Live rows only (`deleted_at IS NULL`). Every read path for UI use.
    #[default]
    Exclude,
    /// Soft-deleted rows only.
    Only,
    Include,
}

/// Foreign keys a child row can be filtered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentKey {
    Customer,
    Order,
}

impl ParentKey {
    pub fn column(&self) -> &'static str {
        match self {
            ParentKey::Customer => "customer_id",
            ParentKey::Order => "order_id",
        }
    }
}

/// Row predicate for store queries and observers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub owner_id: Option<String>,
    pub tombstones: Tombstones,
    pub sync_status: Option<SyncStatus>,
    pub parent: Option<(ParentKey, Uuid)>,
}

impl Filter {
    /// Live rows of any owner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live rows belonging to `owner_id`.
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    pub fn tombstones(mut self, tombstones: Tombstones) -> Self {
        self.tombstones = tombstones;
        self
    }

    pub fn status(mut self, status: SyncStatus) -> Self {
        self.sync_status = Some(status);
        self
    }

    pub fn child_of(mut self, key: ParentKey, parent_id: Uuid) -> Self {
        self.parent = Some((key, parent_id));
        self
    }

    /// Builds the `WHERE` clause body and its positional bind values.
    pub(crate) fn to_sql(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(owner) = &self.owner_id {
            conditions.push("owner_id = ?".to_string());
            binds.push(owner.clone());
        }

        match self.tombstones {
            Tombstones::Exclude => conditions.push("deleted_at IS NULL".to_string()),
            Tombstones::Only => conditions.push("deleted_at IS NOT NULL".to_string()),
            Tombstones::Include => {}
        }

        if let Some(status) = self.sync_status {
            conditions.push("sync_status = ?".to_string());
            binds.push(status.to_string());
        }

        if let Some((key, id)) = &self.parent {
            conditions.push(format!("{} = ?", key.column()));
            binds.push(id.to_string());
        }

        if conditions.is_empty() {
            ("1 = 1".to_string(), binds)
        } else {
            (conditions.join(" AND "), binds)
        }
    }
}
